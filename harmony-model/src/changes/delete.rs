use crate::change::Change;
use crate::context::ChangeContext;
use crate::entity::Entity;
use crate::error::ChangeResult;
use async_trait::async_trait;
use harmony_types::EntityId;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;

/// Tombstones an entity at the commit's time. A later delete keeps the
/// earlier tombstone.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct DeleteChange<T> {
    entity_id: EntityId,
    #[serde(skip)]
    _target: PhantomData<fn() -> T>,
}

impl<T: Entity> DeleteChange<T> {
    #[must_use]
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            _target: PhantomData,
        }
    }
}

impl<T: Entity> fmt::Debug for DeleteChange<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeleteChange")
            .field("type", &T::TYPE_NAME)
            .field("entity_id", &self.entity_id)
            .finish()
    }
}

impl<T> Clone for DeleteChange<T> {
    fn clone(&self) -> Self {
        Self {
            entity_id: self.entity_id,
            _target: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Entity> Change for DeleteChange<T> {
    type Target = T;

    fn type_name() -> Cow<'static, str> {
        Cow::Owned(format!("delete:{}", T::TYPE_NAME))
    }

    fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    async fn apply_change(&self, entity: &mut T, ctx: &dyn ChangeContext) -> ChangeResult<()> {
        if entity.deleted_at().is_none() {
            entity.set_deleted_at(Some(ctx.commit().date_time()));
        }
        Ok(())
    }
}
