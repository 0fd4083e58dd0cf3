use crate::change::Change;
use crate::context::ChangeContext;
use crate::error::{ChangeResult, OrderError};
use crate::order::{self, Orderable};
use async_trait::async_trait;
use harmony_types::EntityId;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;

/// Moves an entity to a new position in its list.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SetOrderChange<T> {
    entity_id: EntityId,
    order: f64,
    #[serde(skip)]
    _target: PhantomData<fn() -> T>,
}

impl<T: Orderable> SetOrderChange<T> {
    /// Places the entity at an explicit order key, which must be finite.
    pub fn to(entity_id: EntityId, order: f64) -> Result<Self, OrderError> {
        Ok(Self::at(entity_id, order::check_finite(order)?))
    }

    pub(crate) fn at(entity_id: EntityId, order: f64) -> Self {
        Self {
            entity_id,
            order,
            _target: PhantomData,
        }
    }

    /// Places the entity between two neighbours. Either side may be absent
    /// at the list ends.
    pub fn between(
        entity_id: EntityId,
        before: Option<&T>,
        after: Option<&T>,
    ) -> Result<Self, OrderError> {
        let order = order::between(before.map(|item| item.order()), after.map(|item| item.order()))?;
        Ok(Self::at(entity_id, order))
    }

    /// Places the entity one stride after `item`.
    pub fn after(entity_id: EntityId, item: &T) -> Result<Self, OrderError> {
        Self::between(entity_id, Some(item), None)
    }

    /// Places the entity one stride before `item`.
    pub fn before(entity_id: EntityId, item: &T) -> Result<Self, OrderError> {
        Self::between(entity_id, None, Some(item))
    }

    pub fn order(&self) -> f64 {
        self.order
    }
}

impl<T: Orderable> fmt::Debug for SetOrderChange<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetOrderChange")
            .field("type", &T::TYPE_NAME)
            .field("entity_id", &self.entity_id)
            .field("order", &self.order)
            .finish()
    }
}

impl<T> Clone for SetOrderChange<T> {
    fn clone(&self) -> Self {
        Self {
            entity_id: self.entity_id,
            order: self.order,
            _target: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Orderable> Change for SetOrderChange<T> {
    type Target = T;

    fn type_name() -> Cow<'static, str> {
        Cow::Owned(format!("set_order:{}", T::TYPE_NAME))
    }

    fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    async fn apply_change(&self, entity: &mut T, _ctx: &dyn ChangeContext) -> ChangeResult<()> {
        entity.set_order(self.order);
        Ok(())
    }
}
