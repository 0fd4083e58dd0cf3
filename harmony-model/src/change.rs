//! Changes: typed, serializable mutations of a single entity.

use crate::commit::Commit;
use crate::context::ChangeContext;
use crate::entity::{DynEntity, Entity};
use crate::error::{ChangeError, ChangeResult};
use async_trait::async_trait;
use harmony_types::EntityId;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use tracing::trace;

/// A typed change to one entity.
///
/// Application must be a pure function of the prior entity state, the
/// commit metadata and read-only context lookups. Changes are not required
/// to be idempotent; replay determinism is what the engine relies on.
#[async_trait]
pub trait Change: fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Entity variant this change applies to.
    type Target: Entity;

    /// True for changes that can bring their entity into existence.
    const CREATES_ENTITY: bool = false;

    /// Stable discriminator used in persisted commits.
    fn type_name() -> Cow<'static, str>;

    /// Entity this change targets.
    fn entity_id(&self) -> EntityId;

    /// Builds the initial entity. Only meaningful when `CREATES_ENTITY` is
    /// true; the default refuses.
    async fn new_entity(
        &self,
        commit: &Commit,
        ctx: &dyn ChangeContext,
    ) -> ChangeResult<Self::Target> {
        let _ = (commit, ctx);
        Err(ChangeError::NewEntityUnsupported {
            change_type: Self::type_name().into_owned(),
        })
    }

    /// Mutates the entity in place.
    async fn apply_change(
        &self,
        entity: &mut Self::Target,
        ctx: &dyn ChangeContext,
    ) -> ChangeResult<()>;
}

/// Object-safe view over any [`Change`].
#[async_trait]
pub trait DynChange: fmt::Debug + Send + Sync {
    fn change_type(&self) -> Cow<'static, str>;

    fn target_id(&self) -> EntityId;

    fn target_type(&self) -> &'static str;

    fn creates_entity(&self) -> bool;

    async fn create_entity(
        &self,
        commit: &Commit,
        ctx: &dyn ChangeContext,
    ) -> ChangeResult<Box<dyn DynEntity>>;

    /// Applies the change. An entity of another variant is left untouched.
    async fn apply(&self, entity: &mut dyn DynEntity, ctx: &dyn ChangeContext) -> ChangeResult<()>;

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error>;

    fn as_any(&self) -> &dyn Any;
}

fn downcast_target<T: Entity>(entity: &mut dyn DynEntity) -> Option<&mut T> {
    entity.as_any_mut().downcast_mut::<T>()
}

#[async_trait]
impl<C: Change> DynChange for C {
    fn change_type(&self) -> Cow<'static, str> {
        C::type_name()
    }

    fn target_id(&self) -> EntityId {
        self.entity_id()
    }

    fn target_type(&self) -> &'static str {
        C::Target::TYPE_NAME
    }

    fn creates_entity(&self) -> bool {
        C::CREATES_ENTITY
    }

    async fn create_entity(
        &self,
        commit: &Commit,
        ctx: &dyn ChangeContext,
    ) -> ChangeResult<Box<dyn DynEntity>> {
        let entity = self.new_entity(commit, ctx).await?;
        Ok(Box::new(entity))
    }

    async fn apply(&self, entity: &mut dyn DynEntity, ctx: &dyn ChangeContext) -> ChangeResult<()> {
        let found = entity.entity_type();
        let Some(target) = downcast_target::<C::Target>(entity) else {
            trace!(
                "Skipping {} on {}: expected {}, found {}",
                C::type_name(),
                self.entity_id(),
                C::Target::TYPE_NAME,
                found
            );
            return Ok(());
        };
        self.apply_change(target, ctx).await
    }

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
