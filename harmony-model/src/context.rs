use crate::commit::Commit;
use crate::entity::Entity;
use crate::error::ChangeResult;
use crate::snapshot::ObjectSnapshot;
use async_trait::async_trait;
use harmony_types::EntityId;

/// Read-only view of other entities, bound to the commit being applied.
///
/// Lookups see the state as of the change being applied: everything
/// earlier in the total order, plus earlier changes of the same commit.
#[async_trait]
pub trait ChangeContext: Send + Sync {
    fn commit(&self) -> &Commit;

    /// Latest snapshot of `entity_id`, or `None` if it was never created.
    async fn get_snapshot(&self, entity_id: EntityId) -> ChangeResult<Option<ObjectSnapshot>>;

    /// True if the entity exists and is tombstoned. Missing entities are
    /// not deleted.
    async fn is_object_deleted(&self, entity_id: EntityId) -> ChangeResult<bool> {
        Ok(self
            .get_snapshot(entity_id)
            .await?
            .is_some_and(|snapshot| snapshot.entity_is_deleted()))
    }
}

impl<'c> dyn ChangeContext + 'c {
    /// Typed lookup. Returns `None` when the entity is missing or is not a `T`.
    pub async fn get_entity<T: Entity>(&self, entity_id: EntityId) -> ChangeResult<Option<T>> {
        Ok(self
            .get_snapshot(entity_id)
            .await?
            .and_then(|snapshot| snapshot.entity_as::<T>().cloned()))
    }
}
