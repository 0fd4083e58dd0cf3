//! Materialized entity state at a point in the commit order.

use crate::commit::CommitKey;
use crate::entity::{DynEntity, Entity};
use harmony_types::{CommitId, EntityId};
use std::sync::Arc;

/// The state of one entity after one commit.
///
/// Identity is `(entity_id, commit_id)`. The entity is shared and never
/// mutated; the engine copies it before applying further changes.
#[derive(Debug, Clone)]
pub struct ObjectSnapshot {
    entity: Arc<dyn DynEntity>,
    commit_key: CommitKey,
    is_root: bool,
    entity_is_deleted: bool,
    references: Vec<EntityId>,
}

impl ObjectSnapshot {
    /// Captures `entity` as produced by the commit at `commit_key`.
    /// `is_root` marks the snapshot that created the entity.
    #[must_use]
    pub fn new(entity: Arc<dyn DynEntity>, commit_key: CommitKey, is_root: bool) -> Self {
        let entity_is_deleted = entity.is_tombstoned();
        let references = entity.reference_ids();
        Self {
            entity,
            commit_key,
            is_root,
            entity_is_deleted,
            references,
        }
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity.entity_id()
    }

    pub fn type_name(&self) -> &'static str {
        self.entity.entity_type()
    }

    pub fn entity(&self) -> &dyn DynEntity {
        self.entity.as_ref()
    }

    pub fn shared_entity(&self) -> Arc<dyn DynEntity> {
        Arc::clone(&self.entity)
    }

    /// The entity as a `T`, if it is one.
    pub fn entity_as<T: Entity>(&self) -> Option<&T> {
        self.entity.as_any().downcast_ref::<T>()
    }

    pub fn commit_id(&self) -> CommitId {
        self.commit_key.commit_id
    }

    pub fn commit_key(&self) -> CommitKey {
        self.commit_key
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn entity_is_deleted(&self) -> bool {
        self.entity_is_deleted
    }

    pub fn references(&self) -> &[EntityId] {
        &self.references
    }

    pub fn references_entity(&self, id: EntityId) -> bool {
        self.references.contains(&id)
    }
}
