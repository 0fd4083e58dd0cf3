use crate::commit::Commit;
use chrono::{DateTime, Utc};
use harmony_types::EntityId;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::fmt;

/// A domain object whose state is derived by replaying changes.
///
/// Entities are never physically removed. Deletion is a tombstone: once
/// `deleted_at` is set, normal operation never clears it.
///
/// Implementations must be deterministic: `references` and
/// `remove_reference` may only look at the entity itself and the commit
/// they are given.
pub trait Entity: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable discriminator used for persistence and registry lookups.
    const TYPE_NAME: &'static str;

    fn id(&self) -> EntityId;

    fn deleted_at(&self) -> Option<DateTime<Utc>>;

    fn set_deleted_at(&mut self, at: Option<DateTime<Utc>>);

    /// Ids of other entities this entity points to.
    fn references(&self) -> Vec<EntityId> {
        Vec::new()
    }

    /// Called when a referenced entity was deleted in `commit`.
    ///
    /// Optional pointers should be cleared. If the reference is required,
    /// the entity tombstones itself at the commit's time.
    fn remove_reference(&mut self, id: EntityId, commit: &Commit) {
        let _ = (id, commit);
    }
}

/// Object-safe view over any [`Entity`], used by the engine and stores.
///
/// Method names differ from [`Entity`] so both traits can be in scope on a
/// concrete type without ambiguity.
pub trait DynEntity: fmt::Debug + Send + Sync {
    fn entity_id(&self) -> EntityId;

    fn entity_type(&self) -> &'static str;

    fn deletion_time(&self) -> Option<DateTime<Utc>>;

    fn is_tombstoned(&self) -> bool {
        self.deletion_time().is_some()
    }

    /// Tombstones the entity, keeping an earlier deletion time if present.
    fn mark_deleted(&mut self, at: DateTime<Utc>);

    fn reference_ids(&self) -> Vec<EntityId>;

    fn drop_reference(&mut self, id: EntityId, commit: &Commit);

    /// Structurally independent copy.
    fn boxed_copy(&self) -> Box<dyn DynEntity>;

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Entity> DynEntity for T {
    fn entity_id(&self) -> EntityId {
        self.id()
    }

    fn entity_type(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn deletion_time(&self) -> Option<DateTime<Utc>> {
        self.deleted_at()
    }

    fn mark_deleted(&mut self, at: DateTime<Utc>) {
        if self.deleted_at().is_none() {
            self.set_deleted_at(Some(at));
        }
    }

    fn reference_ids(&self) -> Vec<EntityId> {
        self.references()
    }

    fn drop_reference(&mut self, id: EntityId, commit: &Commit) {
        self.remove_reference(id, commit);
    }

    fn boxed_copy(&self) -> Box<dyn DynEntity> {
        Box::new(self.clone())
    }

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl dyn DynEntity {
    /// Returns the concrete entity if it is a `T`.
    pub fn downcast_ref<T: Entity>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Returns the concrete entity mutably if it is a `T`.
    pub fn downcast_mut<T: Entity>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    /// Returns true if the entity is a `T`.
    pub fn is<T: Entity>(&self) -> bool {
        self.as_any().is::<T>()
    }
}
