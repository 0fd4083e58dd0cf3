//! Runtime table of change and entity types.
//!
//! Persisted commits and snapshots carry a string discriminator next to
//! their JSON payload. The registry maps discriminators back to concrete
//! types. Unknown discriminators are hard errors: a commit that cannot be
//! decoded must never be replayed with a default handler.

use crate::change::{Change, DynChange};
use crate::commit::{ChangeEntity, Commit};
use crate::entity::{DynEntity, Entity};
use crate::error::{ModelError, RegistryError, RegistryResult};
use harmony_types::{ChangeId, ClientId, CommitId, EntityId, HybridTimestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type ChangeDecoder = fn(Value) -> serde_json::Result<Arc<dyn DynChange>>;
type EntityDecoder = fn(Value) -> serde_json::Result<Box<dyn DynEntity>>;

fn decode_change<C: Change>(value: Value) -> serde_json::Result<Arc<dyn DynChange>> {
    Ok(Arc::new(serde_json::from_value::<C>(value)?))
}

fn decode_entity<T: Entity>(value: Value) -> serde_json::Result<Box<dyn DynEntity>> {
    Ok(Box::new(serde_json::from_value::<T>(value)?))
}

struct Registration<D> {
    type_id: TypeId,
    decode: D,
}

/// Serialized form of one change inside a [`CommitRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: ChangeId,
    pub entity_id: EntityId,
    #[serde(rename = "type")]
    pub change_type: String,
    pub change: Value,
}

/// Serialized form of a commit. This is what crosses replica boundaries.
///
/// The chain link is carried along but a receiving store re-links every
/// commit it inserts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub id: CommitId,
    pub client_id: ClientId,
    pub hybrid_date_time: HybridTimestamp,
    pub change_entities: Vec<ChangeRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Discriminator → decoder tables for changes and entities.
#[derive(Default)]
pub struct TypeRegistry {
    changes: HashMap<String, Registration<ChangeDecoder>>,
    entities: HashMap<&'static str, Registration<EntityDecoder>>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a change type under its discriminator.
    ///
    /// Registering the same type twice is a no-op. A different type
    /// claiming a taken discriminator is an error.
    pub fn register_change<C: Change>(&mut self) -> RegistryResult<&mut Self> {
        let name = C::type_name().into_owned();
        let type_id = TypeId::of::<C>();
        match self.changes.get(&name) {
            Some(existing) if existing.type_id == type_id => {}
            Some(_) => return Err(RegistryError::DuplicateDiscriminator(name)),
            None => {
                self.changes.insert(
                    name,
                    Registration {
                        type_id,
                        decode: decode_change::<C> as ChangeDecoder,
                    },
                );
            }
        }
        Ok(self)
    }

    /// Registers an entity type under `T::TYPE_NAME`. Same rules as
    /// [`register_change`](Self::register_change).
    pub fn register_entity<T: Entity>(&mut self) -> RegistryResult<&mut Self> {
        let type_id = TypeId::of::<T>();
        match self.entities.get(T::TYPE_NAME) {
            Some(existing) if existing.type_id == type_id => {}
            Some(_) => {
                return Err(RegistryError::DuplicateDiscriminator(T::TYPE_NAME.to_string()));
            }
            None => {
                self.entities.insert(
                    T::TYPE_NAME,
                    Registration {
                        type_id,
                        decode: decode_entity::<T> as EntityDecoder,
                    },
                );
            }
        }
        Ok(self)
    }

    pub fn has_change_type(&self, change_type: &str) -> bool {
        self.changes.contains_key(change_type)
    }

    /// Registered change discriminators, sorted.
    pub fn change_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.changes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registered entity discriminators, sorted.
    pub fn entity_types(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.entities.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn deserialize_change(
        &self,
        change_type: &str,
        value: Value,
    ) -> RegistryResult<Arc<dyn DynChange>> {
        let registration = self
            .changes
            .get(change_type)
            .ok_or_else(|| RegistryError::UnknownChangeType(change_type.to_string()))?;
        Ok((registration.decode)(value)?)
    }

    pub fn deserialize_entity(
        &self,
        entity_type: &str,
        value: Value,
    ) -> RegistryResult<Box<dyn DynEntity>> {
        let registration = self
            .entities
            .get(entity_type)
            .ok_or_else(|| RegistryError::UnknownEntityType(entity_type.to_string()))?;
        Ok((registration.decode)(value)?)
    }

    /// Encodes a commit. Fails if a change type is not registered, so a
    /// commit this replica could not decode is never sent anywhere.
    pub fn encode_commit(&self, commit: &Commit) -> RegistryResult<CommitRecord> {
        let change_entities = commit
            .change_entities()
            .iter()
            .map(|change| {
                let change_type = change.change().change_type().into_owned();
                if !self.has_change_type(&change_type) {
                    return Err(RegistryError::UnknownChangeType(change_type));
                }
                Ok(ChangeRecord {
                    id: change.id(),
                    entity_id: change.entity_id(),
                    change_type,
                    change: change.change().to_json()?,
                })
            })
            .collect::<RegistryResult<Vec<_>>>()?;

        Ok(CommitRecord {
            id: commit.id(),
            client_id: commit.client_id(),
            hybrid_date_time: commit.hybrid_date_time(),
            change_entities,
            parent_hash: commit.parent_hash().map(str::to_owned),
            hash: Some(commit.hash().to_owned()),
        })
    }

    /// Decodes and validates a commit. A recorded chain link is kept as
    /// is; without one the commit is linked after `parent_hash`.
    pub fn decode_commit(&self, record: CommitRecord) -> RegistryResult<Commit> {
        let change_entities = record
            .change_entities
            .into_iter()
            .enumerate()
            .map(|(index, change)| {
                let decoded = self.deserialize_change(&change.change_type, change.change)?;
                if decoded.target_id() != change.entity_id {
                    return Err(ModelError::InvalidCommit {
                        commit_id: record.id,
                        reason: format!(
                            "change {} is filed under {} but targets {}",
                            change.id,
                            change.entity_id,
                            decoded.target_id()
                        ),
                    }
                    .into());
                }
                Ok(ChangeEntity::new(change.id, record.id, index as u32, decoded))
            })
            .collect::<RegistryResult<Vec<_>>>()?;

        let mut commit = Commit::from_parts(
            record.id,
            record.client_id,
            record.hybrid_date_time,
            change_entities,
        )?;
        match record.hash {
            Some(hash) => commit = commit.with_chain(record.parent_hash, hash),
            None => commit.set_parent_hash(record.parent_hash.as_deref()),
        }
        Ok(commit)
    }

    /// Encodes commits as a JSON array.
    pub fn commits_to_json(&self, commits: &[Commit]) -> RegistryResult<String> {
        let records = commits
            .iter()
            .map(|commit| self.encode_commit(commit))
            .collect::<RegistryResult<Vec<_>>>()?;
        Ok(serde_json::to_string(&records)?)
    }

    /// Decodes a JSON array produced by [`commits_to_json`](Self::commits_to_json).
    pub fn commits_from_json(&self, json: &str) -> RegistryResult<Vec<Commit>> {
        let records: Vec<CommitRecord> = serde_json::from_str(json)?;
        records
            .into_iter()
            .map(|record| self.decode_commit(record))
            .collect()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("changes", &self.change_types())
            .field("entities", &self.entity_types())
            .finish()
    }
}
