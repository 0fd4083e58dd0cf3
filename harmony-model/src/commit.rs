//! Commits: immutable, totally ordered batches of changes.

use crate::change::{Change, DynChange};
use crate::error::{ModelError, ModelResult};
use chrono::{DateTime, Utc};
use harmony_types::{ChangeId, ClientId, CommitId, EntityId, HybridTimestamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;

/// Position of a commit in the global total order.
///
/// Ordered lexicographically by hybrid timestamp, then authoring client,
/// then commit id, so two distinct commits never compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitKey {
    pub timestamp: HybridTimestamp,
    pub client_id: ClientId,
    pub commit_id: CommitId,
}

impl CommitKey {
    #[must_use]
    pub const fn new(timestamp: HybridTimestamp, client_id: ClientId, commit_id: CommitId) -> Self {
        Self {
            timestamp,
            client_id,
            commit_id,
        }
    }

    /// The greatest key whose wall-clock time is at or before `at`.
    /// Used to turn a point in time into an inclusive upper bound.
    #[must_use]
    pub fn upper_bound_at(at: DateTime<Utc>) -> Self {
        let wall = at.timestamp_millis().max(0) as u64;
        Self::new(
            HybridTimestamp::new(wall, u32::MAX),
            ClientId::max(),
            CommitId::max(),
        )
    }
}

/// One change inside a commit, with the ids that locate it.
#[derive(Debug, Clone)]
pub struct ChangeEntity {
    id: ChangeId,
    commit_id: CommitId,
    entity_id: EntityId,
    index: u32,
    change: Arc<dyn DynChange>,
}

impl ChangeEntity {
    #[must_use]
    pub fn new(id: ChangeId, commit_id: CommitId, index: u32, change: Arc<dyn DynChange>) -> Self {
        Self {
            id,
            commit_id,
            entity_id: change.target_id(),
            index,
            change,
        }
    }

    pub fn id(&self) -> ChangeId {
        self.id
    }

    pub fn commit_id(&self) -> CommitId {
        self.commit_id
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    /// Position of the change inside its commit.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn change(&self) -> &dyn DynChange {
        self.change.as_ref()
    }
}

/// An immutable, ordered batch of changes authored by one client.
///
/// Changes apply in list order. Once built a commit's content never
/// changes. Its place in the log is recorded by a SHA-256 hash chain: each
/// stored commit carries the hash of the commit before it in key order,
/// and the store re-links the chain when history is inserted out of order.
#[derive(Debug, Clone)]
pub struct Commit {
    id: CommitId,
    client_id: ClientId,
    hybrid_date_time: HybridTimestamp,
    change_entities: Vec<ChangeEntity>,
    hash: String,
    parent_hash: Option<String>,
}

impl Commit {
    /// Starts building a commit authored by `client_id` at `timestamp`.
    #[must_use]
    pub fn builder(client_id: ClientId, timestamp: HybridTimestamp) -> CommitBuilder {
        CommitBuilder {
            id: CommitId::new(),
            client_id,
            timestamp,
            changes: Vec::new(),
        }
    }

    /// Reassembles a commit from decoded parts and validates it.
    pub fn from_parts(
        id: CommitId,
        client_id: ClientId,
        hybrid_date_time: HybridTimestamp,
        change_entities: Vec<ChangeEntity>,
    ) -> ModelResult<Self> {
        let commit = Self::unchained(id, client_id, hybrid_date_time, change_entities);
        commit.validate()?;
        Ok(commit)
    }

    fn unchained(
        id: CommitId,
        client_id: ClientId,
        hybrid_date_time: HybridTimestamp,
        change_entities: Vec<ChangeEntity>,
    ) -> Self {
        let mut commit = Self {
            id,
            client_id,
            hybrid_date_time,
            change_entities,
            hash: String::new(),
            parent_hash: None,
        };
        commit.hash = commit.generate_hash(None);
        commit
    }

    /// Keeps a chain link exactly as stored, so a tampered link stays
    /// detectable.
    pub(crate) fn with_chain(mut self, parent_hash: Option<String>, hash: String) -> Self {
        self.parent_hash = parent_hash;
        self.hash = hash;
        self
    }

    pub fn id(&self) -> CommitId {
        self.id
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn hybrid_date_time(&self) -> HybridTimestamp {
        self.hybrid_date_time
    }

    /// Wall-clock time of the commit. Informational, and the time stamped
    /// onto tombstones.
    pub fn date_time(&self) -> DateTime<Utc> {
        self.hybrid_date_time.to_datetime()
    }

    pub fn change_entities(&self) -> &[ChangeEntity] {
        &self.change_entities
    }

    pub fn key(&self) -> CommitKey {
        CommitKey::new(self.hybrid_date_time, self.client_id, self.id)
    }

    /// Hex SHA-256 linking this commit to its parent.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Hash of the preceding commit in the log. `None` for the first
    /// commit and for commits not yet stored.
    pub fn parent_hash(&self) -> Option<&str> {
        self.parent_hash.as_deref()
    }

    /// Links the commit after `parent_hash` and recomputes its own hash.
    pub fn set_parent_hash(&mut self, parent_hash: Option<&str>) {
        self.hash = self.generate_hash(parent_hash);
        self.parent_hash = parent_hash.map(str::to_owned);
    }

    /// The hash this commit has when linked after `parent_hash`.
    ///
    /// Covers the parent hash, the commit id, author and timestamp, and the
    /// id, target and type of every change in order.
    pub fn generate_hash(&self, parent_hash: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        match parent_hash {
            Some(parent) => {
                hasher.update([1u8]);
                hasher.update(parent.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(self.id.as_uuid().as_bytes());
        hasher.update(self.client_id.as_uuid().as_bytes());
        hasher.update(self.hybrid_date_time.wall_time().to_le_bytes());
        hasher.update(self.hybrid_date_time.logical().to_le_bytes());
        for change in &self.change_entities {
            let change_type = change.change.change_type();
            hasher.update(change.id.as_uuid().as_bytes());
            hasher.update(change.entity_id.as_uuid().as_bytes());
            hasher.update((change_type.len() as u64).to_le_bytes());
            hasher.update(change_type.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Distinct entity ids targeted by this commit, in first-touch order.
    pub fn touched_entities(&self) -> Vec<EntityId> {
        let mut seen = HashSet::new();
        self.change_entities
            .iter()
            .map(ChangeEntity::entity_id)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Checks the commit is well formed.
    ///
    /// Empty commits are valid. The wall time must map to a date-time.
    /// Every change must belong to this commit, carry a unique id, target a
    /// non-nil entity that matches its payload, and sit at its list
    /// position.
    pub fn validate(&self) -> ModelResult<()> {
        let invalid = |reason: String| ModelError::InvalidCommit {
            commit_id: self.id,
            reason,
        };

        if self.id.is_nil() {
            return Err(invalid("nil commit id".into()));
        }
        if !self.hybrid_date_time.is_representable() {
            return Err(invalid(format!(
                "wall time {} is out of range",
                self.hybrid_date_time.wall_time()
            )));
        }

        let mut change_ids = HashSet::new();
        for (position, change) in self.change_entities.iter().enumerate() {
            if change.commit_id != self.id {
                return Err(invalid(format!(
                    "change {} belongs to commit {}",
                    change.id, change.commit_id
                )));
            }
            if !change_ids.insert(change.id) {
                return Err(invalid(format!("duplicate change id {}", change.id)));
            }
            if change.entity_id.is_nil() {
                return Err(invalid(format!("change {} targets the nil entity", change.id)));
            }
            if change.entity_id != change.change.target_id() {
                return Err(invalid(format!(
                    "change {} is filed under {} but targets {}",
                    change.id,
                    change.entity_id,
                    change.change.target_id()
                )));
            }
            if change.index as usize != position {
                return Err(invalid(format!(
                    "change {} has index {} at position {position}",
                    change.id, change.index
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`Commit`].
#[derive(Debug)]
pub struct CommitBuilder {
    id: CommitId,
    client_id: ClientId,
    timestamp: HybridTimestamp,
    changes: Vec<Arc<dyn DynChange>>,
}

impl CommitBuilder {
    /// Overrides the generated commit id.
    #[must_use]
    pub fn with_id(mut self, id: CommitId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_change<C: Change>(mut self, change: C) -> Self {
        self.changes.push(Arc::new(change));
        self
    }

    #[must_use]
    pub fn with_dyn_change(mut self, change: Arc<dyn DynChange>) -> Self {
        self.changes.push(change);
        self
    }

    #[must_use]
    pub fn with_changes(mut self, changes: impl IntoIterator<Item = Arc<dyn DynChange>>) -> Self {
        self.changes.extend(changes);
        self
    }

    pub fn build(self) -> Commit {
        let id = self.id;
        let change_entities = self
            .changes
            .into_iter()
            .enumerate()
            .map(|(index, change)| ChangeEntity::new(ChangeId::new(), id, index as u32, change))
            .collect();
        Commit::unchained(id, self.client_id, self.timestamp, change_entities)
    }
}
