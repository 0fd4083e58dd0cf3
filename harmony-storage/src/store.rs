//! Storage contracts used by the replication engine.
//!
//! The commit log is append-only. Snapshots are a cache derived from it:
//! every `(entity, commit)` snapshot is kept, and the snapshot with the
//! greatest commit key is an entity's current state.

use crate::error::StorageResult;
use harmony_model::{Commit, CommitKey, ObjectSnapshot};
use harmony_types::{ClientId, CommitId, EntityId, HybridTimestamp};
use std::collections::HashMap;

/// Latest known commit timestamp per authoring client.
pub type ClientHeads = HashMap<ClientId, HybridTimestamp>;

/// Append-only, totally ordered commit log.
pub trait CommitLog: Send + Sync {
    fn has_commit(&self, id: CommitId) -> StorageResult<bool>;

    fn get_commit(&self, id: CommitId) -> StorageResult<Option<Commit>>;

    /// Every commit in ascending key order.
    fn commits(&self) -> StorageResult<Vec<Commit>>;

    /// Commits with key `>= from`, ascending.
    fn commits_from(&self, from: CommitKey) -> StorageResult<Vec<Commit>>;

    fn latest_timestamp(&self) -> StorageResult<Option<HybridTimestamp>>;

    fn client_heads(&self) -> StorageResult<ClientHeads>;

    /// Commits a replica with the given heads has not seen, ascending.
    fn commits_unknown_to(&self, heads: &ClientHeads) -> StorageResult<Vec<Commit>> {
        Ok(self
            .commits()?
            .into_iter()
            .filter(|commit| {
                heads
                    .get(&commit.client_id())
                    .is_none_or(|head| commit.hybrid_date_time() > *head)
            })
            .collect())
    }

    /// Appends commits, skipping ids already present, and re-links the
    /// hash chain from the earliest new commit onward. Returns how many
    /// were new.
    fn add_commits(&self, commits: &[Commit]) -> StorageResult<usize>;
}

/// Materialized snapshot cache.
pub trait SnapshotStore: Send + Sync {
    /// Current snapshot of an entity. `None` means it was never created.
    fn get_snapshot(&self, entity_id: EntityId) -> StorageResult<Option<ObjectSnapshot>>;

    /// Latest snapshot with key strictly below `key`.
    fn snapshot_before(
        &self,
        entity_id: EntityId,
        key: CommitKey,
    ) -> StorageResult<Option<ObjectSnapshot>>;

    /// Latest snapshot with key at or below `key`.
    fn snapshot_as_of(
        &self,
        entity_id: EntityId,
        key: CommitKey,
    ) -> StorageResult<Option<ObjectSnapshot>>;

    /// Every snapshot of one entity, ascending.
    fn snapshot_history(&self, entity_id: EntityId) -> StorageResult<Vec<ObjectSnapshot>>;

    /// Current snapshot of every entity, ordered by entity id.
    fn current_snapshots(&self) -> StorageResult<Vec<ObjectSnapshot>>;

    /// Latest snapshot at or below `key` of every entity that existed
    /// then, ordered by entity id.
    fn snapshots_as_of(&self, key: CommitKey) -> StorageResult<Vec<ObjectSnapshot>>;

    /// Entities owning a snapshot with key `>= from`.
    fn entities_with_snapshots_from(&self, from: CommitKey) -> StorageResult<Vec<EntityId>>;

    /// Entities that have ever referenced `target` in some snapshot. A
    /// superset of the current referrers.
    fn reference_candidates(&self, target: EntityId) -> StorageResult<Vec<EntityId>>;

    /// Entities whose snapshot references `target`: the current one, or
    /// the latest one strictly before `before`.
    fn referencing(
        &self,
        target: EntityId,
        before: Option<CommitKey>,
    ) -> StorageResult<Vec<EntityId>> {
        let mut referrers = Vec::new();
        for candidate in self.reference_candidates(target)? {
            let snapshot = match before {
                Some(key) => self.snapshot_before(candidate, key)?,
                None => self.get_snapshot(candidate)?,
            };
            if snapshot.is_some_and(|s| s.references_entity(target)) {
                referrers.push(candidate);
            }
        }
        Ok(referrers)
    }

    /// Inserts or replaces the snapshot for `(entity, commit)`.
    fn save_snapshot(&self, snapshot: &ObjectSnapshot) -> StorageResult<()>;
}

/// Log plus cache, with a single atomic write covering both.
pub trait CrdtStore: CommitLog + SnapshotStore {
    /// In one transaction: appends `commits` (skipping known ids and
    /// re-linking the hash chain as [`CommitLog::add_commits`] does), drops
    /// snapshots with key `>= drop_from` when given, and writes
    /// `snapshots`. Nothing is written if any step fails. Returns how many
    /// commits were new.
    fn integrate(
        &self,
        commits: &[Commit],
        drop_from: Option<CommitKey>,
        snapshots: &[ObjectSnapshot],
    ) -> StorageResult<usize>;
}
