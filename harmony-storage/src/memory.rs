//! In-memory store. Used by tests and by short-lived replicas that never
//! need to survive a restart.

use crate::error::StorageResult;
use crate::store::{ClientHeads, CommitLog, CrdtStore, SnapshotStore};
use harmony_model::{Commit, CommitKey, ObjectSnapshot};
use harmony_types::{CommitId, EntityId, HybridTimestamp};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

#[derive(Default)]
struct Inner {
    commits: BTreeMap<CommitKey, Commit>,
    commit_keys: HashMap<CommitId, CommitKey>,
    snapshots: BTreeMap<EntityId, BTreeMap<CommitKey, ObjectSnapshot>>,
    referenced_by: HashMap<EntityId, BTreeSet<EntityId>>,
}

impl Inner {
    fn insert_commits(&mut self, commits: &[Commit]) -> usize {
        let mut added = 0;
        let mut first: Option<CommitKey> = None;
        for commit in commits {
            if self.commit_keys.contains_key(&commit.id()) {
                continue;
            }
            let key = commit.key();
            self.commit_keys.insert(commit.id(), key);
            self.commits.insert(key, commit.clone());
            first = Some(first.map_or(key, |first| first.min(key)));
            added += 1;
        }
        if let Some(from) = first {
            self.rechain_from(from);
        }
        added
    }

    /// Re-links every commit at or after `from` to its predecessor.
    fn rechain_from(&mut self, from: CommitKey) {
        let mut parent = self
            .commits
            .range(..from)
            .next_back()
            .map(|(_, commit)| commit.hash().to_owned());
        for (_, commit) in self.commits.range_mut(from..) {
            commit.set_parent_hash(parent.as_deref());
            parent = Some(commit.hash().to_owned());
        }
    }

    fn insert_snapshot(&mut self, snapshot: &ObjectSnapshot) {
        for referenced in snapshot.references() {
            self.referenced_by
                .entry(*referenced)
                .or_default()
                .insert(snapshot.entity_id());
        }
        self.snapshots
            .entry(snapshot.entity_id())
            .or_default()
            .insert(snapshot.commit_key(), snapshot.clone());
    }

    fn drop_snapshots_from(&mut self, from: CommitKey) {
        self.snapshots.retain(|_, history| {
            history.retain(|key, _| *key < from);
            !history.is_empty()
        });
    }
}

/// Store that keeps everything in ordered maps behind a lock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommitLog for MemoryStore {
    fn has_commit(&self, id: CommitId) -> StorageResult<bool> {
        Ok(self.inner.read().unwrap().commit_keys.contains_key(&id))
    }

    fn get_commit(&self, id: CommitId) -> StorageResult<Option<Commit>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .commit_keys
            .get(&id)
            .and_then(|key| inner.commits.get(key))
            .cloned())
    }

    fn commits(&self) -> StorageResult<Vec<Commit>> {
        Ok(self.inner.read().unwrap().commits.values().cloned().collect())
    }

    fn commits_from(&self, from: CommitKey) -> StorageResult<Vec<Commit>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.commits.range(from..).map(|(_, c)| c.clone()).collect())
    }

    fn latest_timestamp(&self) -> StorageResult<Option<HybridTimestamp>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.commits.last_key_value().map(|(key, _)| key.timestamp))
    }

    fn client_heads(&self) -> StorageResult<ClientHeads> {
        let inner = self.inner.read().unwrap();
        let mut heads = ClientHeads::new();
        for key in inner.commits.keys() {
            heads.insert(key.client_id, key.timestamp);
        }
        Ok(heads)
    }

    fn add_commits(&self, commits: &[Commit]) -> StorageResult<usize> {
        Ok(self.inner.write().unwrap().insert_commits(commits))
    }
}

impl SnapshotStore for MemoryStore {
    fn get_snapshot(&self, entity_id: EntityId) -> StorageResult<Option<ObjectSnapshot>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .snapshots
            .get(&entity_id)
            .and_then(|history| history.last_key_value())
            .map(|(_, s)| s.clone()))
    }

    fn snapshot_before(
        &self,
        entity_id: EntityId,
        key: CommitKey,
    ) -> StorageResult<Option<ObjectSnapshot>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .snapshots
            .get(&entity_id)
            .and_then(|history| history.range(..key).next_back())
            .map(|(_, s)| s.clone()))
    }

    fn snapshot_as_of(
        &self,
        entity_id: EntityId,
        key: CommitKey,
    ) -> StorageResult<Option<ObjectSnapshot>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .snapshots
            .get(&entity_id)
            .and_then(|history| history.range(..=key).next_back())
            .map(|(_, s)| s.clone()))
    }

    fn snapshot_history(&self, entity_id: EntityId) -> StorageResult<Vec<ObjectSnapshot>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .snapshots
            .get(&entity_id)
            .map(|history| history.values().cloned().collect())
            .unwrap_or_default())
    }

    fn current_snapshots(&self) -> StorageResult<Vec<ObjectSnapshot>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .snapshots
            .values()
            .filter_map(|history| history.last_key_value().map(|(_, s)| s.clone()))
            .collect())
    }

    fn snapshots_as_of(&self, key: CommitKey) -> StorageResult<Vec<ObjectSnapshot>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .snapshots
            .values()
            .filter_map(|history| history.range(..=key).next_back().map(|(_, s)| s.clone()))
            .collect())
    }

    fn entities_with_snapshots_from(&self, from: CommitKey) -> StorageResult<Vec<EntityId>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .snapshots
            .iter()
            .filter(|(_, history)| history.range(from..).next().is_some())
            .map(|(id, _)| *id)
            .collect())
    }

    fn reference_candidates(&self, target: EntityId) -> StorageResult<Vec<EntityId>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .referenced_by
            .get(&target)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }

    fn save_snapshot(&self, snapshot: &ObjectSnapshot) -> StorageResult<()> {
        self.inner.write().unwrap().insert_snapshot(snapshot);
        Ok(())
    }
}

impl CrdtStore for MemoryStore {
    fn integrate(
        &self,
        commits: &[Commit],
        drop_from: Option<CommitKey>,
        snapshots: &[ObjectSnapshot],
    ) -> StorageResult<usize> {
        let mut inner = self.inner.write().unwrap();
        let added = inner.insert_commits(commits);
        if let Some(from) = drop_from {
            inner.drop_snapshots_from(from);
        }
        for snapshot in snapshots {
            inner.insert_snapshot(snapshot);
        }
        Ok(added)
    }
}
