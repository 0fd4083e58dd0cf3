//! Replay of a commit range into snapshots.
//!
//! A [`Replay`] starts from the state just before its base key: entities
//! it has not touched yet are read from the store as of the latest
//! snapshot strictly before the base. Everything it produces is held in a
//! pending map until the caller writes it out in one transaction, so a
//! failed replay leaves no trace.
//!
//! Entities in the blocked set are left exactly as stored: their changes
//! are held back and cascades skip them. The engine uses this to keep
//! replaying the rest of a range after one entity's change fails.

use crate::context::ReplayContext;
use crate::error::{EngineError, EngineResult};
use harmony_model::{Commit, CommitKey, DynEntity, ObjectSnapshot};
use harmony_storage::{CrdtStore, StorageResult};
use harmony_types::{CommitId, EntityId};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

pub(crate) struct Replay<'s> {
    store: &'s dyn CrdtStore,
    /// `None` replays from genesis and never reads stored snapshots.
    base: Option<CommitKey>,
    pending: HashMap<EntityId, ObjectSnapshot>,
    output: Vec<ObjectSnapshot>,
    blocked: BTreeSet<EntityId>,
    commits_applied: usize,
}

impl<'s> Replay<'s> {
    pub(crate) fn from(store: &'s dyn CrdtStore, base: CommitKey) -> Self {
        Self::new(store, Some(base))
    }

    pub(crate) fn genesis(store: &'s dyn CrdtStore) -> Self {
        Self::new(store, None)
    }

    fn new(store: &'s dyn CrdtStore, base: Option<CommitKey>) -> Self {
        Self {
            store,
            base,
            pending: HashMap::new(),
            output: Vec::new(),
            blocked: BTreeSet::new(),
            commits_applied: 0,
        }
    }

    /// Holds back every change to the given entities.
    pub(crate) fn with_blocked(mut self, blocked: BTreeSet<EntityId>) -> Self {
        self.blocked = blocked;
        self
    }

    /// State of an entity as of the replay position.
    pub(crate) fn lookup(&self, entity_id: EntityId) -> StorageResult<Option<ObjectSnapshot>> {
        if let Some(snapshot) = self.pending.get(&entity_id) {
            return Ok(Some(snapshot.clone()));
        }
        match self.base {
            Some(base) => self.store.snapshot_before(entity_id, base),
            None => Ok(None),
        }
    }

    /// Applies commits, which must be in ascending key order.
    pub(crate) async fn apply_all(&mut self, commits: &[Commit]) -> EngineResult<()> {
        for commit in commits {
            self.apply_commit(commit).await?;
        }
        Ok(())
    }

    pub(crate) async fn apply_commit(&mut self, commit: &Commit) -> EngineResult<()> {
        let mut dirty: Vec<EntityId> = Vec::new();
        let mut cascaded: HashSet<(EntityId, CommitId)> = HashSet::new();

        for change_entity in commit.change_entities() {
            let entity_id = change_entity.entity_id();
            let change = change_entity.change();
            if self.blocked.contains(&entity_id) {
                trace!("Holding back change to blocked entity {} in commit {}", entity_id, commit.id());
                continue;
            }
            let prior = self.lookup(entity_id)?;
            let was_deleted = prior.as_ref().is_some_and(ObjectSnapshot::entity_is_deleted);

            let entity = {
                let ctx = ReplayContext::new(commit, &*self);
                let mut entity: Box<dyn DynEntity> = match &prior {
                    Some(snapshot) if snapshot.type_name() != change.target_type() => {
                        trace!(
                            "Skipping {} in commit {}: {} is a {}",
                            change.change_type(),
                            commit.id(),
                            entity_id,
                            snapshot.type_name()
                        );
                        continue;
                    }
                    Some(snapshot) => snapshot.entity().boxed_copy(),
                    None if change.creates_entity() => change
                        .create_entity(commit, &ctx)
                        .await
                        .map_err(|source| apply_error(entity_id, commit, source))?,
                    None => {
                        debug!(
                            "Skipping {} in commit {}: entity {} does not exist",
                            change.change_type(),
                            commit.id(),
                            entity_id
                        );
                        continue;
                    }
                };
                change
                    .apply(entity.as_mut(), &ctx)
                    .await
                    .map_err(|source| apply_error(entity_id, commit, source))?;
                entity
            };

            let deleted_now = entity.is_tombstoned();
            self.stage(entity, commit.key(), prior.as_ref(), &mut dirty);

            if deleted_now && !was_deleted {
                self.cascade(entity_id, commit, &mut cascaded, &mut dirty)?;
            }
        }

        for entity_id in dirty {
            if let Some(snapshot) = self.pending.get(&entity_id) {
                self.output.push(snapshot.clone());
            }
        }
        self.commits_applied += 1;
        trace!("Replayed commit {}", commit.id());
        Ok(())
    }

    /// Propagates a deletion to every entity that references `deleted`,
    /// until no further entity flips to deleted.
    fn cascade(
        &mut self,
        deleted: EntityId,
        commit: &Commit,
        visited: &mut HashSet<(EntityId, CommitId)>,
        dirty: &mut Vec<EntityId>,
    ) -> EngineResult<()> {
        let mut worklist = VecDeque::from([deleted]);

        while let Some(target) = worklist.pop_front() {
            if !visited.insert((target, commit.id())) {
                continue;
            }
            for referrer in self.referrers(target)? {
                if self.blocked.contains(&referrer) {
                    continue;
                }
                let Some(current) = self.lookup(referrer)? else {
                    continue;
                };
                if !current.references_entity(target) {
                    continue;
                }
                let was_deleted = current.entity_is_deleted();
                let mut entity = current.entity().boxed_copy();
                entity.drop_reference(target, commit);
                let deleted_now = entity.is_tombstoned();
                debug!(
                    "Removed reference {} -> {} in commit {}",
                    referrer,
                    target,
                    commit.id()
                );
                self.stage(entity, commit.key(), Some(&current), dirty);

                if deleted_now && !was_deleted {
                    worklist.push_back(referrer);
                }
            }
        }
        Ok(())
    }

    /// Entities whose state at the replay position references `target`.
    fn referrers(&self, target: EntityId) -> StorageResult<BTreeSet<EntityId>> {
        let mut referrers: BTreeSet<EntityId> = self
            .pending
            .iter()
            .filter(|(_, snapshot)| snapshot.references_entity(target))
            .map(|(id, _)| *id)
            .collect();
        if let Some(base) = self.base {
            referrers.extend(
                self.store
                    .referencing(target, Some(base))?
                    .into_iter()
                    .filter(|id| !self.pending.contains_key(id)),
            );
        }
        Ok(referrers)
    }

    fn stage(
        &mut self,
        entity: Box<dyn DynEntity>,
        key: CommitKey,
        prior: Option<&ObjectSnapshot>,
        dirty: &mut Vec<EntityId>,
    ) {
        // Created in this very commit if there was no prior state, or the
        // prior state is this commit's own root snapshot.
        let is_root = match prior {
            None => true,
            Some(snapshot) => snapshot.commit_key() == key && snapshot.is_root(),
        };
        let entity: Arc<dyn DynEntity> = Arc::from(entity);
        let snapshot = ObjectSnapshot::new(entity, key, is_root);
        let entity_id = snapshot.entity_id();
        if !dirty.contains(&entity_id) {
            dirty.push(entity_id);
        }
        self.pending.insert(entity_id, snapshot);
    }

    pub(crate) fn commits_applied(&self) -> usize {
        self.commits_applied
    }

    pub(crate) fn snapshots(&self) -> &[ObjectSnapshot] {
        &self.output
    }

    /// Every snapshot produced, one per `(entity, commit)`, in replay order.
    pub(crate) fn into_snapshots(self) -> Vec<ObjectSnapshot> {
        self.output
    }

    /// Final state of every entity the replay touched.
    pub(crate) fn into_current(self) -> HashMap<EntityId, ObjectSnapshot> {
        self.pending
    }
}

fn apply_error(
    entity_id: EntityId,
    commit: &Commit,
    source: harmony_model::ChangeError,
) -> EngineError {
    EngineError::Apply {
        entity_id,
        commit_id: commit.id(),
        source,
    }
}
