//! The replication engine's public handle.

use crate::config::{EngineConfig, RebuildPolicy};
use crate::coordinator::{Coordinator, EntityState, SharedRebuild, StaleMark, Work};
use crate::error::{EngineError, EngineResult};
use crate::worker::Replay;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use harmony_model::{
    order, Change, Commit, CommitKey, DynChange, DynEntity, Entity, ObjectSnapshot, Orderable,
    RegistryError, TypeRegistry,
};
use harmony_storage::CrdtStore;
use harmony_types::{ClientId, EntityId, HybridClock};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Counters describing the work the engine has done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Rebuilds that replayed at least the range they claimed.
    pub rebuilds: u64,
    /// Commits re-applied across all rebuilds.
    pub commits_replayed: u64,
    /// Commits newly appended to the log.
    pub commits_added: u64,
}

#[derive(Default)]
struct Stats {
    rebuilds: AtomicU64,
    commits_replayed: AtomicU64,
    commits_added: AtomicU64,
}

struct Inner {
    store: Arc<dyn CrdtStore>,
    registry: Arc<TypeRegistry>,
    config: EngineConfig,
    clock: HybridClock,
    coordinator: Mutex<Coordinator>,
    /// Serializes rebuilds. Reads outside a rebuild's affected set never
    /// take it.
    lane: tokio::sync::Mutex<()>,
    stats: Stats,
}

/// A claimed rebuild, ready to replay.
struct Plan {
    from: CommitKey,
    new_commits: Vec<Commit>,
    affected: BTreeSet<EntityId>,
    /// Mark to put back if the replay fails.
    restore: Option<StaleMark>,
    /// Hold back entities whose changes fail instead of failing the whole
    /// rebuild.
    isolate_failures: bool,
}

/// Releases a rebuild's coordinator entries however the task ends.
struct Release<'a> {
    inner: &'a Inner,
    generation: u64,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        if let Ok(mut coordinator) = self.inner.coordinator.lock() {
            coordinator.release(self.generation);
        }
    }
}

/// Handle to one project's commit log and snapshots.
///
/// Cheap to clone; clones share all state. Submissions and reads may run
/// concurrently from many tasks. Requires a tokio runtime: rebuilds run on
/// spawned tasks so a caller that stops waiting never cancels a rebuild
/// other callers depend on.
#[derive(Clone)]
pub struct DataModel {
    inner: Arc<Inner>,
}

impl DataModel {
    pub fn new(
        store: Arc<dyn CrdtStore>,
        registry: Arc<TypeRegistry>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        Self::with_clock(store, registry, config, HybridClock::new())
    }

    /// Creates a model with a custom clock. The clock is advanced past the
    /// newest stored commit.
    pub fn with_clock(
        store: Arc<dyn CrdtStore>,
        registry: Arc<TypeRegistry>,
        config: EngineConfig,
        clock: HybridClock,
    ) -> EngineResult<Self> {
        if let Some(latest) = store.latest_timestamp()? {
            clock.observe(&latest);
        }
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                registry,
                config,
                clock,
                coordinator: Mutex::new(Coordinator::default()),
                lane: tokio::sync::Mutex::new(()),
                stats: Stats::default(),
            }),
        })
    }

    pub fn client_id(&self) -> ClientId {
        self.inner.config.client_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.inner.registry
    }

    pub fn store(&self) -> &Arc<dyn CrdtStore> {
        &self.inner.store
    }

    pub fn clock(&self) -> &HybridClock {
        &self.inner.clock
    }

    pub fn stats(&self) -> EngineStats {
        let stats = &self.inner.stats;
        EngineStats {
            rebuilds: stats.rebuilds.load(Ordering::Relaxed),
            commits_replayed: stats.commits_replayed.load(Ordering::Relaxed),
            commits_added: stats.commits_added.load(Ordering::Relaxed),
        }
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Submits one commit. Returns 1 if it was new, 0 if already known.
    pub async fn add(&self, commit: Commit) -> EngineResult<usize> {
        self.add_range(vec![commit]).await
    }

    /// Submits commits from any source, in any order.
    ///
    /// Known commits are skipped. Under [`RebuildPolicy::OnSubmit`] the
    /// commits and the snapshots they produce are written together, and a
    /// replay failure leaves the log untouched. Under
    /// [`RebuildPolicy::OnRead`] the commits are appended immediately and
    /// the affected entities become stale. If a change then fails during a
    /// lazy rebuild, only its entity and the entities referencing it are
    /// held back; reads of those report the failure.
    pub async fn add_range(&self, commits: Vec<Commit>) -> EngineResult<usize> {
        let commits = self.prepare(commits)?;
        if commits.is_empty() {
            return Ok(0);
        }

        let added = match self.inner.config.rebuild_policy {
            RebuildPolicy::OnSubmit => {
                let (_, rebuild) = self.spawn_rebuild(Work::Submit(commits));
                rebuild.await.map_err(EngineError::Rebuild)?
            }
            RebuildPolicy::OnRead => self.append_stale(&commits)?,
        };

        if self.inner.config.verify_after_submit {
            self.validate_commits()?;
            self.verify_snapshots().await?;
        }
        Ok(added)
    }

    /// Authors a local commit holding one change.
    pub async fn add_change<C: Change>(&self, change: C) -> EngineResult<Commit> {
        self.add_changes(vec![Arc::new(change) as Arc<dyn DynChange>])
            .await
    }

    /// Authors a local commit stamped with this model's client id and the
    /// next clock value.
    pub async fn add_changes(&self, changes: Vec<Arc<dyn DynChange>>) -> EngineResult<Commit> {
        let commit = Commit::builder(self.client_id(), self.inner.clock.next())
            .with_changes(changes)
            .build();
        self.add(commit.clone()).await?;
        Ok(commit)
    }

    /// Validates a batch and drops commits that are known or repeated.
    fn prepare(&self, commits: Vec<Commit>) -> EngineResult<Vec<Commit>> {
        let submitted = commits.len();
        let mut seen = HashSet::new();
        let mut fresh = Vec::new();

        for commit in commits {
            commit.validate()?;
            for change in commit.change_entities() {
                let change_type = change.change().change_type();
                if !self.inner.registry.has_change_type(&change_type) {
                    warn!(
                        "Rejecting commit {}: unregistered change type {}",
                        commit.id(),
                        change_type
                    );
                    return Err(RegistryError::UnknownChangeType(change_type.into_owned()).into());
                }
            }
            if !seen.insert(commit.id()) || self.inner.store.has_commit(commit.id())? {
                continue;
            }
            fresh.push(commit);
        }

        for commit in &fresh {
            self.inner.clock.observe(&commit.hybrid_date_time());
        }
        if fresh.len() < submitted {
            debug!("Skipped {} known commits", submitted - fresh.len());
        }
        Ok(fresh)
    }

    fn append_stale(&self, commits: &[Commit]) -> EngineResult<usize> {
        let mut coordinator = self.inner.coordinator.lock().unwrap();
        let added = self.inner.store.add_commits(commits)?;
        if let Some(mark) = StaleMark::for_commits(commits) {
            debug!("Marked {} entities stale from {:?}", mark.touched.len(), mark.from);
            coordinator.mark_stale(mark);
        }
        self.inner
            .stats
            .commits_added
            .fetch_add(added as u64, Ordering::Relaxed);
        Ok(added)
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Current snapshot of an entity, rebuilding it first if it is stale.
    pub async fn get_latest_snapshot(
        &self,
        entity_id: EntityId,
    ) -> EngineResult<Option<ObjectSnapshot>> {
        self.ensure_fresh(entity_id).await?;
        Ok(self.inner.store.get_snapshot(entity_id)?)
    }

    /// Current state of an entity, deleted or not. `None` if it was never
    /// created.
    pub async fn get_current_entity(
        &self,
        entity_id: EntityId,
    ) -> EngineResult<Option<Arc<dyn DynEntity>>> {
        Ok(self
            .get_latest_snapshot(entity_id)
            .await?
            .map(|snapshot| snapshot.shared_entity()))
    }

    /// Typed current state. `None` if missing or not a `T`.
    pub async fn get_latest<T: Entity>(&self, entity_id: EntityId) -> EngineResult<Option<T>> {
        Ok(self
            .get_latest_snapshot(entity_id)
            .await?
            .and_then(|snapshot| snapshot.entity_as::<T>().cloned()))
    }

    /// Current snapshot of every entity, ordered by entity id.
    pub async fn current_snapshots(&self, include_deleted: bool) -> EngineResult<Vec<ObjectSnapshot>> {
        self.flush().await?;
        let mut snapshots = self.inner.store.current_snapshots()?;
        if !include_deleted {
            snapshots.retain(|snapshot| !snapshot.entity_is_deleted());
        }
        Ok(snapshots)
    }

    /// Every live entity of type `T`.
    pub async fn latest_objects<T: Entity>(&self) -> EngineResult<Vec<T>> {
        Ok(self
            .current_snapshots(false)
            .await?
            .iter()
            .filter_map(|snapshot| snapshot.entity_as::<T>().cloned())
            .collect())
    }

    /// Every live `T`, in list order.
    pub async fn latest_ordered<T: Orderable>(&self) -> EngineResult<Vec<T>> {
        let mut items = self.latest_objects::<T>().await?;
        order::sort_ordered(&mut items);
        Ok(items)
    }

    /// State of every entity as of a point in time, deleted ones included.
    pub async fn snapshots_at(&self, at: DateTime<Utc>) -> EngineResult<Vec<ObjectSnapshot>> {
        self.flush().await?;
        Ok(self
            .inner
            .store
            .snapshots_as_of(CommitKey::upper_bound_at(at))?)
    }

    /// State of one entity as of a point in time.
    pub async fn get_entity_at<T: Entity>(
        &self,
        entity_id: EntityId,
        at: DateTime<Utc>,
    ) -> EngineResult<Option<T>> {
        self.flush().await?;
        Ok(self
            .inner
            .store
            .snapshot_as_of(entity_id, CommitKey::upper_bound_at(at))?
            .and_then(|snapshot| snapshot.entity_as::<T>().cloned()))
    }

    /// Whether an entity's snapshot reflects every known commit. Held-back
    /// entities stay stale.
    pub fn entity_state(&self, entity_id: EntityId) -> EngineResult<EntityState> {
        let coordinator = self.inner.coordinator.lock().unwrap();
        if coordinator.in_flight.contains_key(&entity_id) {
            return Ok(EntityState::Rebuilding);
        }
        if coordinator.quarantined(entity_id).is_some() {
            return Ok(EntityState::Stale);
        }
        match &coordinator.stale {
            Some(mark) if self.is_affected(mark, entity_id)? => Ok(EntityState::Stale),
            _ => Ok(EntityState::Clean),
        }
    }

    /// Waits until no entity is stale and no rebuild is running. Fails if
    /// entities are still held back after one retry.
    pub async fn flush(&self) -> EngineResult<()> {
        let mut waited = false;
        loop {
            let pending = {
                let mut coordinator = self.inner.coordinator.lock().unwrap();
                if coordinator.stale.is_some() {
                    Some(self.schedule(&mut coordinator))
                } else if let Some(rebuild) = coordinator.any_rebuild() {
                    Some(rebuild)
                } else if let Some(error) = coordinator.quarantine_error() {
                    if waited {
                        return Err(EngineError::Rebuild(error));
                    }
                    Some(self.schedule(&mut coordinator))
                } else {
                    None
                }
            };
            match pending {
                Some(rebuild) => {
                    rebuild.await.map_err(EngineError::Rebuild)?;
                    waited = true;
                }
                None => return Ok(()),
            }
        }
    }

    /// Walks the log in key order and checks every commit's chain link:
    /// its parent hash must be the previous commit's hash and its own hash
    /// must match its content.
    pub fn validate_commits(&self) -> EngineResult<()> {
        let commits = self.inner.store.commits()?;
        let mut parent: Option<&str> = None;
        for commit in &commits {
            if commit.parent_hash() != parent {
                return Err(EngineError::BrokenChain {
                    commit_id: commit.id(),
                    detail: format!(
                        "parent hash {:?} does not match previous commit hash {:?}",
                        commit.parent_hash(),
                        parent
                    ),
                });
            }
            let expected = commit.generate_hash(parent);
            if commit.hash() != expected {
                return Err(EngineError::BrokenChain {
                    commit_id: commit.id(),
                    detail: format!("hash {} does not match content hash {}", commit.hash(), expected),
                });
            }
            parent = Some(commit.hash());
        }
        debug!("Validated hash chain of {} commits", commits.len());
        Ok(())
    }

    /// Replays the whole log from scratch and checks that every stored
    /// current snapshot matches the result.
    pub async fn verify_snapshots(&self) -> EngineResult<()> {
        self.flush().await?;
        let _lane = self.inner.lane.lock().await;
        let store = self.inner.store.as_ref();

        let commits = store.commits()?;
        let mut replay = Replay::genesis(store);
        replay.apply_all(&commits).await?;
        let mut expected = replay.into_current();

        for stored in store.current_snapshots()? {
            let entity_id = stored.entity_id();
            let Some(replayed) = expected.remove(&entity_id) else {
                return Err(EngineError::Divergence {
                    entity_id,
                    detail: "stored but not produced by replay".to_string(),
                });
            };
            if replayed.commit_key() != stored.commit_key() {
                return Err(EngineError::Divergence {
                    entity_id,
                    detail: format!(
                        "stored at commit {}, replay ends at commit {}",
                        stored.commit_id(),
                        replayed.commit_id()
                    ),
                });
            }
            if replayed.entity().to_json()? != stored.entity().to_json()? {
                return Err(EngineError::Divergence {
                    entity_id,
                    detail: "entity state differs".to_string(),
                });
            }
        }

        if let Some(entity_id) = expected.into_keys().min() {
            return Err(EngineError::Divergence {
                entity_id,
                detail: "produced by replay but not stored".to_string(),
            });
        }
        debug!("Verified snapshots against {} commits", commits.len());
        Ok(())
    }

    // ── Rebuild coordination ─────────────────────────────────────

    /// Joins whatever rebuild stands between `entity_id` and a fresh read.
    /// A held-back entity is retried once per read before its failure is
    /// reported.
    async fn ensure_fresh(&self, entity_id: EntityId) -> EngineResult<()> {
        let mut waited = false;
        loop {
            let pending = {
                let mut coordinator = self.inner.coordinator.lock().unwrap();
                if let Some(rebuild) = coordinator.rebuild_for(entity_id) {
                    Some(rebuild)
                } else if let Some(error) = coordinator.quarantined(entity_id) {
                    if waited {
                        return Err(EngineError::Rebuild(error));
                    }
                    Some(self.schedule(&mut coordinator))
                } else {
                    let stale = match &coordinator.stale {
                        Some(mark) => self.is_affected(mark, entity_id)?,
                        None => false,
                    };
                    stale.then(|| self.schedule(&mut coordinator))
                }
            };
            match pending {
                Some(rebuild) => {
                    rebuild.await.map_err(EngineError::Rebuild)?;
                    waited = true;
                }
                None => return Ok(()),
            }
        }
    }

    /// The pending stale rebuild, spawning it if needed.
    fn schedule(&self, coordinator: &mut Coordinator) -> SharedRebuild {
        if let Some(rebuild) = coordinator.scheduled_rebuild() {
            return rebuild;
        }
        let (generation, rebuild) = self.spawn_locked(coordinator, Work::Stale);
        coordinator.scheduled = Some(generation);
        rebuild
    }

    fn spawn_rebuild(&self, work: Work) -> (u64, SharedRebuild) {
        let mut coordinator = self.inner.coordinator.lock().unwrap();
        self.spawn_locked(&mut coordinator, work)
    }

    fn spawn_locked(&self, coordinator: &mut Coordinator, work: Work) -> (u64, SharedRebuild) {
        let generation = coordinator.next_generation();
        let model = self.clone();
        let task = tokio::spawn(async move {
            model.run_rebuild(generation, work).await.map_err(Arc::new)
        });
        let rebuild = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(Arc::new(EngineError::Join(e.to_string()))),
            }
        }
        .boxed()
        .shared();
        coordinator.running.insert(generation, rebuild.clone());
        (generation, rebuild)
    }

    async fn run_rebuild(&self, generation: u64, work: Work) -> EngineResult<usize> {
        let _lane = self.inner.lane.lock().await;
        let _release = Release {
            inner: &self.inner,
            generation,
        };

        let plan = {
            let mut coordinator = self.inner.coordinator.lock().unwrap();
            self.plan(&mut coordinator, generation, work)?
        };
        let Some(plan) = plan else {
            return Ok(0);
        };

        match self.execute(&plan).await {
            Ok(added) => Ok(added),
            Err(e) => {
                warn!(
                    "Rebuild from {:?} failed, keeping previous snapshots: {}",
                    plan.from, e
                );
                if let Some(mark) = plan.restore {
                    self.inner.coordinator.lock().unwrap().mark_stale(mark);
                }
                Err(e)
            }
        }
    }

    /// Decides what a rebuild covers and registers it as in flight.
    fn plan(
        &self,
        coordinator: &mut Coordinator,
        generation: u64,
        work: Work,
    ) -> EngineResult<Option<Plan>> {
        let (mark, new_commits, restore) = match work {
            Work::Submit(commits) => {
                let mut fresh = Vec::with_capacity(commits.len());
                for commit in commits {
                    if !self.inner.store.has_commit(commit.id())? {
                        fresh.push(commit);
                    }
                }
                let Some(mark) = StaleMark::for_commits(&fresh) else {
                    return Ok(None);
                };
                (mark, fresh, None)
            }
            Work::Stale => {
                if coordinator.scheduled == Some(generation) {
                    coordinator.scheduled = None;
                }
                coordinator.requeue_quarantine();
                let Some(mark) = coordinator.stale.clone() else {
                    return Ok(None);
                };
                (mark.clone(), Vec::new(), Some(mark))
            }
        };

        let affected = self.affected_by(&mark)?;
        if restore.is_some() {
            coordinator.stale = None;
        }
        coordinator.claim(generation, &affected);
        Ok(Some(Plan {
            from: mark.from,
            new_commits,
            affected,
            isolate_failures: restore.is_some(),
            restore,
        }))
    }

    async fn execute(&self, plan: &Plan) -> EngineResult<usize> {
        let store = self.inner.store.as_ref();
        let mut commits = store.commits_from(plan.from)?;
        commits.extend(plan.new_commits.iter().cloned());
        commits.sort_by_key(Commit::key);

        let mut blocked = BTreeSet::new();
        let mut failure = None;
        let (replayed, mut snapshots) = loop {
            let mut replay = Replay::from(store, plan.from).with_blocked(blocked.clone());
            match replay.apply_all(&commits).await {
                Ok(()) => {
                    let leaking: Vec<EntityId> = replay
                        .snapshots()
                        .iter()
                        .filter(|snapshot| !blocked.contains(&snapshot.entity_id()))
                        .filter(|snapshot| snapshot.references().iter().any(|id| blocked.contains(id)))
                        .map(ObjectSnapshot::entity_id)
                        .collect();
                    if leaking.is_empty() {
                        break (replay.commits_applied(), replay.into_snapshots());
                    }
                    for entity_id in leaking {
                        blocked.extend(self.dependents(entity_id)?);
                    }
                }
                Err(err) => {
                    let failed = match &err {
                        EngineError::Apply { entity_id, .. } if plan.isolate_failures => *entity_id,
                        _ => return Err(err),
                    };
                    warn!("Holding back {} and its referrers: {}", failed, err);
                    blocked.extend(self.dependents(failed)?);
                    failure.get_or_insert(err);
                }
            }
        };

        // Held-back entities keep every snapshot they had.
        for entity_id in &blocked {
            snapshots.extend(
                store
                    .snapshot_history(*entity_id)?
                    .into_iter()
                    .filter(|snapshot| snapshot.commit_key() >= plan.from),
            );
        }

        let added = store.integrate(&plan.new_commits, Some(plan.from), &snapshots)?;

        let stats = &self.inner.stats;
        stats.rebuilds.fetch_add(1, Ordering::Relaxed);
        stats
            .commits_replayed
            .fetch_add(replayed as u64, Ordering::Relaxed);
        stats.commits_added.fetch_add(added as u64, Ordering::Relaxed);
        info!(
            "Rebuilt {} entities: replayed {} commits, wrote {} snapshots, {} new commits, {} held back",
            plan.affected.len(),
            replayed,
            snapshots.len(),
            added,
            blocked.len()
        );

        if let Some(error) = failure {
            let mark = StaleMark {
                from: plan.from,
                touched: blocked,
            };
            self.inner
                .coordinator
                .lock()
                .unwrap()
                .quarantine(mark, Arc::new(error));
        }
        Ok(added)
    }

    /// `entity_id` and every entity that has ever referenced it,
    /// transitively.
    fn dependents(&self, entity_id: EntityId) -> EngineResult<BTreeSet<EntityId>> {
        let store = self.inner.store.as_ref();
        let mut found = BTreeSet::from([entity_id]);
        let mut worklist = VecDeque::from([entity_id]);
        while let Some(current) = worklist.pop_front() {
            for referrer in store.reference_candidates(current)? {
                if found.insert(referrer) {
                    worklist.push_back(referrer);
                }
            }
        }
        Ok(found)
    }

    /// Entities whose current snapshot a rebuild under `mark` may change:
    /// those touched by the unreflected commits, those with snapshots at
    /// or after the mark, and everything that references them.
    fn affected_by(&self, mark: &StaleMark) -> EngineResult<BTreeSet<EntityId>> {
        let store = self.inner.store.as_ref();
        let mut affected = mark.touched.clone();
        affected.extend(store.entities_with_snapshots_from(mark.from)?);

        let mut worklist: VecDeque<EntityId> = affected.iter().copied().collect();
        while let Some(entity_id) = worklist.pop_front() {
            for referrer in store.referencing(entity_id, None)? {
                if affected.insert(referrer) {
                    worklist.push_back(referrer);
                }
            }
        }
        Ok(affected)
    }

    /// Whether a rebuild under `mark` may change `entity_id`. Walks the
    /// entity's references, the inverse of [`affected_by`](Self::affected_by).
    fn is_affected(&self, mark: &StaleMark, entity_id: EntityId) -> EngineResult<bool> {
        let store = self.inner.store.as_ref();
        let mut seen = HashSet::new();
        let mut stack = vec![entity_id];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            if mark.touched.contains(&current) {
                return Ok(true);
            }
            let Some(snapshot) = store.get_snapshot(current)? else {
                continue;
            };
            if snapshot.commit_key() >= mark.from {
                return Ok(true);
            }
            stack.extend_from_slice(snapshot.references());
        }
        Ok(false)
    }
}

impl std::fmt::Debug for DataModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataModel")
            .field("client_id", &self.inner.config.client_id)
            .field("rebuild_policy", &self.inner.config.rebuild_policy)
            .field("clock", &self.inner.clock)
            .finish()
    }
}
