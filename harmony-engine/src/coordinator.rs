//! Bookkeeping for rebuilds: which entities are stale, which are being
//! rebuilt, which are quarantined after a failed change, and the shared
//! handles callers wait on.
//!
//! Everything here lives behind one mutex, so checking for an in-flight
//! rebuild and starting one is a single atomic step.

use futures::future::{BoxFuture, Shared};
use harmony_model::{Commit, CommitKey};
use harmony_types::EntityId;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::EngineError;

/// Awaitable handle to a running rebuild. Resolves to the number of newly
/// integrated commits. Cloning it joins the same rebuild.
pub(crate) type SharedRebuild = Shared<BoxFuture<'static, Result<usize, Arc<EngineError>>>>;

/// Freshness of one entity's current snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// The snapshot reflects every known commit.
    Clean,
    /// Commits are known that have not been folded into the snapshot.
    Stale,
    /// A rebuild covering the entity is running.
    Rebuilding,
}

/// Commits in the log that snapshots do not reflect yet.
#[derive(Debug, Clone)]
pub(crate) struct StaleMark {
    /// Smallest key among the unreflected commits.
    pub(crate) from: CommitKey,
    /// Entities the unreflected commits touch.
    pub(crate) touched: BTreeSet<EntityId>,
}

impl StaleMark {
    pub(crate) fn for_commits(commits: &[Commit]) -> Option<Self> {
        let from = commits.iter().map(Commit::key).min()?;
        let touched = commits
            .iter()
            .flat_map(Commit::touched_entities)
            .collect();
        Some(Self { from, touched })
    }

    pub(crate) fn merge(&mut self, other: StaleMark) {
        self.from = self.from.min(other.from);
        self.touched.extend(other.touched);
    }
}

/// Entities a lazy rebuild had to hold back because a change to one of
/// them failed. Their last good snapshots stay in place.
#[derive(Debug)]
pub(crate) struct Quarantine {
    /// Where the failing rebuild started, and the held-back entities.
    pub(crate) mark: StaleMark,
    /// What reads of a held-back entity report.
    pub(crate) error: Arc<EngineError>,
}

/// What a rebuild task folds in once it holds the rebuild lane.
pub(crate) enum Work {
    /// Append these commits and rebuild from the smallest of them.
    Submit(Vec<Commit>),
    /// Rebuild whatever the stale mark covers when the task starts.
    Stale,
}

#[derive(Default)]
pub(crate) struct Coordinator {
    pub(crate) stale: Option<StaleMark>,
    pub(crate) quarantine: Option<Quarantine>,
    /// Entity -> generation of the rebuild covering it.
    pub(crate) in_flight: HashMap<EntityId, u64>,
    /// Handles of rebuilds that are spawned and not yet finished.
    pub(crate) running: HashMap<u64, SharedRebuild>,
    /// Generation of a spawned `Work::Stale` task that has not claimed the
    /// mark yet.
    pub(crate) scheduled: Option<u64>,
    next_generation: u64,
}

impl Coordinator {
    pub(crate) fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// The rebuild currently covering `entity_id`, if any.
    pub(crate) fn rebuild_for(&self, entity_id: EntityId) -> Option<SharedRebuild> {
        self.in_flight
            .get(&entity_id)
            .and_then(|generation| self.running.get(generation))
            .cloned()
    }

    pub(crate) fn scheduled_rebuild(&self) -> Option<SharedRebuild> {
        self.scheduled
            .and_then(|generation| self.running.get(&generation))
            .cloned()
    }

    /// Any unfinished rebuild.
    pub(crate) fn any_rebuild(&self) -> Option<SharedRebuild> {
        self.running.values().next().cloned()
    }

    pub(crate) fn claim(&mut self, generation: u64, affected: &BTreeSet<EntityId>) {
        for entity_id in affected {
            self.in_flight.insert(*entity_id, generation);
        }
    }

    pub(crate) fn release(&mut self, generation: u64) {
        self.in_flight.retain(|_, owner| *owner != generation);
        self.running.remove(&generation);
        if self.scheduled == Some(generation) {
            self.scheduled = None;
        }
    }

    pub(crate) fn mark_stale(&mut self, mark: StaleMark) {
        match &mut self.stale {
            Some(existing) => existing.merge(mark),
            None => self.stale = Some(mark),
        }
    }

    pub(crate) fn quarantine(&mut self, mark: StaleMark, error: Arc<EngineError>) {
        match &mut self.quarantine {
            Some(existing) => {
                existing.mark.merge(mark);
                existing.error = error;
            }
            None => self.quarantine = Some(Quarantine { mark, error }),
        }
    }

    /// The failure a read of `entity_id` reports, if it is held back.
    pub(crate) fn quarantined(&self, entity_id: EntityId) -> Option<Arc<EngineError>> {
        self.quarantine
            .as_ref()
            .filter(|quarantine| quarantine.mark.touched.contains(&entity_id))
            .map(|quarantine| quarantine.error.clone())
    }

    pub(crate) fn quarantine_error(&self) -> Option<Arc<EngineError>> {
        self.quarantine
            .as_ref()
            .map(|quarantine| quarantine.error.clone())
    }

    /// Folds held-back entities into the stale mark so the next rebuild
    /// retries them. A rebuild starting after the failing commit would
    /// otherwise build on their held-back state.
    pub(crate) fn requeue_quarantine(&mut self) {
        if let Some(quarantine) = self.quarantine.take() {
            self.mark_stale(quarantine.mark);
        }
    }
}
