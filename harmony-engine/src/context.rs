use crate::worker::Replay;
use async_trait::async_trait;
use harmony_model::{ChangeContext, ChangeError, ChangeResult, Commit, ObjectSnapshot};
use harmony_types::EntityId;

/// Lookups for changes applied during a replay. Sees the replay's own
/// in-progress state layered over the stored snapshots it started from.
pub(crate) struct ReplayContext<'r, 's> {
    commit: &'r Commit,
    replay: &'r Replay<'s>,
}

impl<'r, 's> ReplayContext<'r, 's> {
    pub(crate) fn new(commit: &'r Commit, replay: &'r Replay<'s>) -> Self {
        Self { commit, replay }
    }
}

#[async_trait]
impl ChangeContext for ReplayContext<'_, '_> {
    fn commit(&self) -> &Commit {
        self.commit
    }

    async fn get_snapshot(&self, entity_id: EntityId) -> ChangeResult<Option<ObjectSnapshot>> {
        self.replay
            .lookup(entity_id)
            .map_err(|e| ChangeError::Lookup {
                entity_id,
                reason: e.to_string(),
            })
    }
}
