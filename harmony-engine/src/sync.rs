//! Commit exchange between replicas.
//!
//! Each side describes what it has as the newest commit timestamp per
//! author. The other side answers with every commit newer than that.
//! Commits cross the boundary in their registry encoding, exactly as they
//! would over a wire.

use crate::data_model::DataModel;
use crate::error::EngineResult;
use async_trait::async_trait;
use harmony_model::Commit;
use harmony_storage::ClientHeads;
use serde::{Deserialize, Serialize};
use tracing::info;

/// What a replica has seen: newest commit timestamp per author.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub client_heads: ClientHeads,
}

/// Commits exchanged by one sync round.
#[derive(Debug, Clone, Default)]
pub struct SyncResults {
    /// Received from the remote.
    pub missing_from_local: Vec<Commit>,
    /// Sent to the remote.
    pub missing_from_remote: Vec<Commit>,
}

impl SyncResults {
    /// True if both sides already had everything.
    pub fn is_empty(&self) -> bool {
        self.missing_from_local.is_empty() && self.missing_from_remote.is_empty()
    }
}

/// A replica that can take part in a sync.
#[async_trait]
pub trait Syncable: Send + Sync {
    async fn sync_state(&self) -> EngineResult<SyncState>;

    /// Commits the holder of `remote` has not seen, ascending.
    async fn changes_since(&self, remote: &SyncState) -> EngineResult<Vec<Commit>>;

    async fn add_range_from_sync(&self, commits: Vec<Commit>) -> EngineResult<usize>;
}

#[async_trait]
impl Syncable for DataModel {
    async fn sync_state(&self) -> EngineResult<SyncState> {
        Ok(SyncState {
            client_heads: self.store().client_heads()?,
        })
    }

    async fn changes_since(&self, remote: &SyncState) -> EngineResult<Vec<Commit>> {
        Ok(self.store().commits_unknown_to(&remote.client_heads)?)
    }

    async fn add_range_from_sync(&self, commits: Vec<Commit>) -> EngineResult<usize> {
        self.add_range(commits).await
    }
}

impl DataModel {
    /// Exchanges missing commits with `remote` in both directions.
    pub async fn sync_with(&self, remote: &dyn Syncable) -> EngineResult<SyncResults> {
        let local_state = self.sync_state().await?;
        let remote_state = remote.sync_state().await?;

        let to_remote = self.over_wire(self.changes_since(&remote_state).await?)?;
        let from_remote = self.over_wire(remote.changes_since(&local_state).await?)?;

        if !to_remote.is_empty() {
            remote.add_range_from_sync(to_remote.clone()).await?;
        }
        if !from_remote.is_empty() {
            self.add_range_from_sync(from_remote.clone()).await?;
        }

        info!(
            "Synced: received {} commits, sent {}",
            from_remote.len(),
            to_remote.len()
        );
        Ok(SyncResults {
            missing_from_local: from_remote,
            missing_from_remote: to_remote,
        })
    }

    /// Hub-and-spoke sync: collects from every remote, then sends each
    /// remote what it still lacks.
    pub async fn sync_many(&self, remotes: &[&dyn Syncable]) -> EngineResult<SyncResults> {
        let mut results = SyncResults::default();
        for remote in remotes {
            let round = self.sync_with(*remote).await?;
            results.missing_from_local.extend(round.missing_from_local);
            results.missing_from_remote.extend(round.missing_from_remote);
        }
        // Earlier remotes have not seen what later ones sent.
        if let Some((_, earlier)) = remotes.split_last() {
            for remote in earlier {
                let round = self.sync_with(*remote).await?;
                results.missing_from_remote.extend(round.missing_from_remote);
            }
        }
        Ok(results)
    }

    fn over_wire(&self, commits: Vec<Commit>) -> EngineResult<Vec<Commit>> {
        if commits.is_empty() {
            return Ok(commits);
        }
        let json = self.registry().commits_to_json(&commits)?;
        Ok(self.registry().commits_from_json(&json)?)
    }
}
