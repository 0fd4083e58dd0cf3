//! Error types for the replication engine.

use harmony_model::{ChangeError, ModelError, RegistryError};
use harmony_storage::StorageError;
use harmony_types::{CommitId, EntityId};
use std::sync::Arc;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while ingesting commits or reading state.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A submitted commit is malformed.
    #[error("invalid commit: {0}")]
    InvalidCommit(#[from] ModelError),

    /// A change failed while being replayed.
    #[error("change in commit {commit_id} failed on entity {entity_id}: {source}")]
    Apply {
        entity_id: EntityId,
        commit_id: CommitId,
        #[source]
        source: ChangeError,
    },

    /// Stored snapshots disagree with a replay of the full log.
    #[error("snapshot of {entity_id} diverges from replay: {detail}")]
    Divergence { entity_id: EntityId, detail: String },

    /// A stored commit's chain link does not match the log before it.
    #[error("hash chain broken at commit {commit_id}: {detail}")]
    BrokenChain { commit_id: CommitId, detail: String },

    /// A shared rebuild failed. Every caller that waited on it gets the
    /// same underlying error.
    #[error("rebuild failed: {0}")]
    Rebuild(Arc<EngineError>),

    /// The rebuild task panicked or was cancelled by the runtime.
    #[error("rebuild task failed: {0}")]
    Join(String),
}

impl EngineError {
    /// The underlying error, looking through [`EngineError::Rebuild`].
    pub fn root(&self) -> &EngineError {
        match self {
            Self::Rebuild(inner) => inner.root(),
            other => other,
        }
    }
}
