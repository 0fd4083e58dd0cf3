//! Error types for the model layer.

use harmony_types::{CommitId, EntityId};
use thiserror::Error;

/// Result type for commit construction and validation.
pub type ModelResult<T> = Result<T, ModelError>;

/// Result type returned by change application.
pub type ChangeResult<T> = Result<T, ChangeError>;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Data-integrity errors on commits.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The commit is structurally invalid and must be rejected.
    #[error("invalid commit {commit_id}: {reason}")]
    InvalidCommit { commit_id: CommitId, reason: String },
}

/// Errors raised while a change builds or mutates an entity.
#[derive(Debug, Error)]
pub enum ChangeError {
    /// `new_entity` was called on a change that never creates entities.
    #[error("change type {change_type} cannot create entities")]
    NewEntityUnsupported { change_type: String },

    /// A context lookup failed (storage, decoding).
    #[error("lookup of {entity_id} failed: {reason}")]
    Lookup { entity_id: EntityId, reason: String },

    /// The change rejected the entity's current state.
    #[error("{0}")]
    Domain(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the type registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No change type is registered under this discriminator.
    #[error("unknown change type: {0}")]
    UnknownChangeType(String),

    /// No entity type is registered under this discriminator.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Two different types claimed the same discriminator.
    #[error("discriminator {0} is already registered to another type")]
    DuplicateDiscriminator(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A decoded commit failed validation.
    #[error(transparent)]
    InvalidCommit(#[from] ModelError),
}

/// Errors from order-key arithmetic.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrderError {
    /// No representable order value sits strictly between the neighbours;
    /// the list needs renormalizing.
    #[error("no order value left between {before} and {after}")]
    Exhausted { before: f64, after: f64 },

    /// The neighbours are not in ascending order.
    #[error("neighbours out of order: {before} is not below {after}")]
    OutOfOrder { before: f64, after: f64 },

    /// Order keys must be finite; NaN and infinities do not survive JSON.
    #[error("order key {0} is not finite")]
    NotFinite(f64),
}
