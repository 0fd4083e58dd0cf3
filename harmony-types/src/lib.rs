//! Core type definitions for Harmony.
//!
//! This crate defines the primitives every other Harmony crate orders and
//! keys things by:
//! - Entity, commit, change and client identifiers (UUID v7)
//! - Hybrid Logical Clock timestamps
//! - A clock that hands out monotonic timestamps for locally authored commits
//!
//! Domain models and changes live in `harmony-model` and in the domain
//! crates that register with it, not here.

mod clock;
mod ids;
mod timestamp;

pub use clock::{HybridClock, ManualTimeSource, SystemTimeSource, TimeSource};
pub use ids::{ChangeId, ClientId, CommitId, EntityId};
pub use timestamp::HybridTimestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
