//! Replication engine for the Harmony commit engine.
//!
//! [`DataModel`] ingests commits in any arrival order and keeps every
//! entity's snapshot equal to a replay of all known commits in total
//! order:
//! - a commit that sorts before already-applied ones triggers a replay from
//!   its position, starting each entity from its last snapshot before it
//! - a deletion cascades through `references()` to a fixed point
//! - at most one rebuild runs at a time; readers of affected entities join
//!   it instead of starting their own
//! - a failed replay writes nothing and reports the failure to every
//!   waiting caller
//!
//! [`Syncable`] exchanges commits between replicas.

mod config;
mod context;
mod coordinator;
mod data_model;
mod error;
mod sync;
mod worker;

pub use config::{EngineConfig, RebuildPolicy};
pub use coordinator::EntityState;
pub use data_model::{DataModel, EngineStats};
pub use error::{EngineError, EngineResult};
pub use sync::{SyncResults, SyncState, Syncable};
