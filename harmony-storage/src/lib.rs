//! Storage for the Harmony commit engine.
//!
//! Two backends implement the same contracts:
//! - [`MemoryStore`]: ordered in-memory maps, for tests and ephemeral replicas
//! - [`SqliteStore`]: a single SQLite file, decoded through a [`TypeRegistry`](harmony_model::TypeRegistry)
//!
//! [`CommitLog`] is the append-only history, [`SnapshotStore`] the derived
//! state cache, and [`CrdtStore`] adds the one atomic write the engine
//! needs to keep both consistent.

mod error;
mod memory;
mod sqlite;
mod store;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{ClientHeads, CommitLog, CrdtStore, SnapshotStore};
