//! Change/commit model for Harmony.
//!
//! Defines the contract between domain crates and the replication engine:
//! - [`Entity`] / [`DynEntity`]: domain objects whose state is derived by replay
//! - [`Change`] / [`DynChange`]: typed, serializable mutations of one entity
//! - [`ChangeContext`]: read-only lookups available while a change applies
//! - [`Commit`] / [`CommitKey`]: immutable change batches and their total order
//! - [`ObjectSnapshot`]: an entity's state after a given commit
//! - [`TypeRegistry`]: discriminator tables for (de)serializing all of the above
//!
//! Built-in changes ([`DeleteChange`], [`SetOrderChange`]) and list-order
//! helpers live in [`changes`] and [`order`].

mod change;
pub mod changes;
mod commit;
mod context;
mod entity;
mod error;
pub mod order;
mod registry;
mod snapshot;

pub use change::{Change, DynChange};
pub use changes::{DeleteChange, SetOrderChange};
pub use commit::{ChangeEntity, Commit, CommitBuilder, CommitKey};
pub use context::ChangeContext;
pub use entity::{DynEntity, Entity};
pub use error::{
    ChangeError, ChangeResult, ModelError, ModelResult, OrderError, RegistryError, RegistryResult,
};
pub use order::Orderable;
pub use registry::{ChangeRecord, CommitRecord, TypeRegistry};
pub use snapshot::ObjectSnapshot;
