//! Shared helpers for engine tests: models over the dictionary domain and
//! commit builders with fixed clients and timestamps.

#![allow(dead_code)]

use harmony_engine::{DataModel, EngineConfig, RebuildPolicy};
use harmony_model::{Change, Commit, DeleteChange, DynChange};
use harmony_sample::{
    NewDefinitionChange, NewExampleChange, SetAntonymChange, SetWordTextChange, Word,
};
use harmony_storage::{CrdtStore, MemoryStore};
use harmony_types::{ClientId, EntityId, HybridClock, HybridTimestamp, ManualTimeSource};
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a subscriber honouring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn client(n: u8) -> ClientId {
    ClientId::from_uuid(uuid::Uuid::from_bytes([
        n, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    ]))
}

pub fn config(policy: RebuildPolicy) -> EngineConfig {
    EngineConfig::new(client(1)).with_rebuild_policy(policy)
}

pub fn model_on(store: Arc<dyn CrdtStore>, config: EngineConfig) -> DataModel {
    init_tracing();
    let registry = Arc::new(harmony_sample::registry().unwrap());
    let clock = HybridClock::with_source(Arc::new(ManualTimeSource::new(1_000_000)));
    DataModel::with_clock(store, registry, config, clock).unwrap()
}

pub fn model(policy: RebuildPolicy) -> DataModel {
    model_on(Arc::new(MemoryStore::new()), config(policy))
}

/// A model that replays the whole log after every submission.
pub fn verified_model() -> DataModel {
    model_on(
        Arc::new(MemoryStore::new()),
        config(RebuildPolicy::OnSubmit).with_verification(true),
    )
}

/// Builds a commit by `client(client_n)` at `wall_time`.
pub fn commit(wall_time: u64, client_n: u8, changes: Vec<Arc<dyn DynChange>>) -> Commit {
    Commit::builder(client(client_n), HybridTimestamp::new(wall_time, 0))
        .with_changes(changes)
        .build()
}

pub fn change<C: Change>(change: C) -> Arc<dyn DynChange> {
    Arc::new(change)
}

// ── Dictionary shorthands ────────────────────────────────────────

pub fn set_word(id: EntityId, text: &str) -> Arc<dyn DynChange> {
    change(SetWordTextChange::new(id, text))
}

pub fn new_definition(id: EntityId, word_id: EntityId, text: &str, order: f64) -> Arc<dyn DynChange> {
    change(NewDefinitionChange::new(id, word_id, text, order))
}

pub fn new_example(id: EntityId, definition_id: EntityId, text: &str) -> Arc<dyn DynChange> {
    change(NewExampleChange::new(id, definition_id, text))
}

pub fn set_antonym(id: EntityId, antonym: EntityId) -> Arc<dyn DynChange> {
    change(SetAntonymChange {
        entity_id: id,
        antonym_id: Some(antonym),
    })
}

pub fn delete<T: harmony_model::Entity>(id: EntityId) -> Arc<dyn DynChange> {
    change(DeleteChange::<T>::new(id))
}

pub fn delete_word(id: EntityId) -> Arc<dyn DynChange> {
    delete::<Word>(id)
}

/// Current text of a word, or `None` if missing.
pub async fn word_text(model: &DataModel, id: EntityId) -> Option<String> {
    model
        .get_latest::<Word>(id)
        .await
        .unwrap()
        .map(|word| word.text)
}

/// JSON of every current snapshot, deleted ones included, keyed by id.
pub async fn state_of(model: &DataModel) -> Vec<(EntityId, serde_json::Value, bool)> {
    model
        .current_snapshots(true)
        .await
        .unwrap()
        .into_iter()
        .map(|s| (s.entity_id(), s.entity().to_json().unwrap(), s.entity_is_deleted()))
        .collect()
}
