//! Shared helpers for storage tests: a one-entity domain and commit
//! builders with deterministic ordering.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harmony_model::{
    Change, ChangeContext, ChangeResult, Commit, CommitKey, DeleteChange, DynEntity, Entity,
    ObjectSnapshot, TypeRegistry,
};
use harmony_types::{ClientId, EntityId, HybridTimestamp};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: EntityId,
    pub body: String,
    pub parent_id: Option<EntityId>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Note {
    pub fn new(id: EntityId, body: &str) -> Self {
        Self {
            id,
            body: body.to_string(),
            parent_id: None,
            deleted_at: None,
        }
    }

    pub fn child_of(mut self, parent: EntityId) -> Self {
        self.parent_id = Some(parent);
        self
    }
}

impl Entity for Note {
    const TYPE_NAME: &'static str = "note";

    fn id(&self) -> EntityId {
        self.id
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    fn set_deleted_at(&mut self, at: Option<DateTime<Utc>>) {
        self.deleted_at = at;
    }

    fn references(&self) -> Vec<EntityId> {
        self.parent_id.into_iter().collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetBodyChange {
    pub entity_id: EntityId,
    pub body: String,
}

#[async_trait]
impl Change for SetBodyChange {
    type Target = Note;
    const CREATES_ENTITY: bool = true;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("set_note_body")
    }

    fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    async fn new_entity(&self, _commit: &Commit, _ctx: &dyn ChangeContext) -> ChangeResult<Note> {
        Ok(Note::new(self.entity_id, &self.body))
    }

    async fn apply_change(&self, entity: &mut Note, _ctx: &dyn ChangeContext) -> ChangeResult<()> {
        entity.body = self.body.clone();
        Ok(())
    }
}

pub fn registry() -> Arc<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    registry
        .register_entity::<Note>()
        .unwrap()
        .register_change::<SetBodyChange>()
        .unwrap()
        .register_change::<DeleteChange<Note>>()
        .unwrap();
    Arc::new(registry)
}

pub fn client(n: u8) -> ClientId {
    ClientId::from_uuid(uuid::Uuid::from_bytes([
        n, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    ]))
}

pub fn set_body(wall_time: u64, client_n: u8, entity_id: EntityId, body: &str) -> Commit {
    Commit::builder(client(client_n), HybridTimestamp::new(wall_time, 0))
        .with_change(SetBodyChange {
            entity_id,
            body: body.to_string(),
        })
        .build()
}

pub fn snapshot(note: Note, key: CommitKey, is_root: bool) -> ObjectSnapshot {
    ObjectSnapshot::new(Arc::new(note) as Arc<dyn DynEntity>, key, is_root)
}

pub fn bodies(snapshots: &[ObjectSnapshot]) -> Vec<String> {
    snapshots
        .iter()
        .map(|s| s.entity_as::<Note>().map(|n| n.body.clone()).unwrap_or_default())
        .collect()
}
