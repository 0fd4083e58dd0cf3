//! Shared test helpers for model tests: a tiny task-list domain and a
//! fixed lookup context.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harmony_model::{
    Change, ChangeContext, ChangeError, ChangeResult, Commit, CommitKey, DynEntity, Entity,
    ObjectSnapshot, Orderable,
};
use harmony_types::{ClientId, EntityId, HybridTimestamp};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: EntityId,
    pub title: String,
    pub order: f64,
    pub list_id: Option<EntityId>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: EntityId, title: &str, order: f64) -> Self {
        Self {
            id,
            title: title.to_string(),
            order,
            list_id: None,
            deleted_at: None,
        }
    }
}

impl Entity for Task {
    const TYPE_NAME: &'static str = "task";

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
        self.list_id.into_iter().collect()
    }

    fn remove_reference(&mut self, id: EntityId, _commit: &Commit) {
        if self.list_id == Some(id) {
            self.list_id = None;
        }
    }
}

impl Orderable for Task {
    fn order(&self) -> f64 {
        self.order
    }

    fn set_order(&mut self, order: f64) {
        self.order = order;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub id: EntityId,
    pub name: String,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Entity for Label {
    const TYPE_NAME: &'static str = "label";

    fn id(&self) -> EntityId {
        self.id
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    fn set_deleted_at(&mut self, at: Option<DateTime<Utc>>) {
        self.deleted_at = at;
    }
}

/// Creates a task, or renames it if it exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetTitleChange {
    pub entity_id: EntityId,
    pub title: String,
}

#[async_trait]
impl Change for SetTitleChange {
    type Target = Task;
    const CREATES_ENTITY: bool = true;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("set_task_title")
    }

    fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    async fn new_entity(&self, _commit: &Commit, _ctx: &dyn ChangeContext) -> ChangeResult<Task> {
        Ok(Task::new(self.entity_id, &self.title, 0.0))
    }

    async fn apply_change(&self, entity: &mut Task, _ctx: &dyn ChangeContext) -> ChangeResult<()> {
        entity.title = self.title.clone();
        Ok(())
    }
}

/// Appends to the title; refuses to touch a deleted task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendTitleChange {
    pub entity_id: EntityId,
    pub suffix: String,
}

#[async_trait]
impl Change for AppendTitleChange {
    type Target = Task;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("append_task_title")
    }

    fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    async fn apply_change(&self, entity: &mut Task, _ctx: &dyn ChangeContext) -> ChangeResult<()> {
        if entity.deleted_at.is_some() {
            return Err(ChangeError::Domain("task is deleted".into()));
        }
        entity.title.push_str(&self.suffix);
        Ok(())
    }
}

/// Context backed by a fixed snapshot map.
pub struct StaticContext {
    pub commit: Commit,
    pub snapshots: HashMap<EntityId, ObjectSnapshot>,
}

impl StaticContext {
    pub fn new(commit: Commit) -> Self {
        Self {
            commit,
            snapshots: HashMap::new(),
        }
    }

    pub fn with_entity<T: Entity>(mut self, entity: T) -> Self {
        let key = self.commit.key();
        let snapshot = ObjectSnapshot::new(Arc::new(entity) as Arc<dyn DynEntity>, key, true);
        self.snapshots.insert(snapshot.entity_id(), snapshot);
        self
    }
}

#[async_trait]
impl ChangeContext for StaticContext {
    fn commit(&self) -> &Commit {
        &self.commit
    }

    async fn get_snapshot(&self, entity_id: EntityId) -> ChangeResult<Option<ObjectSnapshot>> {
        Ok(self.snapshots.get(&entity_id).cloned())
    }
}

/// Deterministic client ids for reproducibility.
pub fn client(n: u8) -> ClientId {
    ClientId::from_uuid(uuid::Uuid::from_bytes([
        n, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    ]))
}

pub fn empty_commit(wall_time: u64) -> Commit {
    Commit::builder(client(1), HybridTimestamp::new(wall_time, 0)).build()
}

pub fn key_at(wall_time: u64, client_n: u8) -> CommitKey {
    let commit = Commit::builder(client(client_n), HybridTimestamp::new(wall_time, 0)).build();
    commit.key()
}
