use chrono::{DateTime, Utc};
use harmony_model::{Commit, Entity, Orderable};
use harmony_types::EntityId;
use serde::{Deserialize, Serialize};

/// A headword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub id: EntityId,
    pub text: String,
    pub note: Option<String>,
    pub antonym_id: Option<EntityId>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Word {
    pub fn new(id: EntityId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            note: None,
            antonym_id: None,
            tags: Vec::new(),
            deleted_at: None,
        }
    }
}

impl Entity for Word {
    const TYPE_NAME: &'static str = "word";

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
        self.antonym_id.into_iter().collect()
    }

    fn remove_reference(&mut self, id: EntityId, _commit: &Commit) {
        if self.antonym_id == Some(id) {
            self.antonym_id = None;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartOfSpeech {
    #[default]
    Noun,
    Verb,
    Adjective,
    Adverb,
    Other,
}

/// One sense of a word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub id: EntityId,
    pub word_id: EntityId,
    pub text: String,
    pub part_of_speech: PartOfSpeech,
    pub order: f64,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Entity for Definition {
    const TYPE_NAME: &'static str = "definition";

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
        vec![self.word_id]
    }

    // A definition cannot outlive its word.
    fn remove_reference(&mut self, id: EntityId, commit: &Commit) {
        if self.word_id == id && self.deleted_at.is_none() {
            self.deleted_at = Some(commit.date_time());
        }
    }
}

impl Orderable for Definition {
    fn order(&self) -> f64 {
        self.order
    }

    fn set_order(&mut self, order: f64) {
        self.order = order;
    }
}

/// A usage sentence for a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub id: EntityId,
    pub definition_id: EntityId,
    pub text: String,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Entity for Example {
    const TYPE_NAME: &'static str = "example";

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
        vec![self.definition_id]
    }

    fn remove_reference(&mut self, id: EntityId, commit: &Commit) {
        if self.definition_id == id && self.deleted_at.is_none() {
            self.deleted_at = Some(commit.date_time());
        }
    }
}
