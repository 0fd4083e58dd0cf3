//! Changes for the dictionary domain.
//!
//! `New*` changes build their entity from scratch and do nothing to an
//! entity that already exists: the creation ordered first wins.
//! `SetWordTextChange` is an upsert.

use crate::models::{Definition, Example, PartOfSpeech, Word};
use async_trait::async_trait;
use harmony_model::{Change, ChangeContext, ChangeError, ChangeResult, Commit};
use harmony_types::EntityId;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

// ── Word ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWordChange {
    pub entity_id: EntityId,
    pub text: String,
}

impl NewWordChange {
    pub fn new(entity_id: EntityId, text: impl Into<String>) -> Self {
        Self {
            entity_id,
            text: text.into(),
        }
    }
}

#[async_trait]
impl Change for NewWordChange {
    type Target = Word;
    const CREATES_ENTITY: bool = true;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("new_word")
    }

    fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    async fn new_entity(&self, _commit: &Commit, _ctx: &dyn ChangeContext) -> ChangeResult<Word> {
        Ok(Word::new(self.entity_id, self.text.clone()))
    }

    async fn apply_change(&self, _entity: &mut Word, _ctx: &dyn ChangeContext) -> ChangeResult<()> {
        Ok(())
    }
}

/// Replaces a word's text, creating the word if it does not exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetWordTextChange {
    pub entity_id: EntityId,
    pub text: String,
}

impl SetWordTextChange {
    pub fn new(entity_id: EntityId, text: impl Into<String>) -> Self {
        Self {
            entity_id,
            text: text.into(),
        }
    }
}

#[async_trait]
impl Change for SetWordTextChange {
    type Target = Word;
    const CREATES_ENTITY: bool = true;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("set_word_text")
    }

    fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    async fn new_entity(&self, _commit: &Commit, _ctx: &dyn ChangeContext) -> ChangeResult<Word> {
        Ok(Word::new(self.entity_id, self.text.clone()))
    }

    async fn apply_change(&self, entity: &mut Word, _ctx: &dyn ChangeContext) -> ChangeResult<()> {
        entity.text = self.text.clone();
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetWordNoteChange {
    pub entity_id: EntityId,
    pub note: Option<String>,
}

#[async_trait]
impl Change for SetWordNoteChange {
    type Target = Word;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("set_word_note")
    }

    fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    async fn apply_change(&self, entity: &mut Word, _ctx: &dyn ChangeContext) -> ChangeResult<()> {
        entity.note = self.note.clone();
        Ok(())
    }
}

/// Points a word at its antonym. A deleted antonym is not linked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetAntonymChange {
    pub entity_id: EntityId,
    pub antonym_id: Option<EntityId>,
}

#[async_trait]
impl Change for SetAntonymChange {
    type Target = Word;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("set_antonym")
    }

    fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    async fn apply_change(&self, entity: &mut Word, ctx: &dyn ChangeContext) -> ChangeResult<()> {
        entity.antonym_id = match self.antonym_id {
            Some(antonym) if ctx.is_object_deleted(antonym).await? => None,
            other => other,
        };
        Ok(())
    }
}

/// Adds a tag unless the word already carries it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTagChange {
    pub entity_id: EntityId,
    pub tag: String,
}

#[async_trait]
impl Change for AddTagChange {
    type Target = Word;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("add_word_tag")
    }

    fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    async fn apply_change(&self, entity: &mut Word, _ctx: &dyn ChangeContext) -> ChangeResult<()> {
        if !entity.tags.contains(&self.tag) {
            entity.tags.push(self.tag.clone());
        }
        Ok(())
    }
}

// ── Definition ───────────────────────────────────────────────────

/// Creates a definition under a word. If the word is already deleted the
/// definition is created deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDefinitionChange {
    pub entity_id: EntityId,
    pub word_id: EntityId,
    pub text: String,
    pub part_of_speech: PartOfSpeech,
    pub order: f64,
}

impl NewDefinitionChange {
    pub fn new(entity_id: EntityId, word_id: EntityId, text: impl Into<String>, order: f64) -> Self {
        Self {
            entity_id,
            word_id,
            text: text.into(),
            part_of_speech: PartOfSpeech::default(),
            order,
        }
    }

    #[must_use]
    pub fn with_part_of_speech(mut self, part_of_speech: PartOfSpeech) -> Self {
        self.part_of_speech = part_of_speech;
        self
    }
}

#[async_trait]
impl Change for NewDefinitionChange {
    type Target = Definition;
    const CREATES_ENTITY: bool = true;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("new_definition")
    }

    fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    async fn new_entity(
        &self,
        commit: &Commit,
        ctx: &dyn ChangeContext,
    ) -> ChangeResult<Definition> {
        let deleted_at = if ctx.is_object_deleted(self.word_id).await? {
            Some(commit.date_time())
        } else {
            None
        };
        Ok(Definition {
            id: self.entity_id,
            word_id: self.word_id,
            text: self.text.clone(),
            part_of_speech: self.part_of_speech,
            order: self.order,
            deleted_at,
        })
    }

    async fn apply_change(
        &self,
        _entity: &mut Definition,
        _ctx: &dyn ChangeContext,
    ) -> ChangeResult<()> {
        Ok(())
    }
}

/// Replaces a definition's text. Empty text is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetDefinitionTextChange {
    pub entity_id: EntityId,
    pub text: String,
}

#[async_trait]
impl Change for SetDefinitionTextChange {
    type Target = Definition;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("set_definition_text")
    }

    fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    async fn apply_change(
        &self,
        entity: &mut Definition,
        _ctx: &dyn ChangeContext,
    ) -> ChangeResult<()> {
        if self.text.trim().is_empty() {
            return Err(ChangeError::Domain(format!(
                "definition {} cannot have empty text",
                self.entity_id
            )));
        }
        entity.text = self.text.clone();
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetPartOfSpeechChange {
    pub entity_id: EntityId,
    pub part_of_speech: PartOfSpeech,
}

#[async_trait]
impl Change for SetPartOfSpeechChange {
    type Target = Definition;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("set_part_of_speech")
    }

    fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    async fn apply_change(
        &self,
        entity: &mut Definition,
        _ctx: &dyn ChangeContext,
    ) -> ChangeResult<()> {
        entity.part_of_speech = self.part_of_speech;
        Ok(())
    }
}

// ── Example ──────────────────────────────────────────────────────

/// Creates an example under a definition; born deleted if the definition
/// already is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewExampleChange {
    pub entity_id: EntityId,
    pub definition_id: EntityId,
    pub text: String,
}

impl NewExampleChange {
    pub fn new(entity_id: EntityId, definition_id: EntityId, text: impl Into<String>) -> Self {
        Self {
            entity_id,
            definition_id,
            text: text.into(),
        }
    }
}

#[async_trait]
impl Change for NewExampleChange {
    type Target = Example;
    const CREATES_ENTITY: bool = true;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("new_example")
    }

    fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    async fn new_entity(&self, commit: &Commit, ctx: &dyn ChangeContext) -> ChangeResult<Example> {
        let deleted_at = if ctx.is_object_deleted(self.definition_id).await? {
            Some(commit.date_time())
        } else {
            None
        };
        Ok(Example {
            id: self.entity_id,
            definition_id: self.definition_id,
            text: self.text.clone(),
            deleted_at,
        })
    }

    async fn apply_change(&self, _entity: &mut Example, _ctx: &dyn ChangeContext) -> ChangeResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetExampleTextChange {
    pub entity_id: EntityId,
    pub text: String,
}

#[async_trait]
impl Change for SetExampleTextChange {
    type Target = Example;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("set_example_text")
    }

    fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    async fn apply_change(&self, entity: &mut Example, _ctx: &dyn ChangeContext) -> ChangeResult<()> {
        entity.text = self.text.clone();
        Ok(())
    }
}
