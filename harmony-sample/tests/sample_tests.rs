use async_trait::async_trait;
use harmony_model::{
    ChangeContext, ChangeError, ChangeResult, Commit, DeleteChange, DynChange, DynEntity, Entity,
    ObjectSnapshot, SetOrderChange,
};
use harmony_sample::{
    AddTagChange, Definition, Example, NewDefinitionChange, NewExampleChange, NewWordChange, PartOfSpeech,
    SetAntonymChange, SetDefinitionTextChange, SetWordTextChange, Word, registry,
};
use harmony_types::{ClientId, EntityId, HybridTimestamp};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::Arc;

struct Lookup {
    commit: Commit,
    snapshots: HashMap<EntityId, ObjectSnapshot>,
}

impl Lookup {
    fn new() -> Self {
        Self {
            commit: Commit::builder(ClientId::new(), HybridTimestamp::new(1_000, 0)).build(),
            snapshots: HashMap::new(),
        }
    }

    fn with<T: Entity>(mut self, entity: T) -> Self {
        let snapshot = ObjectSnapshot::new(
            Arc::new(entity) as Arc<dyn DynEntity>,
            self.commit.key(),
            true,
        );
        self.snapshots.insert(snapshot.entity_id(), snapshot);
        self
    }
}

#[async_trait]
impl ChangeContext for Lookup {
    fn commit(&self) -> &Commit {
        &self.commit
    }

    async fn get_snapshot(&self, entity_id: EntityId) -> ChangeResult<Option<ObjectSnapshot>> {
        Ok(self.snapshots.get(&entity_id).cloned())
    }
}

fn deleted_word(id: EntityId) -> Word {
    let mut word = Word::new(id, "gone");
    word.deleted_at = Some(chrono::Utc::now());
    word
}

fn definition(word_id: EntityId) -> Definition {
    Definition {
        id: EntityId::new(),
        word_id,
        text: "to move quickly".into(),
        part_of_speech: PartOfSpeech::Verb,
        order: 1.0,
        deleted_at: None,
    }
}

// ── Registry ─────────────────────────────────────────────────────

#[test]
fn registry_knows_every_sample_type() {
    let registry = registry().unwrap();
    assert_eq!(registry.entity_types(), vec!["definition", "example", "word"]);
    for change_type in [
        "new_word",
        "set_word_text",
        "set_word_note",
        "set_antonym",
        "add_word_tag",
        "new_definition",
        "set_definition_text",
        "set_part_of_speech",
        "set_order:definition",
        "new_example",
        "set_example_text",
        "delete:word",
        "delete:definition",
        "delete:example",
    ] {
        assert!(registry.has_change_type(change_type), "{change_type} missing");
    }
}

#[test]
fn sample_commit_survives_json_encoding() {
    let registry = registry().unwrap();
    let word = EntityId::new();
    let commit = Commit::builder(ClientId::new(), HybridTimestamp::new(5, 0))
        .with_change(SetWordTextChange::new(word, "run"))
        .with_change(SetOrderChange::<Definition>::to(EntityId::new(), 2.5).unwrap())
        .with_change(DeleteChange::<Word>::new(word))
        .build();

    let json = registry.commits_to_json(std::slice::from_ref(&commit)).unwrap();
    let decoded = registry.commits_from_json(&json).unwrap();

    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].key(), commit.key());
    let types: Vec<_> = decoded[0]
        .change_entities()
        .iter()
        .map(|c| c.change().change_type().into_owned())
        .collect();
    assert_eq!(types, vec!["set_word_text", "set_order:definition", "delete:word"]);
}

// ── References ───────────────────────────────────────────────────

#[test]
fn word_clears_deleted_antonym() {
    let antonym = EntityId::new();
    let mut word = Word::new(EntityId::new(), "hot");
    word.antonym_id = Some(antonym);
    let commit = Lookup::new().commit;

    assert_eq!(word.references(), vec![antonym]);
    word.remove_reference(antonym, &commit);

    assert_eq!(word.antonym_id, None);
    assert!(word.deleted_at.is_none());
}

#[test]
fn definition_dies_with_its_word() {
    let word_id = EntityId::new();
    let mut def = definition(word_id);
    let commit = Lookup::new().commit;

    def.remove_reference(EntityId::new(), &commit);
    assert!(def.deleted_at.is_none());

    def.remove_reference(word_id, &commit);
    assert_eq!(def.deleted_at, Some(commit.date_time()));
}

#[test]
fn example_dies_with_its_definition() {
    let definition_id = EntityId::new();
    let mut example = Example {
        id: EntityId::new(),
        definition_id,
        text: "she ran home".into(),
        deleted_at: None,
    };
    let commit = Lookup::new().commit;

    example.remove_reference(definition_id, &commit);
    assert_eq!(example.deleted_at, Some(commit.date_time()));
}

// ── Changes ──────────────────────────────────────────────────────

#[tokio::test]
async fn new_definition_under_live_word_is_live() {
    let word = Word::new(EntityId::new(), "run");
    let ctx = Lookup::new().with(word.clone());
    let change = NewDefinitionChange::new(EntityId::new(), word.id, "to move fast", 1.0)
        .with_part_of_speech(PartOfSpeech::Verb);

    let entity = change.create_entity(&ctx.commit, &ctx).await.unwrap();
    let def = entity.as_any().downcast_ref::<Definition>().unwrap();

    assert!(def.deleted_at.is_none());
    assert_eq!(def.part_of_speech, PartOfSpeech::Verb);
    assert_eq!(def.word_id, word.id);
}

#[tokio::test]
async fn new_definition_under_deleted_word_is_born_deleted() {
    let word_id = EntityId::new();
    let ctx = Lookup::new().with(deleted_word(word_id));
    let change = NewDefinitionChange::new(EntityId::new(), word_id, "orphan", 1.0);

    let entity = change.create_entity(&ctx.commit, &ctx).await.unwrap();
    assert_eq!(entity.deletion_time(), Some(ctx.commit.date_time()));
}

#[tokio::test]
async fn new_example_under_deleted_definition_is_born_deleted() {
    let mut def = definition(EntityId::new());
    def.deleted_at = Some(chrono::Utc::now());
    let ctx = Lookup::new().with(def.clone());
    let change = NewExampleChange::new(EntityId::new(), def.id, "too late");

    let entity = change.create_entity(&ctx.commit, &ctx).await.unwrap();
    assert!(entity.is_tombstoned());
}

#[tokio::test]
async fn new_example_under_missing_definition_is_live() {
    let ctx = Lookup::new();
    let change = NewExampleChange::new(EntityId::new(), EntityId::new(), "early");

    let entity = change.create_entity(&ctx.commit, &ctx).await.unwrap();
    assert!(!entity.is_tombstoned());
}

#[tokio::test]
async fn antonym_is_not_linked_to_deleted_word() {
    let gone = EntityId::new();
    let ctx = Lookup::new().with(deleted_word(gone));
    let mut word: Box<dyn DynEntity> = Box::new(Word::new(EntityId::new(), "cold"));

    let change = SetAntonymChange {
        entity_id: word.entity_id(),
        antonym_id: Some(gone),
    };
    change.apply(word.as_mut(), &ctx).await.unwrap();

    assert!(word.reference_ids().is_empty());
}

#[tokio::test]
async fn tags_are_not_duplicated() {
    let ctx = Lookup::new();
    let mut word = Word::new(EntityId::new(), "run");
    let change = AddTagChange {
        entity_id: word.id,
        tag: "verb".into(),
    };

    change.apply(&mut word, &ctx).await.unwrap();
    change.apply(&mut word, &ctx).await.unwrap();

    assert_eq!(word.tags, vec!["verb".to_string()]);
}

#[tokio::test]
async fn empty_definition_text_is_rejected() {
    let ctx = Lookup::new();
    let mut def = definition(EntityId::new());
    let change = SetDefinitionTextChange {
        entity_id: def.id,
        text: "   ".into(),
    };

    let err = change.apply(&mut def, &ctx).await.unwrap_err();
    assert!(matches!(err, ChangeError::Domain(_)));
    assert_eq!(def.text, "to move quickly");
}

#[tokio::test]
async fn word_change_leaves_definition_alone() {
    let ctx = Lookup::new();
    let mut def = definition(EntityId::new());
    let before = def.clone();

    SetWordTextChange::new(def.id, "mismatch")
        .apply(&mut def, &ctx)
        .await
        .unwrap();

    assert_eq!(def, before);
}

#[tokio::test]
async fn second_creation_leaves_existing_word_alone() {
    let ctx = Lookup::new();
    let mut word = Word::new(EntityId::new(), "jog");

    NewWordChange::new(word.id, "run")
        .apply(&mut word, &ctx)
        .await
        .unwrap();
    assert_eq!(word.text, "jog");

    SetWordTextChange::new(word.id, "run")
        .apply(&mut word, &ctx)
        .await
        .unwrap();
    assert_eq!(word.text, "run");
}
