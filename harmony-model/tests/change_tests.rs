mod common;

use common::{client, empty_commit, AppendTitleChange, Label, SetTitleChange, StaticContext, Task};
use harmony_model::{
    Change, ChangeContext, ChangeError, Commit, DeleteChange, DynChange, DynEntity, Entity,
    ObjectSnapshot,
};
use harmony_types::{EntityId, HybridTimestamp};
use pretty_assertions::assert_eq;
use std::sync::Arc;

// ── Dispatch ─────────────────────────────────────────────────────

#[tokio::test]
async fn apply_mutates_matching_entity() {
    let id = EntityId::new();
    let ctx = StaticContext::new(empty_commit(10));
    let change: Arc<dyn DynChange> = Arc::new(AppendTitleChange {
        entity_id: id,
        suffix: " world".into(),
    });

    let mut entity: Box<dyn DynEntity> = Box::new(Task::new(id, "hello", 0.0));
    change.apply(entity.as_mut(), &ctx).await.unwrap();

    let task = entity.as_any().downcast_ref::<Task>().unwrap();
    assert_eq!(task.title, "hello world");
}

#[tokio::test]
async fn apply_to_other_variant_is_a_silent_no_op() {
    let id = EntityId::new();
    let ctx = StaticContext::new(empty_commit(10));
    let change: Arc<dyn DynChange> = Arc::new(AppendTitleChange {
        entity_id: id,
        suffix: "!".into(),
    });
    let label = Label {
        id,
        name: "urgent".into(),
        deleted_at: None,
    };

    let mut entity: Box<dyn DynEntity> = Box::new(label.clone());
    change.apply(entity.as_mut(), &ctx).await.unwrap();

    assert_eq!(entity.as_any().downcast_ref::<Label>(), Some(&label));
}

#[tokio::test]
async fn dyn_metadata_reflects_typed_change() {
    let id = EntityId::new();
    let change: Arc<dyn DynChange> = Arc::new(SetTitleChange {
        entity_id: id,
        title: "x".into(),
    });
    assert_eq!(change.change_type(), "set_task_title");
    assert_eq!(change.target_id(), id);
    assert_eq!(change.target_type(), "task");
    assert!(change.creates_entity());

    let edit: Arc<dyn DynChange> = Arc::new(AppendTitleChange {
        entity_id: id,
        suffix: "x".into(),
    });
    assert!(!edit.creates_entity());
}

// ── Creation ─────────────────────────────────────────────────────

#[tokio::test]
async fn creating_change_builds_entity() {
    let id = EntityId::new();
    let commit = empty_commit(10);
    let ctx = StaticContext::new(commit.clone());
    let change = SetTitleChange {
        entity_id: id,
        title: "new".into(),
    };

    let entity = change.create_entity(&commit, &ctx).await.unwrap();
    assert_eq!(entity.entity_id(), id);
    assert_eq!(entity.entity_type(), Task::TYPE_NAME);
}

#[tokio::test]
async fn non_creating_change_refuses_new_entity() {
    let commit = empty_commit(10);
    let ctx = StaticContext::new(commit.clone());
    let change = AppendTitleChange {
        entity_id: EntityId::new(),
        suffix: "x".into(),
    };

    let err = change.new_entity(&commit, &ctx).await.unwrap_err();
    assert!(matches!(
        err,
        ChangeError::NewEntityUnsupported { ref change_type } if change_type == "append_task_title"
    ));
}

#[tokio::test]
async fn domain_error_surfaces_from_apply() {
    let id = EntityId::new();
    let ctx = StaticContext::new(empty_commit(10));
    let mut task = Task::new(id, "gone", 0.0);
    task.deleted_at = Some(ctx.commit().date_time());

    let change = AppendTitleChange {
        entity_id: id,
        suffix: "!".into(),
    };
    let err = change.apply_change(&mut task, &ctx).await.unwrap_err();
    assert!(matches!(err, ChangeError::Domain(_)));
}

// ── DeleteChange ─────────────────────────────────────────────────

#[tokio::test]
async fn delete_stamps_commit_time() {
    let id = EntityId::new();
    let commit = empty_commit(1_000);
    let ctx = StaticContext::new(commit.clone());
    let mut task = Task::new(id, "t", 0.0);

    DeleteChange::<Task>::new(id)
        .apply_change(&mut task, &ctx)
        .await
        .unwrap();
    assert_eq!(task.deleted_at, Some(commit.date_time()));
}

#[tokio::test]
async fn second_delete_keeps_first_tombstone() {
    let id = EntityId::new();
    let first = Commit::builder(client(1), HybridTimestamp::new(1_000, 0)).build();
    let second = Commit::builder(client(1), HybridTimestamp::new(2_000, 0)).build();
    let mut task = Task::new(id, "t", 0.0);

    let change = DeleteChange::<Task>::new(id);
    change
        .apply_change(&mut task, &StaticContext::new(first.clone()))
        .await
        .unwrap();
    change
        .apply_change(&mut task, &StaticContext::new(second))
        .await
        .unwrap();
    assert_eq!(task.deleted_at, Some(first.date_time()));
}

#[test]
fn delete_discriminator_is_per_type() {
    assert_eq!(DeleteChange::<Task>::type_name(), "delete:task");
    assert_eq!(DeleteChange::<Label>::type_name(), "delete:label");
}

// ── Context ──────────────────────────────────────────────────────

#[tokio::test]
async fn context_lookups_report_missing_and_deleted() {
    let live = EntityId::new();
    let gone = EntityId::new();
    let mut deleted = Task::new(gone, "gone", 0.0);
    deleted.deleted_at = Some(chrono::Utc::now());

    let ctx = StaticContext::new(empty_commit(10))
        .with_entity(Task::new(live, "live", 0.0))
        .with_entity(deleted);
    let ctx: &dyn ChangeContext = &ctx;

    assert!(!ctx.is_object_deleted(live).await.unwrap());
    assert!(ctx.is_object_deleted(gone).await.unwrap());
    assert!(!ctx.is_object_deleted(EntityId::new()).await.unwrap());
    assert_eq!(
        ctx.get_entity::<Task>(live).await.unwrap().map(|t| t.title),
        Some("live".to_string())
    );
    assert!(ctx.get_entity::<Label>(live).await.unwrap().is_none());
}

// ── Snapshots ────────────────────────────────────────────────────

#[test]
fn snapshot_captures_deletion_and_references() {
    let list = EntityId::new();
    let mut task = Task::new(EntityId::new(), "t", 0.0);
    task.list_id = Some(list);
    task.deleted_at = Some(chrono::Utc::now());
    let commit = empty_commit(5);

    let snapshot = ObjectSnapshot::new(Arc::new(task.clone()), commit.key(), false);
    assert!(snapshot.entity_is_deleted());
    assert_eq!(snapshot.references(), &[list]);
    assert!(snapshot.references_entity(list));
    assert_eq!(snapshot.commit_id(), commit.id());
    assert_eq!(snapshot.type_name(), "task");
    assert_eq!(snapshot.entity_as::<Task>(), Some(&task));
    assert!(snapshot.entity_as::<Label>().is_none());
    assert!(!snapshot.is_root());
}

#[test]
fn boxed_copy_is_independent() {
    let task = Task::new(EntityId::new(), "original", 0.0);
    let original: Box<dyn DynEntity> = Box::new(task);
    let mut copy = original.boxed_copy();
    copy.as_any_mut().downcast_mut::<Task>().unwrap().title = "changed".into();

    assert_eq!(original.as_any().downcast_ref::<Task>().unwrap().title, "original");
}

#[test]
fn mark_deleted_is_monotonic() {
    let mut entity: Box<dyn DynEntity> = Box::new(Task::new(EntityId::new(), "t", 0.0));
    let first = chrono::Utc::now();
    entity.mark_deleted(first);
    entity.mark_deleted(first + chrono::Duration::days(1));
    assert_eq!(entity.deletion_time(), Some(first));
    assert!(entity.is_tombstoned());
}
