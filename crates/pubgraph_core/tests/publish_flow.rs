use pubgraph_core::db::open_db_in_memory;
use pubgraph_core::{
    DeleteOutcome, FieldValue, PublishError, PublishRegistry, PublishService, PublishState, Record,
    RecordStore, RecordType, SaveMode, SchemaError, SqliteRecordStore,
};
use rusqlite::Connection;
use std::sync::Arc;

fn article_registry() -> Arc<PublishRegistry> {
    let mut registry = PublishRegistry::new();
    registry
        .register(
            RecordType::new("article")
                .label_field("title")
                .field("title")
                .field("body")
                .field("view_count")
                .exclude("view_count"),
        )
        .unwrap();
    Arc::new(registry)
}

fn service(conn: &Connection) -> PublishService<SqliteRecordStore<'_>> {
    PublishService::try_new(SqliteRecordStore::try_new(conn).unwrap(), article_registry()).unwrap()
}

#[test]
fn article_end_to_end() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);

    let mut draft = Record::draft("article").with_field("title", "Draft Title");
    service.save(&mut draft).unwrap();
    assert_eq!(draft.publish_state, PublishState::Changed);

    let outcome = service.publish(&mut draft, false).unwrap();
    let public = outcome.public.unwrap();
    assert!(public.is_public);
    assert_eq!(public.field("title"), Some(&FieldValue::from("Draft Title")));
    assert_eq!(draft.public_key, public.key);
    assert_eq!(draft.publish_state, PublishState::Default);

    let stored = service.get(draft.key.unwrap()).unwrap().unwrap();
    assert_eq!(stored.publish_state, PublishState::Default);
    assert_eq!(stored.public_key, public.key);

    draft.set_field("title", "Updated");
    service.save(&mut draft).unwrap();
    assert_eq!(draft.publish_state, PublishState::Changed);

    let republished = service.publish(&mut draft, false).unwrap().public.unwrap();
    assert_eq!(republished.key, public.key);
    assert_eq!(republished.field("title"), Some(&FieldValue::from("Updated")));
    assert_eq!(draft.publish_state, PublishState::Default);

    let stored_public = service.get(public.key.unwrap()).unwrap().unwrap();
    assert_eq!(stored_public.field("title"), Some(&FieldValue::from("Updated")));
    assert_eq!(service.published("article").unwrap().len(), 1);
}

#[test]
fn excluded_fields_are_not_copied() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);

    let mut draft = Record::draft("article")
        .with_field("title", "Counted")
        .with_field("view_count", 41_i64);
    service.save(&mut draft).unwrap();

    let public = service.publish(&mut draft, false).unwrap().public.unwrap();
    assert!(public.field("view_count").is_none());
}

#[test]
fn publishing_unchanged_draft_twice_keeps_mirror_untouched() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);

    let mut draft = Record::draft("article").with_field("title", "Stable");
    service.save(&mut draft).unwrap();
    let first = service.publish(&mut draft, false).unwrap().public.unwrap();

    let public_key = first.key.unwrap().to_string();
    conn.execute(
        "UPDATE records SET updated_at = 1 WHERE record_key = ?1;",
        [&public_key],
    )
    .unwrap();

    let second = service.publish(&mut draft, false).unwrap().public.unwrap();
    assert_eq!(first.key, second.key);
    assert_eq!(first, second);

    let updated_at: i64 = conn
        .query_row(
            "SELECT updated_at FROM records WHERE record_key = ?1;",
            [&public_key],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(updated_at, 1);
}

#[test]
fn state_transitions_follow_the_lifecycle() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);

    let mut draft = Record::draft("article").with_field("title", "Lifecycle");
    service.save(&mut draft).unwrap();
    assert_eq!(draft.publish_state, PublishState::Changed);

    service.publish(&mut draft, false).unwrap();
    assert_eq!(draft.publish_state, PublishState::Default);

    draft.set_field("body", "text");
    service.save(&mut draft).unwrap();
    assert_eq!(draft.publish_state, PublishState::Changed);

    assert_eq!(
        service.delete(&mut draft).unwrap(),
        DeleteOutcome::MarkedForDeletion
    );
    assert_eq!(draft.publish_state, PublishState::PendingDelete);
    assert!(draft.is_marked_for_deletion());

    draft.set_field("body", "more text");
    let err = service.save(&mut draft).unwrap_err();
    assert!(matches!(err, PublishError::InvalidState(_)));
    service.save_with(&mut draft, SaveMode::KeepState).unwrap();

    service.undelete(&mut draft).unwrap();
    assert_eq!(draft.publish_state, PublishState::Changed);
    let stored = service.get(draft.key.unwrap()).unwrap().unwrap();
    assert_eq!(stored.publish_state, PublishState::Changed);
}

#[test]
fn delete_without_mirror_removes_immediately() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);

    let mut draft = Record::draft("article");
    service.save(&mut draft).unwrap();
    assert_eq!(service.delete(&mut draft).unwrap(), DeleteOutcome::Removed);
    assert!(service.get(draft.key.unwrap()).unwrap().is_none());
}

#[test]
fn publishing_marked_draft_removes_mirror_and_draft() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);

    let mut draft = Record::draft("article").with_field("title", "Gone soon");
    service.save(&mut draft).unwrap();
    let public_key = service.publish(&mut draft, false).unwrap().public.unwrap().key;
    service.delete(&mut draft).unwrap();
    assert_eq!(service.deleted("article").unwrap().len(), 1);
    assert!(service.draft("article").unwrap().is_empty());
    assert_eq!(service.draft_and_deleted("article").unwrap().len(), 1);

    let outcome = service.publish(&mut draft, false).unwrap();
    assert!(outcome.public.is_none());
    assert_eq!(outcome.visited.len(), 1);
    assert!(service.get(draft.key.unwrap()).unwrap().is_none());
    assert!(service.get(public_key.unwrap()).unwrap().is_none());
}

#[test]
fn unpublish_removes_mirror_and_marks_draft_changed() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);

    let mut draft = Record::draft("article").with_field("title", "Short lived");
    service.save(&mut draft).unwrap();
    let public = service.publish(&mut draft, false).unwrap().public.unwrap();

    let previewed = service.unpublish(&mut draft, true).unwrap();
    assert_eq!(previewed.as_ref().map(|record| record.key), Some(public.key));
    assert_eq!(draft.public_key, public.key);
    assert!(service.get(public.key.unwrap()).unwrap().is_some());

    let removed = service.unpublish(&mut draft, false).unwrap().unwrap();
    assert_eq!(removed.key, public.key);
    assert!(draft.public_key.is_none());
    assert_eq!(draft.publish_state, PublishState::Changed);
    assert!(service.get(public.key.unwrap()).unwrap().is_none());
    assert!(service.published("article").unwrap().is_empty());

    assert!(service.unpublish(&mut draft, false).unwrap().is_none());
}

#[test]
fn unpublishing_marked_draft_is_rejected_and_rolled_back() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);

    let mut draft = Record::draft("article");
    service.save(&mut draft).unwrap();
    let public_key = service.publish(&mut draft, false).unwrap().public.unwrap().key;
    service.delete(&mut draft).unwrap();
    let before = draft.clone();

    let err = service.unpublish(&mut draft, false).unwrap_err();
    assert!(matches!(err, PublishError::InvalidState(_)));
    assert_eq!(draft, before);
    assert!(service.get(public_key.unwrap()).unwrap().is_some());
    assert!(conn.is_autocommit());
}

#[test]
fn publish_and_unpublish_reject_invalid_records() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);

    let mut unsaved = Record::draft("article");
    let err = service.publish(&mut unsaved, false).unwrap_err();
    assert!(matches!(err, PublishError::PrecondNotMet(_)));
    let err = service.unpublish(&mut unsaved, false).unwrap_err();
    assert!(matches!(err, PublishError::PrecondNotMet(_)));
    let err = service.delete(&mut unsaved).unwrap_err();
    assert!(matches!(err, PublishError::PrecondNotMet(_)));

    let mut draft = Record::draft("article");
    service.save(&mut draft).unwrap();
    let mut public = service.publish(&mut draft, false).unwrap().public.unwrap();
    let err = service.publish(&mut public, false).unwrap_err();
    assert!(matches!(err, PublishError::InvalidState(_)));
    let err = service.unpublish(&mut public, true).unwrap_err();
    assert!(matches!(err, PublishError::InvalidState(_)));

    let mut unknown = Record::draft("article").with_field("subtitle", "nope");
    let err = service.save(&mut unknown).unwrap_err();
    assert!(matches!(
        err,
        PublishError::Schema(SchemaError::UnknownField { .. })
    ));
    assert!(unknown.key.is_none());
}

#[test]
fn service_rejects_unresolved_registry() {
    let conn = open_db_in_memory().unwrap();
    let mut registry = PublishRegistry::new();
    registry
        .register(RecordType::new("article").link("author", "person"))
        .unwrap();

    let result = PublishService::try_new(
        SqliteRecordStore::try_new(&conn).unwrap(),
        Arc::new(registry),
    );
    assert!(matches!(
        result,
        Err(PublishError::Schema(SchemaError::UnknownTarget { .. }))
    ));
}

#[test]
fn store_is_reachable_through_service() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);

    let mut draft = Record::draft("article");
    let key = service.save(&mut draft).unwrap();
    assert!(service.store().get(key).unwrap().is_some());
    assert!(service.registry().contains("article"));
    assert!(matches!(
        service.changed("page"),
        Err(PublishError::Schema(SchemaError::UnknownType(_)))
    ));
}
