use pubgraph_core::db::open_db_in_memory;
use pubgraph_core::{
    delete_selected, draft_choices, publish_selected, register_publish_permissions, AllowAll,
    DeleteOutcome, GrantedPermissions, PermissionRepository, PublishError, PublishRegistry,
    PublishService, PublishState, Record, RecordType, SchemaError, SelectionOutcome,
    SqlitePermissionRepository, SqliteRecordStore,
};
use rusqlite::Connection;
use std::sync::Arc;

fn site_registry() -> Arc<PublishRegistry> {
    let mut registry = PublishRegistry::new();
    registry
        .register(
            RecordType::new("page")
                .label_field("title")
                .field("title")
                .link("parent", "page")
                .many_to_many("categories", "category")
                .reverse("children", "page", "parent")
                .publish_reverse("children"),
        )
        .unwrap();
    registry
        .register(
            RecordType::new("category")
                .verbose_name("topic")
                .field("name"),
        )
        .unwrap();
    Arc::new(registry)
}

fn service(conn: &Connection) -> PublishService<SqliteRecordStore<'_>> {
    PublishService::try_new(SqliteRecordStore::try_new(conn).unwrap(), site_registry()).unwrap()
}

struct Site {
    home: Record,
    about: Record,
    news: Record,
}

fn site(service: &PublishService<SqliteRecordStore<'_>>) -> Site {
    let mut news = Record::draft("category").with_field("name", "News");
    service.save(&mut news).unwrap();
    let mut home = Record::draft("page").with_field("title", "Home");
    service.save(&mut home).unwrap();
    service
        .set_collection(&mut home, "categories", &[news.key.unwrap()])
        .unwrap();
    let mut about = Record::draft("page")
        .with_field("title", "About")
        .with_link("parent", home.key.unwrap());
    service.save(&mut about).unwrap();
    Site { home, about, news }
}

#[test]
fn permissions_are_registered_once_per_type() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePermissionRepository::try_new(&conn).unwrap();
    let registry = site_registry();

    assert_eq!(register_publish_permissions(&repo, &registry).unwrap(), 2);
    assert_eq!(register_publish_permissions(&repo, &registry).unwrap(), 0);

    let permissions = repo.list_permissions().unwrap();
    let names: Vec<(&str, &str)> = permissions
        .iter()
        .map(|permission| (permission.codename.as_str(), permission.name.as_str()))
        .collect();
    assert_eq!(
        names,
        vec![
            ("publish_category", "Can publish topic"),
            ("publish_page", "Can publish page"),
        ]
    );
}

#[test]
fn unconfirmed_publish_returns_preview_without_writing() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let Site { home, news, .. } = site(&service);

    let mut selection = vec![home.clone(), news];
    let outcome = publish_selected(&service, &AllowAll, &mut selection, false).unwrap();
    let SelectionOutcome::Preview(items) = outcome else {
        panic!("expected a preview");
    };
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].record.key, home.key);
    assert_eq!(items[0].subtree_len(), 3);

    assert!(service.published("page").unwrap().is_empty());
    assert!(service.published("category").unwrap().is_empty());
    assert_eq!(service.changed("page").unwrap().len(), 2);
}

#[test]
fn confirmed_publish_commits_the_whole_selection() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let Site { home, about, news } = site(&service);

    let mut selection = vec![home, news];
    let outcome = publish_selected(&service, &AllowAll, &mut selection, true).unwrap();
    let SelectionOutcome::Published { count, visited } = outcome else {
        panic!("expected a committed publish");
    };
    assert_eq!(count, 2);
    assert_eq!(visited.len(), 3);
    assert!(visited.contains(about.key.unwrap()));

    assert!(selection
        .iter()
        .all(|record| record.publish_state == PublishState::Default));
    assert_eq!(service.published("page").unwrap().len(), 2);
    assert_eq!(service.published("category").unwrap().len(), 1);
    assert!(service.changed("page").unwrap().is_empty());
}

#[test]
fn missing_permission_aborts_before_anything_is_published() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let Site { home, news, .. } = site(&service);
    let policy = GrantedPermissions::new(["publish_page"]);

    let mut selection = vec![home, news.clone()];
    let err = publish_selected(&service, &policy, &mut selection, true).unwrap_err();
    assert!(matches!(
        err,
        PublishError::PermissionDenied { action: "publish", key } if Some(key) == news.key
    ));
    assert!(service.published("page").unwrap().is_empty());
    assert!(service.published("category").unwrap().is_empty());
}

#[test]
fn delete_selected_requires_delete_permission() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let Site { mut home, about, .. } = site(&service);
    service.publish(&mut home, false).unwrap();
    let about = service.get(about.key.unwrap()).unwrap().unwrap();

    let mut policy = GrantedPermissions::new(["publish_page"]);
    let mut selection = vec![home.clone(), about];
    let err = delete_selected(&service, &policy, &mut selection).unwrap_err();
    assert!(matches!(
        err,
        PublishError::PermissionDenied { action: "delete", .. }
    ));
    assert!(service.deleted("page").unwrap().is_empty());

    policy.grant("delete_page");
    let outcomes = delete_selected(&service, &policy, &mut selection).unwrap();
    assert_eq!(
        outcomes,
        vec![
            DeleteOutcome::MarkedForDeletion,
            DeleteOutcome::MarkedForDeletion
        ]
    );
    assert_eq!(service.deleted("page").unwrap().len(), 2);
    assert_eq!(service.published("page").unwrap().len(), 2);
}

#[test]
fn failed_bulk_delete_rolls_back_every_record() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let Site { mut home, .. } = site(&service);
    service.publish(&mut home, false).unwrap();

    let mut selection = vec![home.clone(), Record::draft("page")];
    let err = service.delete_all(&mut selection).unwrap_err();
    assert!(matches!(err, PublishError::PrecondNotMet(_)));
    assert_eq!(selection[0], home);
    let stored = service.get(home.key.unwrap()).unwrap().unwrap();
    assert_eq!(stored.publish_state, PublishState::Default);
    assert!(conn.is_autocommit());
}

#[test]
fn draft_choices_label_every_draft_including_pending_deletes() {
    let conn = open_db_in_memory().unwrap();
    let service = service(&conn);
    let Site {
        mut home,
        about,
        news,
    } = site(&service);
    service.publish(&mut home, false).unwrap();
    let mut about = service.get(about.key.unwrap()).unwrap().unwrap();
    service.delete(&mut about).unwrap();

    let pages = draft_choices(&service, "page").unwrap();
    assert_eq!(
        pages,
        vec![
            (home.key.unwrap(), "Home".to_string()),
            (about.key.unwrap(), "About".to_string()),
        ]
    );

    let topics = draft_choices(&service, "category").unwrap();
    assert_eq!(
        topics,
        vec![(news.key.unwrap(), format!("topic {}", news.key.unwrap()))]
    );

    assert!(matches!(
        draft_choices(&service, "post"),
        Err(PublishError::Schema(SchemaError::UnknownType(_)))
    ));
}
