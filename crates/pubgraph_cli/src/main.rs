//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `pubgraph_core` linkage.
//! - Walk the page/category demo through a dry-run preview and a publish
//!   against an in-memory database.
//!
//! Set `PUBGRAPH_LOG_DIR` to an absolute directory to get file logs.

use log::info;
use pubgraph_core::{
    default_log_level, init_logging, open_db_in_memory, register_publish_permissions,
    NestedItem, PublishRegistry, PublishService, Record, RecordType, SqlitePermissionRepository,
    SqliteRecordStore,
};
use std::error::Error;
use std::sync::Arc;

const LOG_DIR_ENV: &str = "PUBGRAPH_LOG_DIR";

fn main() {
    println!("pubgraph_core ping={}", pubgraph_core::ping());
    println!("pubgraph_core version={}", pubgraph_core::core_version());

    if let Err(err) = run_demo() {
        eprintln!("demo failed: {err}");
        std::process::exit(1);
    }
}

fn demo_registry() -> Result<PublishRegistry, Box<dyn Error>> {
    let mut registry = PublishRegistry::new();
    registry.register(
        RecordType::new("page")
            .label_field("title")
            .field("title")
            .field("slug")
            .link("parent", "page")
            .many_to_many("categories", "category")
            .reverse("children", "page", "parent")
            .publish_reverse("children")
            .copy_with("slug", |target, value| {
                let slug = value.as_text().unwrap_or_default().trim().to_lowercase();
                target.set_field("slug", slug.replace(' ', "-"));
            }),
    )?;
    registry.register(
        RecordType::new("category")
            .verbose_name("category")
            .label_field("name")
            .field("name"),
    )?;
    Ok(registry)
}

fn run_demo() -> Result<(), Box<dyn Error>> {
    if let Ok(log_dir) = std::env::var(LOG_DIR_ENV) {
        init_logging(default_log_level(), &log_dir)?;
    }

    let conn = open_db_in_memory()?;
    let registry = Arc::new(demo_registry()?);
    let created =
        register_publish_permissions(&SqlitePermissionRepository::try_new(&conn)?, &registry)?;
    println!("permissions created={created}");

    let service = PublishService::try_new(SqliteRecordStore::try_new(&conn)?, registry.clone())?;

    let mut news = Record::draft("category").with_field("name", "News");
    let news_key = service.save(&mut news)?;

    let mut home = Record::draft("page")
        .with_field("title", "Home")
        .with_field("slug", "Home");
    let home_key = service.save(&mut home)?;
    service.set_collection(&mut home, "categories", &[news_key])?;

    let mut about = Record::draft("page")
        .with_field("title", "About Us")
        .with_field("slug", "About Us")
        .with_link("parent", home_key);
    service.save(&mut about)?;

    let preview = service.publish(&mut home, true)?;
    println!("dry run would publish {} records:", preview.visited.len());
    for item in preview.visited.nested_items() {
        print_item(&registry, &item, 1);
    }

    let outcome = service.publish(&mut home, false)?;
    let public_pages = service.published("page")?;
    info!(
        "event=cli_demo module=cli status=ok visited={} public_pages={}",
        outcome.visited.len(),
        public_pages.len()
    );
    println!(
        "published visited={} public_pages={} home_state={}",
        outcome.visited.len(),
        public_pages.len(),
        home.publish_state.label()
    );
    Ok(())
}

fn print_item(registry: &PublishRegistry, item: &NestedItem, depth: usize) {
    let label = registry
        .get(&item.record.record_type)
        .map(|record_type| record_type.label_of(&item.record))
        .unwrap_or_else(|_| item.record.record_type.clone());
    println!(
        "{}- {} ({})",
        "  ".repeat(depth),
        label,
        item.record.record_type
    );
    for child in &item.children {
        print_item(registry, child, depth + 1);
    }
}
