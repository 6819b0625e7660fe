//! Draft/public record publishing over a relation graph.
//!
//! Every record type is declared once in a [`PublishRegistry`]. Drafts are
//! edited and saved freely; [`PublishService::publish`] copies a draft and
//! everything it reaches onto public mirrors, exactly once per record.

pub mod db;
pub mod logging;
pub mod model;
pub mod publish;
pub mod repo;
pub mod service;

pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::record::{FieldValue, PublishState, Record, RecordKey};
pub use model::schema::{
    Cardinality, PublishRegistry, RecordType, RelationTarget, SchemaError, SchemaResult,
};
pub use publish::hooks::PublishHook;
pub use publish::visited::{NestedItem, VisitedSet};
pub use repo::permission_repo::{
    PermissionRepository, PublishPermission, SqlitePermissionRepository,
};
pub use repo::record_repo::{RecordFilter, RecordStore, RepoError, RepoResult, SqliteRecordStore};
pub use service::permission_service::{
    publish_permission_for, register_publish_permissions, AllowAll, GrantedPermissions,
    PermissionPolicy,
};
pub use service::publish_service::{
    DeleteOutcome, PublishError, PublishOutcome, PublishResult, PublishService, SaveMode,
};
pub use service::selection::{delete_selected, draft_choices, publish_selected, SelectionOutcome};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
