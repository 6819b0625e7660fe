//! Publish permission entries.
//!
//! One `publish_<type>` entry per registered record type, created at setup.

use crate::db::migrations::{current_user_version, latest_version};
use crate::repo::record_repo::{table_exists, RepoError, RepoResult};
use rusqlite::{params, Connection};

/// Stored "Can publish ..." permission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPermission {
    pub codename: String,
    pub name: String,
    pub record_type: String,
}

pub trait PermissionRepository {
    /// Inserts the permission unless its codename exists. Returns `true` when created.
    fn ensure_permission(&self, permission: &PublishPermission) -> RepoResult<bool>;
    /// All permissions sorted by codename.
    fn list_permissions(&self) -> RepoResult<Vec<PublishPermission>>;
}

/// SQLite-backed permission repository.
pub struct SqlitePermissionRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqlitePermissionRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        let expected_version = latest_version();
        let actual_version = current_user_version(conn)?;
        if actual_version != expected_version {
            return Err(RepoError::UninitializedConnection {
                expected_version,
                actual_version,
            });
        }
        if !table_exists(conn, "publish_permissions")? {
            return Err(RepoError::MissingRequiredTable("publish_permissions"));
        }
        Ok(Self { conn })
    }
}

impl PermissionRepository for SqlitePermissionRepository<'_> {
    fn ensure_permission(&self, permission: &PublishPermission) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO publish_permissions (codename, name, record_type)
             VALUES (?1, ?2, ?3);",
            params![
                permission.codename.as_str(),
                permission.name.as_str(),
                permission.record_type.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    fn list_permissions(&self) -> RepoResult<Vec<PublishPermission>> {
        let mut stmt = self.conn.prepare(
            "SELECT codename, name, record_type
             FROM publish_permissions
             ORDER BY codename ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(PublishPermission {
                codename: row.get("codename")?,
                name: row.get("name")?,
                record_type: row.get("record_type")?,
            });
        }
        Ok(items)
    }
}
