//! Record store contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist draft and public records of every registered type in one table.
//! - Answer the visibility filters and relation lookups publishing needs.
//! - Provide the write scope that serializes top-level publish calls.
//!
//! # Invariants
//! - Stores only write; publish-state rules live in the service layer.
//! - Listings are deterministic: insertion order (`rowid ASC`).
//! - `write_scope` joins an already open transaction instead of nesting.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DbError;
use crate::model::record::{FieldValue, PublishState, Record, RecordKey};
use log::warn;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const RECORD_SELECT_SQL: &str = "SELECT
    record_key,
    record_type,
    is_public,
    publish_state,
    public_key,
    fields,
    links
FROM records";

const RECORD_COLUMNS: &[&str] = &[
    "record_key",
    "record_type",
    "is_public",
    "publish_state",
    "public_key",
    "fields",
    "links",
    "created_at",
    "updated_at",
];

const COLLECTION_COLUMNS: &[&str] = &["owner_key", "relation", "member_key", "position"];

pub type RepoResult<T> = Result<T, RepoError>;

/// Record persistence and query errors.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound(RecordKey),
    /// Write attempted with a record that has no key.
    MissingKey,
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(key) => write!(f, "record not found: {key}"),
            Self::MissingKey => write!(f, "record has no key"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "record store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "record store requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "record store requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted record data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidData(value.to_string())
    }
}

/// Visibility filters over one record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFilter {
    All,
    /// `is_public`.
    Published,
    /// Drafts not pending deletion.
    Draft,
    /// Drafts with unpublished edits.
    Changed,
    /// Drafts whose mirrors go on the next publish pass.
    PendingDelete,
    /// `Draft` plus `PendingDelete`: every draft.
    DraftAndDeleted,
}

impl RecordFilter {
    fn sql(self) -> &'static str {
        match self {
            Self::All => "1 = 1",
            Self::Published => "is_public = 1",
            Self::Draft => "is_public = 0 AND publish_state <> 'pending_delete'",
            Self::Changed => "is_public = 0 AND publish_state = 'changed'",
            Self::PendingDelete => "is_public = 0 AND publish_state = 'pending_delete'",
            Self::DraftAndDeleted => "is_public = 0",
        }
    }
}

/// Storage operations the publish engine relies on.
pub trait RecordStore {
    fn get(&self, key: RecordKey) -> RepoResult<Option<Record>>;
    /// Inserts a keyed record and returns its key.
    fn insert(&self, record: &Record) -> RepoResult<RecordKey>;
    fn update(&self, record: &Record) -> RepoResult<()>;
    /// Removes one record; returns whether a row existed.
    fn remove(&self, key: RecordKey) -> RepoResult<bool>;
    fn list(&self, record_type: &str, filter: RecordFilter) -> RepoResult<Vec<Record>>;
    /// Records of `record_type` whose `link` points at `target`, minus `exclude`.
    fn list_referencing(
        &self,
        record_type: &str,
        link: &str,
        target: RecordKey,
        exclude: &[RecordKey],
    ) -> RepoResult<Vec<Record>>;
    /// Members of one many-to-many collection, in stored order.
    fn collection(&self, owner: RecordKey, relation: &str) -> RepoResult<Vec<RecordKey>>;
    /// Replaces the whole collection with `members`.
    fn replace_collection(
        &self,
        owner: RecordKey,
        relation: &str,
        members: &[RecordKey],
    ) -> RepoResult<()>;
    /// Runs `work` under the store's exclusive write scope.
    ///
    /// Changes are committed when `work` succeeds and discarded otherwise.
    fn write_scope<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<RepoError>;
}

/// SQLite-backed record store.
pub struct SqliteRecordStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRecordStore<'conn> {
    /// Creates a store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_store_connection_ready(conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }
}

impl RecordStore for SqliteRecordStore<'_> {
    fn get(&self, key: RecordKey) -> RepoResult<Option<Record>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{RECORD_SELECT_SQL} WHERE record_key = ?1;"))?;
        let mut rows = stmt.query([key.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_record_row(row)?));
        }
        Ok(None)
    }

    fn insert(&self, record: &Record) -> RepoResult<RecordKey> {
        let key = record.key.ok_or(RepoError::MissingKey)?;
        self.conn.execute(
            "INSERT INTO records (
                record_key,
                record_type,
                is_public,
                publish_state,
                public_key,
                fields,
                links
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                key.to_string(),
                record.record_type.as_str(),
                bool_to_int(record.is_public),
                record.publish_state.as_str(),
                record.public_key.map(|value| value.to_string()),
                serde_json::to_string(&record.fields)?,
                serde_json::to_string(&record.links)?,
            ],
        )?;
        Ok(key)
    }

    fn update(&self, record: &Record) -> RepoResult<()> {
        let key = record.key.ok_or(RepoError::MissingKey)?;
        let changed = self.conn.execute(
            "UPDATE records
             SET
                publish_state = ?2,
                public_key = ?3,
                fields = ?4,
                links = ?5,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE record_key = ?1;",
            params![
                key.to_string(),
                record.publish_state.as_str(),
                record.public_key.map(|value| value.to_string()),
                serde_json::to_string(&record.fields)?,
                serde_json::to_string(&record.links)?,
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(key));
        }
        Ok(())
    }

    fn remove(&self, key: RecordKey) -> RepoResult<bool> {
        let key_text = key.to_string();
        self.write_scope(|| {
            let changed = self
                .conn
                .execute("DELETE FROM records WHERE record_key = ?1;", [&key_text])?;
            if changed == 0 {
                return Ok(false);
            }
            self.conn.execute(
                "DELETE FROM record_collections WHERE member_key = ?1;",
                [&key_text],
            )?;
            // JSON links have no foreign key; null them like `public_key`.
            self.conn.execute(
                "UPDATE records
                 SET
                    links = (
                        SELECT json_group_object(key, value)
                        FROM json_each(records.links)
                        WHERE value <> ?1
                    ),
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE EXISTS (
                    SELECT 1 FROM json_each(records.links) WHERE value = ?1
                 );",
                [&key_text],
            )?;
            Ok(true)
        })
    }

    fn list(&self, record_type: &str, filter: RecordFilter) -> RepoResult<Vec<Record>> {
        let mut stmt = self.conn.prepare(&format!(
            "{RECORD_SELECT_SQL}
             WHERE record_type = ?1
               AND {}
             ORDER BY rowid ASC;",
            filter.sql()
        ))?;
        let mut rows = stmt.query([record_type])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(row)?);
        }
        Ok(records)
    }

    fn list_referencing(
        &self,
        record_type: &str,
        link: &str,
        target: RecordKey,
        exclude: &[RecordKey],
    ) -> RepoResult<Vec<Record>> {
        let mut sql = format!(
            "{RECORD_SELECT_SQL}
             WHERE record_type = ?
               AND json_extract(links, '$.' || ?) = ?"
        );
        let mut bind_values = vec![
            Value::Text(record_type.to_string()),
            Value::Text(link.to_string()),
            Value::Text(target.to_string()),
        ];

        if !exclude.is_empty() {
            let placeholders = vec!["?"; exclude.len()].join(", ");
            sql.push_str(&format!(" AND record_key NOT IN ({placeholders})"));
            bind_values.extend(exclude.iter().map(|key| Value::Text(key.to_string())));
        }
        sql.push_str(" ORDER BY rowid ASC;");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(row)?);
        }
        Ok(records)
    }

    fn collection(&self, owner: RecordKey, relation: &str) -> RepoResult<Vec<RecordKey>> {
        let mut stmt = self.conn.prepare(
            "SELECT member_key
             FROM record_collections
             WHERE owner_key = ?1
               AND relation = ?2
             ORDER BY position ASC, member_key ASC;",
        )?;
        let mut rows = stmt.query(params![owner.to_string(), relation])?;
        let mut members = Vec::new();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            members.push(parse_uuid(&value, "record_collections.member_key")?);
        }
        Ok(members)
    }

    fn replace_collection(
        &self,
        owner: RecordKey,
        relation: &str,
        members: &[RecordKey],
    ) -> RepoResult<()> {
        self.write_scope(|| {
            self.conn.execute(
                "DELETE FROM record_collections
                 WHERE owner_key = ?1
                   AND relation = ?2;",
                params![owner.to_string(), relation],
            )?;
            for (position, member) in members.iter().enumerate() {
                self.conn.execute(
                    "INSERT OR IGNORE INTO record_collections (
                        owner_key,
                        relation,
                        member_key,
                        position
                    ) VALUES (?1, ?2, ?3, ?4);",
                    params![
                        owner.to_string(),
                        relation,
                        member.to_string(),
                        position as i64
                    ],
                )?;
            }
            Ok(())
        })
    }

    fn write_scope<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<RepoError>,
    {
        if !self.conn.is_autocommit() {
            return work();
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(RepoError::from)?;
        match work() {
            Ok(value) => {
                tx.commit().map_err(RepoError::from)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(
                        "event=write_scope module=repo status=error error_code=rollback_failed error={}",
                        rollback_err
                    );
                }
                Err(err)
            }
        }
    }
}

fn parse_record_row(row: &Row<'_>) -> RepoResult<Record> {
    let key_text: String = row.get("record_key")?;
    let key = parse_uuid(&key_text, "records.record_key")?;

    let is_public = match row.get::<_, i64>("is_public")? {
        0 => false,
        1 => true,
        other => {
            return Err(RepoError::InvalidData(format!(
                "invalid is_public value `{other}` in records.is_public"
            )));
        }
    };

    let state_text: String = row.get("publish_state")?;
    let publish_state = PublishState::parse(&state_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid publish state `{state_text}` in records.publish_state"
        ))
    })?;

    let public_key = row
        .get::<_, Option<String>>("public_key")?
        .map(|value| parse_uuid(&value, "records.public_key"))
        .transpose()?;

    let fields_text: String = row.get("fields")?;
    let fields: BTreeMap<String, FieldValue> = serde_json::from_str(&fields_text)
        .map_err(|err| RepoError::InvalidData(format!("records.fields of {key}: {err}")))?;
    let links_text: String = row.get("links")?;
    let links: BTreeMap<String, RecordKey> = serde_json::from_str(&links_text)
        .map_err(|err| RepoError::InvalidData(format!("records.links of {key}: {err}")))?;

    Ok(Record {
        key: Some(key),
        record_type: row.get("record_type")?,
        is_public,
        publish_state,
        public_key,
        fields,
        links,
    })
}

fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

fn ensure_store_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for (table, columns) in [
        ("records", RECORD_COLUMNS),
        ("record_collections", COLLECTION_COLUMNS),
    ] {
        if !table_exists(conn, table)? {
            return Err(RepoError::MissingRequiredTable(table));
        }
        for &column in columns {
            if !table_has_column(conn, table, column)? {
                return Err(RepoError::MissingRequiredColumn { table, column });
            }
        }
    }
    Ok(())
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
