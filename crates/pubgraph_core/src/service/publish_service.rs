//! Publish/unpublish/delete orchestrator.
//!
//! # Responsibility
//! - Provide the top-level entry points over draft records: tracked save,
//!   publish, unpublish, logical delete, undelete and deletion passes.
//! - Run every mutating top-level call inside one store write scope.
//! - Emit before/after notifications to registered hooks.
//!
//! # Invariants
//! - Publishing always starts from a saved draft.
//! - A tracked save of a pending-delete draft fails with `InvalidState`.
//! - Dry runs traverse the same graph as real runs and never write.
//! - When a write scope rolls back, the caller's draft is restored.

use crate::model::record::{PublishState, Record, RecordKey};
use crate::model::schema::{PublishRegistry, SchemaError};
use crate::publish::hooks::PublishHook;
use crate::publish::visited::VisitedSet;
use crate::repo::record_repo::{RecordFilter, RecordStore, RepoError};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use uuid::Uuid;

pub type PublishResult<T> = Result<T, PublishError>;

/// Publish use-case errors.
#[derive(Debug)]
pub enum PublishError {
    /// Operation needs a saved record.
    PrecondNotMet(String),
    /// Operation is not allowed in the record's current state.
    InvalidState(String),
    /// Rejected by a permission policy.
    PermissionDenied { action: &'static str, key: RecordKey },
    Schema(SchemaError),
    Repo(RepoError),
}

impl Display for PublishError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PrecondNotMet(message) => write!(f, "precondition not met: {message}"),
            Self::InvalidState(message) => write!(f, "invalid state: {message}"),
            Self::PermissionDenied { action, key } => {
                write!(f, "permission denied: cannot {action} {key}")
            }
            Self::Schema(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for PublishError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Schema(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SchemaError> for PublishError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

impl From<RepoError> for PublishError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// How `save_with` treats the publish state of a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Marks the draft `Changed`; refuses pending-delete drafts.
    TrackChanges,
    /// Stores the state as is. Used for internal transitions.
    KeepState,
}

/// What a logical delete did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Draft has a public mirror; both stay until the next publish pass.
    MarkedForDeletion,
    /// Nothing was ever published; the record is gone.
    Removed,
}

/// Result of one top-level publish.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    /// The public mirror, or `None` after a deletion pass.
    pub public: Option<Record>,
    /// Every record the traversal touched.
    pub visited: VisitedSet,
}

/// Orchestrator over a record store and a validated type registry.
pub struct PublishService<S: RecordStore> {
    pub(super) store: S,
    pub(super) registry: Arc<PublishRegistry>,
    pub(super) hooks: Vec<Box<dyn PublishHook>>,
}

impl<S: RecordStore> PublishService<S> {
    /// Creates a service after validating every cross-type declaration.
    pub fn try_new(store: S, registry: Arc<PublishRegistry>) -> PublishResult<Self> {
        registry.validate()?;
        Ok(Self {
            store,
            registry,
            hooks: Vec::new(),
        })
    }

    pub fn add_hook(&mut self, hook: impl PublishHook + 'static) {
        self.hooks.push(Box::new(hook));
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &PublishRegistry {
        &self.registry
    }

    /// Saves a record and marks drafts `Changed`.
    pub fn save(&self, record: &mut Record) -> PublishResult<RecordKey> {
        self.save_with(record, SaveMode::TrackChanges)
    }

    /// Saves a record, assigning a key on first save.
    ///
    /// # Errors
    /// - `InvalidState` for a tracked save of a pending-delete draft.
    /// - `Schema` when the record carries undeclared members.
    pub fn save_with(&self, record: &mut Record, mode: SaveMode) -> PublishResult<RecordKey> {
        self.registry.validate_record(record)?;
        if !record.is_public && mode == SaveMode::TrackChanges {
            if record.is_marked_for_deletion() {
                return Err(PublishError::InvalidState(format!(
                    "{} is marked for deletion and cannot be saved",
                    describe(record)
                )));
            }
            record.publish_state = PublishState::Changed;
        }

        match record.key {
            Some(key) => {
                self.store.update(record)?;
                Ok(key)
            }
            None => {
                let key = Uuid::new_v4();
                record.key = Some(key);
                if let Err(err) = self.store.insert(record) {
                    record.key = None;
                    return Err(err.into());
                }
                Ok(key)
            }
        }
    }

    pub fn get(&self, key: RecordKey) -> PublishResult<Option<Record>> {
        Ok(self.store.get(key)?)
    }

    /// Lists records of a registered type.
    pub fn list(&self, record_type: &str, filter: RecordFilter) -> PublishResult<Vec<Record>> {
        self.registry.get(record_type)?;
        Ok(self.store.list(record_type, filter)?)
    }

    /// Drafts with unpublished edits.
    pub fn changed(&self, record_type: &str) -> PublishResult<Vec<Record>> {
        self.list(record_type, RecordFilter::Changed)
    }

    /// Drafts whose mirrors go on the next publish pass.
    pub fn deleted(&self, record_type: &str) -> PublishResult<Vec<Record>> {
        self.list(record_type, RecordFilter::PendingDelete)
    }

    pub fn draft(&self, record_type: &str) -> PublishResult<Vec<Record>> {
        self.list(record_type, RecordFilter::Draft)
    }

    pub fn draft_and_deleted(&self, record_type: &str) -> PublishResult<Vec<Record>> {
        self.list(record_type, RecordFilter::DraftAndDeleted)
    }

    pub fn published(&self, record_type: &str) -> PublishResult<Vec<Record>> {
        self.list(record_type, RecordFilter::Published)
    }

    /// Members of a draft's many-to-many collection.
    pub fn collection(&self, owner: RecordKey, relation: &str) -> PublishResult<Vec<RecordKey>> {
        Ok(self.store.collection(owner, relation)?)
    }

    /// Replaces a draft's many-to-many collection and marks the owner `Changed`.
    pub fn set_collection(
        &self,
        owner: &mut Record,
        relation: &str,
        members: &[RecordKey],
    ) -> PublishResult<()> {
        let owner_key = self.ensure_publishable(owner)?;
        let record_type = self.registry.get(&owner.record_type)?;
        let declared = record_type.many_to_many_relation(relation).ok_or_else(|| {
            SchemaError::UnknownRelation {
                record_type: owner.record_type.clone(),
                relation: relation.to_string(),
            }
        })?;
        if let Some(reverse_name) = &declared.through_reverse {
            return Err(PublishError::InvalidState(format!(
                "`{relation}` is managed through `{reverse_name}` records"
            )));
        }

        let snapshot = owner.clone();
        let result: PublishResult<()> = self.store.write_scope(|| {
            self.store.replace_collection(owner_key, relation, members)?;
            self.save(owner).map(|_| ())
        });
        if result.is_err() {
            *owner = snapshot;
        }
        result
    }

    /// Logical delete.
    ///
    /// A draft with a public mirror is marked `PendingDelete` and kept until
    /// the next publish pass. Anything else is removed immediately.
    pub fn delete(&self, record: &mut Record) -> PublishResult<DeleteOutcome> {
        let key = record.key.ok_or_else(|| {
            PublishError::PrecondNotMet(format!("save {} before deleting it", describe(record)))
        })?;

        if !record.is_public && record.public_key.is_some() {
            let previous = record.publish_state;
            record.publish_state = PublishState::PendingDelete;
            let saved: PublishResult<RecordKey> = self
                .store
                .write_scope(|| self.save_with(record, SaveMode::KeepState));
            if let Err(err) = saved {
                record.publish_state = previous;
                return Err(err);
            }
            info!(
                "event=mark_for_deletion module=service status=ok record_type={} key={}",
                record.record_type, key
            );
            return Ok(DeleteOutcome::MarkedForDeletion);
        }

        let removed: PublishResult<bool> = self
            .store
            .write_scope(|| Ok(self.store.remove(key)?));
        removed?;
        info!(
            "event=mark_for_deletion module=service status=removed record_type={} key={}",
            record.record_type, key
        );
        Ok(DeleteOutcome::Removed)
    }

    /// Deletes each record in turn inside one write scope.
    pub fn delete_all(&self, records: &mut [Record]) -> PublishResult<Vec<DeleteOutcome>> {
        let snapshot = records.to_vec();
        let result: PublishResult<Vec<DeleteOutcome>> = self.store.write_scope(|| {
            records
                .iter_mut()
                .map(|record| self.delete(record))
                .collect::<PublishResult<Vec<_>>>()
        });
        if result.is_err() {
            records.clone_from_slice(&snapshot);
        }
        result
    }

    /// Takes a draft out of `PendingDelete` and back to `Changed`.
    pub fn undelete(&self, draft: &mut Record) -> PublishResult<()> {
        self.ensure_publishable(draft)?;
        let previous = draft.publish_state;
        draft.publish_state = PublishState::Changed;
        let saved: PublishResult<RecordKey> = self
            .store
            .write_scope(|| self.save_with(draft, SaveMode::KeepState));
        if let Err(err) = saved {
            draft.publish_state = previous;
            return Err(err);
        }
        Ok(())
    }

    /// Publishes one draft with a fresh visited set.
    pub fn publish(&self, draft: &mut Record, dry_run: bool) -> PublishResult<PublishOutcome> {
        let mut visited = VisitedSet::new();
        let public = self.publish_with(draft, dry_run, &mut visited)?;
        Ok(PublishOutcome { public, visited })
    }

    /// Publishes one draft, recording into a caller-supplied visited set.
    ///
    /// A pending-delete draft runs the deletion cascade and yields `None`.
    /// A draft already in `visited` yields the mirror recorded there.
    pub fn publish_with(
        &self,
        draft: &mut Record,
        dry_run: bool,
        visited: &mut VisitedSet,
    ) -> PublishResult<Option<Record>> {
        let key = self.ensure_publishable(draft)?;
        let public_key = self.run_top_level("publish", draft, dry_run, |draft| {
            self.publish_inner(draft, dry_run, visited, None)
        })?;

        let public = match public_key {
            Some(public_key) => match visited.public(key) {
                Some(public) => Some(public.clone()),
                None => self.store.get(public_key)?,
            },
            None => None,
        };
        info!(
            "event=publish module=service status=ok record_type={} key={} dry_run={} visited={}",
            draft.record_type,
            key,
            dry_run,
            visited.len()
        );
        Ok(public)
    }

    /// Publishes several drafts sharing one visited set and one write scope.
    pub fn publish_all(&self, drafts: &mut [Record], dry_run: bool) -> PublishResult<VisitedSet> {
        for draft in drafts.iter() {
            self.ensure_publishable(draft)?;
        }

        let mut visited = VisitedSet::new();
        let snapshot = drafts.to_vec();
        let result = if dry_run {
            self.publish_batch(drafts, dry_run, &mut visited)
        } else {
            self.store
                .write_scope(|| self.publish_batch(drafts, dry_run, &mut visited))
        };
        if let Err(err) = result {
            if !dry_run {
                drafts.clone_from_slice(&snapshot);
            }
            warn!(
                "event=publish module=service status=error batch_size={} error={}",
                drafts.len(),
                err
            );
            return Err(err);
        }

        info!(
            "event=publish module=service status=ok batch_size={} dry_run={} visited={}",
            drafts.len(),
            dry_run,
            visited.len()
        );
        Ok(visited)
    }

    fn publish_batch(
        &self,
        drafts: &mut [Record],
        dry_run: bool,
        visited: &mut VisitedSet,
    ) -> PublishResult<()> {
        for draft in drafts.iter_mut() {
            self.publish_inner(draft, dry_run, visited, None)?;
        }
        Ok(())
    }

    /// Runs the deletion cascade rooted at a pending-delete draft.
    ///
    /// Drafts in any other state are left alone and yield an empty set.
    pub fn publish_deletions(&self, draft: &mut Record, dry_run: bool) -> PublishResult<VisitedSet> {
        let key = self.ensure_publishable(draft)?;
        let mut visited = VisitedSet::new();
        self.run_top_level("publish_deletions", draft, dry_run, |draft| {
            self.publish_deletions_inner(draft, dry_run, &mut visited, None)
        })?;
        info!(
            "event=publish_deletions module=service status=ok record_type={} key={} dry_run={} visited={}",
            draft.record_type,
            key,
            dry_run,
            visited.len()
        );
        Ok(visited)
    }

    /// Removes the public mirror and detaches the draft from it.
    ///
    /// The draft is saved with change tracking, so it becomes `Changed`.
    /// Returns the mirror that was (or, on a dry run, would be) removed.
    pub fn unpublish(&self, draft: &mut Record, dry_run: bool) -> PublishResult<Option<Record>> {
        let key = self.ensure_publishable(draft)?;
        let Some(public_key) = draft.public_key else {
            return Ok(None);
        };
        let public = self.store.get(public_key)?;
        if dry_run {
            return Ok(public);
        }

        self.run_top_level("unpublish", draft, dry_run, |draft| {
            draft.public_key = None;
            self.save(draft)?;
            self.store.remove(public_key)?;
            Ok(())
        })?;
        info!(
            "event=unpublish module=service status=ok record_type={} key={} public_key={}",
            draft.record_type, key, public_key
        );
        Ok(public)
    }

    /// Rejects public and unsaved records; returns the draft's key.
    pub(super) fn ensure_publishable(&self, record: &Record) -> PublishResult<RecordKey> {
        if record.is_public {
            return Err(PublishError::InvalidState(format!(
                "{} is public; publish from its draft instead",
                describe(record)
            )));
        }
        record.key.ok_or_else(|| {
            PublishError::PrecondNotMet(format!("save {} before publishing", describe(record)))
        })
    }

    pub(super) fn emit_before(&self, record: &Record, dry_run: bool, deleted: bool) {
        if dry_run {
            return;
        }
        for hook in &self.hooks {
            hook.before_publish(record, deleted);
        }
    }

    pub(super) fn emit_after(
        &self,
        key: RecordKey,
        dry_run: bool,
        visited: &VisitedSet,
        deleted: bool,
    ) {
        if dry_run {
            return;
        }
        let Some(record) = visited.original(key) else {
            return;
        };
        for hook in &self.hooks {
            hook.after_publish(record, deleted);
        }
    }

    /// Runs `work` in the write scope unless dry, restoring `draft` on failure.
    fn run_top_level<T>(
        &self,
        event: &'static str,
        draft: &mut Record,
        dry_run: bool,
        work: impl FnOnce(&mut Record) -> PublishResult<T>,
    ) -> PublishResult<T> {
        if dry_run {
            return work(draft);
        }

        let snapshot = draft.clone();
        let result = self.store.write_scope(|| work(draft));
        if let Err(err) = &result {
            warn!(
                "event={} module=service status=error record_type={} key={} error={}",
                event,
                snapshot.record_type,
                snapshot
                    .key
                    .map(|key| key.to_string())
                    .unwrap_or_default(),
                err
            );
            *draft = snapshot;
        }
        result
    }
}

fn describe(record: &Record) -> String {
    match record.key {
        Some(key) => format!("{} {}", record.record_type, key),
        None => format!("unsaved {}", record.record_type),
    }
}
