//! Draft-to-public copy engine.
//!
//! # Responsibility
//! - Copy scalar fields and forward links of one draft onto its mirror.
//! - Resolve related drafts to their mirrors, publishing them on demand.
//! - Replace mirror collections and prune stale public children.
//!
//! # Invariants
//! - A draft already in the visited set is never copied twice; repeat
//!   references resolve to the mirror key recorded there.
//! - Dry runs recurse exactly like real runs but skip every write.

use crate::model::record::{PublishState, Record, RecordKey};
use crate::model::schema::{Cardinality, RecordType, RelationTarget};
use crate::publish::visited::VisitedSet;
use crate::repo::record_repo::{RecordStore, RepoError};
use crate::service::publish_service::{PublishResult, PublishService};
use log::{info, warn};

impl<S: RecordStore> PublishService<S> {
    /// Publishes changes or deletions depending on the draft's state.
    ///
    /// Returns the mirror key, `None` for a deletion pass.
    pub(super) fn publish_inner(
        &self,
        draft: &mut Record,
        dry_run: bool,
        visited: &mut VisitedSet,
        parent: Option<RecordKey>,
    ) -> PublishResult<Option<RecordKey>> {
        self.ensure_publishable(draft)?;
        if draft.is_marked_for_deletion() {
            self.publish_deletions_inner(draft, dry_run, visited, parent)?;
            return Ok(None);
        }
        self.publish_changes(draft, dry_run, visited, parent)
    }

    fn publish_changes(
        &self,
        draft: &mut Record,
        dry_run: bool,
        visited: &mut VisitedSet,
        parent: Option<RecordKey>,
    ) -> PublishResult<Option<RecordKey>> {
        let key = self.ensure_publishable(draft)?;
        if visited.contains(key) {
            // The caller's copy may predate the pass that published it.
            if !dry_run {
                if let Some(canonical) = visited.original(key) {
                    *draft = canonical.clone();
                }
            }
            return Ok(visited.public_key(key));
        }
        visited.add(draft, parent);

        let record_type = self.registry.get(&draft.record_type)?;
        let needs_publishing = record_type.needs_publishing(draft);
        let stored_mirror = match draft.public_key {
            Some(public_key) => self.store.get(public_key)?,
            None => None,
        };
        // A skipped copy never creates a mirror, so cycles must not see one.
        let mut mirror = match &stored_mirror {
            Some(existing) => Some(existing.clone()),
            None if needs_publishing => Some(Record::public_mirror(draft.record_type.as_str())),
            None => None,
        };
        visited.set_public_key(key, mirror.as_ref().and_then(|mirror| mirror.key));

        self.emit_before(draft, dry_run, false);

        if needs_publishing {
            if let Some(mirror) = mirror.as_mut() {
                self.copy_fields(record_type, draft, mirror, dry_run, visited)?;
                if !dry_run {
                    self.store_mirror(draft, mirror, stored_mirror.as_ref())?;
                }
            }
        }

        // Collections only attach to a mirror that exists in storage.
        let writable_mirror = if dry_run {
            None
        } else {
            mirror
                .as_ref()
                .and_then(|mirror| mirror.key)
                .filter(|mirror_key| draft.public_key == Some(*mirror_key))
        };

        let mut reverse_names = record_type.reverse_fields_to_publish().to_vec();
        self.copy_many_to_many(
            record_type,
            key,
            writable_mirror,
            dry_run,
            visited,
            &mut reverse_names,
        )?;
        self.publish_reverse_relations(
            record_type,
            key,
            writable_mirror,
            dry_run,
            visited,
            &reverse_names,
        )?;

        visited.complete(draft, mirror.clone());
        self.emit_after(key, dry_run, visited, false);
        Ok(mirror.and_then(|mirror| mirror.key))
    }

    /// Copies scalars and forward links. Dry runs only resolve links.
    fn copy_fields(
        &self,
        record_type: &RecordType,
        draft: &Record,
        mirror: &mut Record,
        dry_run: bool,
        visited: &mut VisitedSet,
    ) -> PublishResult<()> {
        if !dry_run {
            for field in record_type.scalar_fields() {
                if record_type.is_excluded(field) {
                    continue;
                }
                let value = draft.field(field).cloned().unwrap_or_default();
                match record_type.copy_override(field) {
                    Some(copy) => copy(mirror, value),
                    None => mirror.set_field(field, value),
                }
            }
        }

        for relation in record_type.forward_relations() {
            if record_type.is_excluded(&relation.name) {
                continue;
            }
            let target = match (draft.link(&relation.name), &relation.target) {
                (None, _) => None,
                (Some(target), RelationTarget::External) => Some(target),
                (Some(target), RelationTarget::Publishable(_)) => {
                    self.get_public_or_publish(target, dry_run, visited, draft.key)?
                }
            };
            if !dry_run {
                mirror.set_link(relation.name.as_str(), target);
            }
        }
        Ok(())
    }

    /// Writes the mirror when it differs from storage, then points the draft at it.
    fn store_mirror(
        &self,
        draft: &mut Record,
        mirror: &Record,
        stored_mirror: Option<&Record>,
    ) -> PublishResult<()> {
        let mirror_key = mirror.key.ok_or(RepoError::MissingKey)?;
        match stored_mirror {
            Some(stored) if stored == mirror => {}
            Some(_) => self.store.update(mirror)?,
            None => {
                self.store.insert(mirror)?;
            }
        }

        if draft.public_key != Some(mirror_key) || draft.publish_state != PublishState::Default {
            draft.public_key = Some(mirror_key);
            draft.publish_state = PublishState::Default;
            self.store.update(draft)?;
        }
        Ok(())
    }

    /// Mirror key of a related draft, publishing it first when it has none.
    fn get_public_or_publish(
        &self,
        target: RecordKey,
        dry_run: bool,
        visited: &mut VisitedSet,
        parent: Option<RecordKey>,
    ) -> PublishResult<Option<RecordKey>> {
        if visited.contains(target) {
            return Ok(visited.public_key(target));
        }
        let Some(mut related) = self.store.get(target)? else {
            warn!(
                "event=publish module=service status=skipped reason=missing_target key={}",
                target
            );
            return Ok(None);
        };
        if related.is_public {
            return Ok(Some(target));
        }
        if let Some(public_key) = related.public_key {
            return Ok(Some(public_key));
        }
        self.publish_inner(&mut related, dry_run, visited, parent)
    }

    /// Replaces each mirror collection with the resolved draft members.
    ///
    /// Through relations are not copied; their reverse relation is queued on
    /// `reverse_names` so the association records publish themselves.
    fn copy_many_to_many(
        &self,
        record_type: &RecordType,
        owner: RecordKey,
        writable_mirror: Option<RecordKey>,
        dry_run: bool,
        visited: &mut VisitedSet,
        reverse_names: &mut Vec<String>,
    ) -> PublishResult<()> {
        for relation in record_type.many_to_many_relations() {
            if record_type.is_excluded(&relation.name) {
                continue;
            }
            if let Some(reverse_name) = &relation.through_reverse {
                if !reverse_names.contains(reverse_name) {
                    reverse_names.push(reverse_name.clone());
                }
                continue;
            }

            let members = self.store.collection(owner, &relation.name)?;
            let resolved = match &relation.target {
                RelationTarget::External => members,
                RelationTarget::Publishable(_) => {
                    let mut resolved = Vec::with_capacity(members.len());
                    for member in members {
                        if let Some(public_key) =
                            self.get_public_or_publish(member, dry_run, visited, Some(owner))?
                        {
                            // A draft and its own mirror both resolve to the mirror.
                            if !resolved.contains(&public_key) {
                                resolved.push(public_key);
                            }
                        }
                    }
                    resolved
                }
            };

            if let Some(mirror_key) = writable_mirror {
                if self.store.collection(mirror_key, &relation.name)? != resolved {
                    self.store
                        .replace_collection(mirror_key, &relation.name, &resolved)?;
                }
            }
        }
        Ok(())
    }

    /// Publishes the children of each named reverse relation, then removes
    /// public children of the mirror that no draft child maps to anymore.
    fn publish_reverse_relations(
        &self,
        record_type: &RecordType,
        owner: RecordKey,
        writable_mirror: Option<RecordKey>,
        dry_run: bool,
        visited: &mut VisitedSet,
        reverse_names: &[String],
    ) -> PublishResult<()> {
        for name in reverse_names {
            if record_type.is_excluded(name) {
                continue;
            }
            let Some(relation) = record_type.reverse_relation(name) else {
                continue;
            };

            let mut children: Vec<Record> = self
                .store
                .list_referencing(&relation.child_type, &relation.child_link, owner, &[])?
                .into_iter()
                .filter(|child| !child.is_public)
                .collect();
            if relation.cardinality == Cardinality::One {
                children.truncate(1);
            }

            let mut keep = Vec::with_capacity(children.len());
            for child in &mut children {
                if let Some(public_key) = self.publish_inner(child, dry_run, visited, Some(owner))? {
                    keep.push(public_key);
                }
            }

            let Some(mirror_key) = writable_mirror else {
                continue;
            };
            if relation.cardinality == Cardinality::Many {
                self.prune_public_children(
                    &relation.child_type,
                    &relation.child_link,
                    mirror_key,
                    &keep,
                )?;
            }
        }
        Ok(())
    }

    fn prune_public_children(
        &self,
        child_type: &str,
        child_link: &str,
        mirror_key: RecordKey,
        keep: &[RecordKey],
    ) -> PublishResult<()> {
        let stale = self
            .store
            .list_referencing(child_type, child_link, mirror_key, keep)?;
        for record in stale.into_iter().filter(|record| record.is_public) {
            let Some(stale_key) = record.key else {
                continue;
            };
            self.store.remove(stale_key)?;
            info!(
                "event=prune_public module=service status=ok record_type={} key={} owner={}",
                child_type, stale_key, mirror_key
            );
        }
        Ok(())
    }
}
