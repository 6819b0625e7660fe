//! Deletion cascade for pending-delete drafts.
//!
//! Children go first so no public record is left pointing at a removed
//! mirror. For each record the public mirror is removed before the draft.

use crate::model::record::{Record, RecordKey};
use crate::publish::visited::VisitedSet;
use crate::repo::record_repo::RecordStore;
use crate::service::publish_service::{PublishError, PublishResult, PublishService};
use log::info;

impl<S: RecordStore> PublishService<S> {
    pub(super) fn publish_deletions_inner(
        &self,
        draft: &Record,
        dry_run: bool,
        visited: &mut VisitedSet,
        parent: Option<RecordKey>,
    ) -> PublishResult<()> {
        if !draft.is_marked_for_deletion() {
            return Ok(());
        }
        let key = draft.key.ok_or_else(|| {
            PublishError::PrecondNotMet(format!(
                "unsaved {} cannot be deleted",
                draft.record_type
            ))
        })?;
        if !visited.add(draft, parent) {
            return Ok(());
        }

        self.emit_before(draft, dry_run, true);

        let record_type = self.registry.get(&draft.record_type)?;
        for relation in record_type.reverse_relations() {
            if record_type.is_excluded(&relation.name) {
                continue;
            }
            let children =
                self.store
                    .list_referencing(&relation.child_type, &relation.child_link, key, &[])?;
            for child in children.iter().filter(|child| !child.is_public) {
                self.publish_deletions_inner(child, dry_run, visited, Some(key))?;
            }
        }

        if !dry_run {
            if let Some(public_key) = draft.public_key {
                self.store.remove(public_key)?;
            }
            self.store.remove(key)?;
            info!(
                "event=publish_deletions module=service status=removed record_type={} key={} public_key={}",
                draft.record_type,
                key,
                draft
                    .public_key
                    .map(|public_key| public_key.to_string())
                    .unwrap_or_default()
            );
        }

        visited.complete(draft, None);
        self.emit_after(key, dry_run, visited, true);
        Ok(())
    }
}
