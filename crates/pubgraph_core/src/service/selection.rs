//! Bulk actions over a user's selection of drafts.
//!
//! # Responsibility
//! - Gate each selected record through a `PermissionPolicy`.
//! - Preview a publish as a nested dry-run tree before committing it.
//! - List draft choices for related-record pickers.
//!
//! # Invariants
//! - A denied record aborts the whole action before anything is written.
//! - An unconfirmed publish never writes.

use crate::model::record::{Record, RecordKey};
use crate::publish::visited::{NestedItem, VisitedSet};
use crate::repo::record_repo::RecordStore;
use crate::service::permission_service::PermissionPolicy;
use crate::service::publish_service::{
    DeleteOutcome, PublishError, PublishResult, PublishService,
};
use log::info;

/// Outcome of `publish_selected`.
#[derive(Debug, Clone)]
pub enum SelectionOutcome {
    /// Not confirmed yet: what a publish would touch.
    Preview(Vec<NestedItem>),
    /// Committed.
    Published { count: usize, visited: VisitedSet },
}

/// Publishes the selection once `confirmed`, otherwise returns a preview.
///
/// The preview shares one visited set across the selection, so a record
/// reachable from several selected drafts is listed once.
pub fn publish_selected<S, P>(
    service: &PublishService<S>,
    policy: &P,
    records: &mut [Record],
    confirmed: bool,
) -> PublishResult<SelectionOutcome>
where
    S: RecordStore,
    P: PermissionPolicy + ?Sized,
{
    check_each(records, "publish", |record| policy.can_publish(record))?;

    if !confirmed {
        let preview = service.publish_all(records, true)?;
        return Ok(SelectionOutcome::Preview(preview.nested_items()));
    }

    let visited = service.publish_all(records, false)?;
    info!(
        "event=publish_selected module=service status=ok count={} visited={}",
        records.len(),
        visited.len()
    );
    Ok(SelectionOutcome::Published {
        count: records.len(),
        visited,
    })
}

/// Marks the selection for deletion after checking delete permission per record.
pub fn delete_selected<S, P>(
    service: &PublishService<S>,
    policy: &P,
    records: &mut [Record],
) -> PublishResult<Vec<DeleteOutcome>>
where
    S: RecordStore,
    P: PermissionPolicy + ?Sized,
{
    check_each(records, "delete", |record| policy.can_delete(record))?;
    service.delete_all(records)
}

/// `(key, label)` pairs of every draft of `record_type`, pending deletes included.
pub fn draft_choices<S: RecordStore>(
    service: &PublishService<S>,
    record_type: &str,
) -> PublishResult<Vec<(RecordKey, String)>> {
    let descriptor = service.registry().get(record_type)?;
    Ok(service
        .draft_and_deleted(record_type)?
        .into_iter()
        .filter_map(|record| {
            let label = descriptor.label_of(&record);
            record.key.map(|key| (key, label))
        })
        .collect())
}

fn check_each(
    records: &[Record],
    action: &'static str,
    allowed: impl Fn(&Record) -> bool,
) -> PublishResult<()> {
    for record in records {
        if !allowed(record) {
            let key = record.key.ok_or_else(|| {
                PublishError::PrecondNotMet(format!("save {} before {action}", record.record_type))
            })?;
            return Err(PublishError::PermissionDenied { action, key });
        }
    }
    Ok(())
}
