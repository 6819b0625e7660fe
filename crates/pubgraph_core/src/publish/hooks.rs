//! Before/after publish notifications.

use crate::model::record::Record;

/// Observer notified around each non-dry-run copy or deletion.
///
/// `deleted` is true during deletion passes. `after_publish` receives the
/// canonical processed record, which may be a different instance than the one
/// handed to `before_publish` when a record is reached twice.
pub trait PublishHook {
    fn before_publish(&self, record: &Record, deleted: bool) {
        let _ = (record, deleted);
    }

    fn after_publish(&self, record: &Record, deleted: bool) {
        let _ = (record, deleted);
    }
}
