//! Publish permission registration and per-record policy checks.
//!
//! # Responsibility
//! - Ensure one `publish_<type>` permission exists per registered type.
//! - Define the policy seam selection actions consult before acting.
//!
//! # Invariants
//! - Registration is get-or-create; running it twice adds nothing.
//! - Core publish paths never consult a policy.

use crate::model::record::Record;
use crate::model::schema::{PublishRegistry, RecordType};
use crate::repo::permission_repo::{PermissionRepository, PublishPermission};
use crate::repo::record_repo::RepoResult;
use log::info;
use std::collections::BTreeSet;

/// Permission entry for publishing records of `record_type`.
pub fn publish_permission_for(record_type: &RecordType) -> PublishPermission {
    PublishPermission {
        codename: format!("publish_{}", record_type.name()),
        name: format!("Can publish {}", record_type.verbose()),
        record_type: record_type.name().to_string(),
    }
}

/// Creates missing publish permissions. Returns how many were created.
pub fn register_publish_permissions<R: PermissionRepository>(
    repo: &R,
    registry: &PublishRegistry,
) -> RepoResult<usize> {
    let mut created = 0;
    for record_type in registry.types() {
        if repo.ensure_permission(&publish_permission_for(record_type))? {
            created += 1;
        }
    }
    info!(
        "event=permission_register module=service status=ok types={} created={}",
        registry.types().count(),
        created
    );
    Ok(created)
}

/// Decides whether the acting user may publish or delete one record.
pub trait PermissionPolicy {
    fn can_publish(&self, record: &Record) -> bool;
    fn can_delete(&self, record: &Record) -> bool;
}

/// Grants everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionPolicy for AllowAll {
    fn can_publish(&self, _record: &Record) -> bool {
        true
    }

    fn can_delete(&self, _record: &Record) -> bool {
        true
    }
}

/// Codename set held by one user, e.g. `publish_page` and `delete_page`.
///
/// Anything not granted is denied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantedPermissions {
    codenames: BTreeSet<String>,
}

impl GrantedPermissions {
    pub fn new<I, T>(codenames: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            codenames: codenames.into_iter().map(Into::into).collect(),
        }
    }

    pub fn grant(&mut self, codename: impl Into<String>) {
        self.codenames.insert(codename.into());
    }

    pub fn has(&self, codename: &str) -> bool {
        self.codenames.contains(codename)
    }
}

impl PermissionPolicy for GrantedPermissions {
    fn can_publish(&self, record: &Record) -> bool {
        self.has(&format!("publish_{}", record.record_type))
    }

    fn can_delete(&self, record: &Record) -> bool {
        self.has(&format!("delete_{}", record.record_type))
    }
}

#[cfg(test)]
mod tests {
    use super::{publish_permission_for, GrantedPermissions, PermissionPolicy};
    use crate::model::record::Record;
    use crate::model::schema::RecordType;

    #[test]
    fn permission_uses_verbose_name() {
        let permission =
            publish_permission_for(&RecordType::new("news_item").verbose_name("news article"));
        assert_eq!(permission.codename, "publish_news_item");
        assert_eq!(permission.name, "Can publish news article");
        assert_eq!(permission.record_type, "news_item");

        let default_verbose = publish_permission_for(&RecordType::new("news_item"));
        assert_eq!(default_verbose.name, "Can publish news item");
    }

    #[test]
    fn granted_permissions_deny_by_default() {
        let page = Record::draft("page");
        let mut granted = GrantedPermissions::new(["publish_page"]);
        assert!(granted.can_publish(&page));
        assert!(!granted.can_delete(&page));
        assert!(!granted.can_publish(&Record::draft("category")));

        granted.grant("delete_page");
        assert!(granted.can_delete(&page));
    }
}
