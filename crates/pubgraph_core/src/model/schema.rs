//! Static per-type publish descriptors and their registry.
//!
//! # Responsibility
//! - Declare, once at startup, which fields and relations each record type
//!   copies or traverses when publishing.
//! - Validate declarations against each other before any publish runs.
//!
//! # Invariants
//! - Type and member names match `^[a-z][a-z0-9_]*$` and never collide with
//!   the reserved record columns.
//! - Every reverse relation points at a child link that targets the owner type.
//! - A many-to-many through mapping names a reverse relation of the owner.

use crate::model::record::{FieldValue, Record};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

static MEMBER_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid member name regex"));

const RESERVED_NAMES: &[&str] = &[
    "id",
    "key",
    "record_type",
    "is_public",
    "publish_state",
    "public",
    "public_key",
    "draft",
];

/// Per-field copy override, applied to the public mirror instead of plain assignment.
pub type FieldCopyFn = Arc<dyn Fn(&mut Record, FieldValue) + Send + Sync>;

/// Decides whether a draft's own fields need copying at all.
pub type ChangePredicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

pub type SchemaResult<T> = Result<T, SchemaError>;

/// Declaration and record-shape errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    InvalidName(String),
    ReservedName {
        record_type: String,
        member: String,
    },
    DuplicateType(String),
    DuplicateMember {
        record_type: String,
        member: String,
    },
    UnknownType(String),
    /// A relation points at a type that is not registered.
    UnknownTarget {
        record_type: String,
        relation: String,
        target: String,
    },
    /// A reverse relation names a child link that does not target the owner.
    DanglingReverse {
        record_type: String,
        relation: String,
    },
    /// A name used in `publish_reverse` or a through mapping is not a reverse relation.
    UnknownReverse {
        record_type: String,
        relation: String,
    },
    UnknownField {
        record_type: String,
        field: String,
    },
    UnknownRelation {
        record_type: String,
        relation: String,
    },
    TypeMismatch {
        expected: String,
        actual: String,
    },
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(name) => write!(f, "invalid schema name `{name}`"),
            Self::ReservedName {
                record_type,
                member,
            } => write!(f, "`{member}` is reserved and cannot be declared on `{record_type}`"),
            Self::DuplicateType(name) => write!(f, "record type already registered: {name}"),
            Self::DuplicateMember {
                record_type,
                member,
            } => write!(f, "`{member}` declared twice on `{record_type}`"),
            Self::UnknownType(name) => write!(f, "record type not registered: {name}"),
            Self::UnknownTarget {
                record_type,
                relation,
                target,
            } => write!(
                f,
                "relation `{record_type}.{relation}` targets unregistered type `{target}`"
            ),
            Self::DanglingReverse {
                record_type,
                relation,
            } => write!(
                f,
                "reverse relation `{record_type}.{relation}` has no matching child link"
            ),
            Self::UnknownReverse {
                record_type,
                relation,
            } => write!(
                f,
                "`{relation}` is not a reverse relation of `{record_type}`"
            ),
            Self::UnknownField { record_type, field } => {
                write!(f, "field `{field}` is not declared on `{record_type}`")
            }
            Self::UnknownRelation {
                record_type,
                relation,
            } => write!(f, "relation `{relation}` is not declared on `{record_type}`"),
            Self::TypeMismatch { expected, actual } => {
                write!(f, "expected a `{expected}` record, got `{actual}`")
            }
        }
    }
}

impl Error for SchemaError {}

/// Where a relation points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationTarget {
    /// A registered type with its own draft/public pair.
    Publishable(String),
    /// Anything else; the key is copied verbatim.
    External,
}

/// Forward single-valued relation stored in `Record::links`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRelation {
    pub name: String,
    pub target: RelationTarget,
}

/// Many-to-many relation stored in the collection table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManyToManyRelation {
    pub name: String,
    pub target: RelationTarget,
    /// Reverse relation that publishes the association records instead.
    pub through_reverse: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Many,
    One,
}

/// Children of `child_type` whose `child_link` points at the owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseRelation {
    pub name: String,
    pub child_type: String,
    pub child_link: String,
    pub cardinality: Cardinality,
}

/// Publish descriptor for one record type.
///
/// Built with chained calls and handed to [`PublishRegistry::register`].
#[derive(Clone)]
pub struct RecordType {
    name: String,
    verbose_name: String,
    label_field: Option<String>,
    scalar_fields: Vec<String>,
    forward: Vec<ForwardRelation>,
    many_to_many: Vec<ManyToManyRelation>,
    reverse: Vec<ReverseRelation>,
    excluded: BTreeSet<String>,
    publish_reverse: Vec<String>,
    copy_overrides: BTreeMap<String, FieldCopyFn>,
    changes_need_publishing: Option<ChangePredicate>,
}

impl Debug for RecordType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordType")
            .field("name", &self.name)
            .field("scalar_fields", &self.scalar_fields)
            .field("forward", &self.forward)
            .field("many_to_many", &self.many_to_many)
            .field("reverse", &self.reverse)
            .field("excluded", &self.excluded)
            .field("publish_reverse", &self.publish_reverse)
            .field(
                "copy_overrides",
                &self.copy_overrides.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl RecordType {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            verbose_name: name.replace('_', " "),
            name,
            label_field: None,
            scalar_fields: Vec::new(),
            forward: Vec::new(),
            many_to_many: Vec::new(),
            reverse: Vec::new(),
            excluded: BTreeSet::new(),
            publish_reverse: Vec::new(),
            copy_overrides: BTreeMap::new(),
            changes_need_publishing: None,
        }
    }

    pub fn verbose_name(mut self, verbose_name: impl Into<String>) -> Self {
        self.verbose_name = verbose_name.into();
        self
    }

    /// Scalar field used as the human-readable label of a record.
    pub fn label_field(mut self, field: impl Into<String>) -> Self {
        self.label_field = Some(field.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.scalar_fields.push(name.into());
        self
    }

    /// Forward relation to another publishable type.
    pub fn link(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.forward.push(ForwardRelation {
            name: name.into(),
            target: RelationTarget::Publishable(target.into()),
        });
        self
    }

    /// Forward relation to a non-publishable target.
    pub fn external_link(mut self, name: impl Into<String>) -> Self {
        self.forward.push(ForwardRelation {
            name: name.into(),
            target: RelationTarget::External,
        });
        self
    }

    pub fn many_to_many(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.many_to_many.push(ManyToManyRelation {
            name: name.into(),
            target: RelationTarget::Publishable(target.into()),
            through_reverse: None,
        });
        self
    }

    pub fn external_many_to_many(mut self, name: impl Into<String>) -> Self {
        self.many_to_many.push(ManyToManyRelation {
            name: name.into(),
            target: RelationTarget::External,
            through_reverse: None,
        });
        self
    }

    /// Many-to-many whose association records are publishable themselves.
    ///
    /// Publishing walks `reverse_name` instead of copying the collection.
    pub fn many_to_many_through(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        reverse_name: impl Into<String>,
    ) -> Self {
        self.many_to_many.push(ManyToManyRelation {
            name: name.into(),
            target: RelationTarget::Publishable(target.into()),
            through_reverse: Some(reverse_name.into()),
        });
        self
    }

    /// One-to-many reverse relation.
    pub fn reverse(
        self,
        name: impl Into<String>,
        child_type: impl Into<String>,
        child_link: impl Into<String>,
    ) -> Self {
        self.push_reverse(name, child_type, child_link, Cardinality::Many)
    }

    /// One-to-one reverse relation.
    pub fn reverse_one(
        self,
        name: impl Into<String>,
        child_type: impl Into<String>,
        child_link: impl Into<String>,
    ) -> Self {
        self.push_reverse(name, child_type, child_link, Cardinality::One)
    }

    fn push_reverse(
        mut self,
        name: impl Into<String>,
        child_type: impl Into<String>,
        child_link: impl Into<String>,
        cardinality: Cardinality,
    ) -> Self {
        self.reverse.push(ReverseRelation {
            name: name.into(),
            child_type: child_type.into(),
            child_link: child_link.into(),
            cardinality,
        });
        self
    }

    /// Never copy or traverse this member.
    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.excluded.insert(name.into());
        self
    }

    /// Publish the children of this reverse relation along with the owner.
    pub fn publish_reverse(mut self, name: impl Into<String>) -> Self {
        self.publish_reverse.push(name.into());
        self
    }

    pub fn copy_with<F>(mut self, field: impl Into<String>, copy: F) -> Self
    where
        F: Fn(&mut Record, FieldValue) + Send + Sync + 'static,
    {
        self.copy_overrides.insert(field.into(), Arc::new(copy));
        self
    }

    pub fn changes_need_publishing<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.changes_need_publishing = Some(Arc::new(predicate));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn verbose(&self) -> &str {
        &self.verbose_name
    }

    pub fn scalar_fields(&self) -> impl Iterator<Item = &str> {
        self.scalar_fields.iter().map(String::as_str)
    }

    pub fn forward_relations(&self) -> &[ForwardRelation] {
        &self.forward
    }

    pub fn many_to_many_relations(&self) -> &[ManyToManyRelation] {
        &self.many_to_many
    }

    pub fn reverse_relations(&self) -> &[ReverseRelation] {
        &self.reverse
    }

    pub fn reverse_relation(&self, name: &str) -> Option<&ReverseRelation> {
        self.reverse.iter().find(|relation| relation.name == name)
    }

    pub fn many_to_many_relation(&self, name: &str) -> Option<&ManyToManyRelation> {
        self.many_to_many.iter().find(|relation| relation.name == name)
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded.contains(name)
    }

    /// Reverse relation names published alongside the owner, in declaration order.
    pub fn reverse_fields_to_publish(&self) -> &[String] {
        &self.publish_reverse
    }

    pub fn copy_override(&self, field: &str) -> Option<&FieldCopyFn> {
        self.copy_overrides.get(field)
    }

    /// Defaults to `true` when no predicate is declared.
    pub fn needs_publishing(&self, draft: &Record) -> bool {
        self.changes_need_publishing
            .as_ref()
            .map_or(true, |predicate| predicate(draft))
    }

    /// Human-readable label for listings: the label field when set, else the key.
    pub fn label_of(&self, record: &Record) -> String {
        let label = self
            .label_field
            .as_deref()
            .and_then(|field| record.field(field))
            .and_then(FieldValue::as_text);
        match (label, record.key) {
            (Some(label), _) => label.to_string(),
            (None, Some(key)) => format!("{} {}", self.verbose_name, key),
            (None, None) => format!("unsaved {}", self.verbose_name),
        }
    }

    /// Checks that a record only carries members declared on this type.
    pub fn validate_record(&self, record: &Record) -> SchemaResult<()> {
        if record.record_type != self.name {
            return Err(SchemaError::TypeMismatch {
                expected: self.name.clone(),
                actual: record.record_type.clone(),
            });
        }
        if let Some(field) = record
            .fields
            .keys()
            .find(|field| !self.scalar_fields.contains(*field))
        {
            return Err(SchemaError::UnknownField {
                record_type: self.name.clone(),
                field: field.clone(),
            });
        }
        if let Some(link) = record
            .links
            .keys()
            .find(|link| !self.forward.iter().any(|relation| &relation.name == *link))
        {
            return Err(SchemaError::UnknownRelation {
                record_type: self.name.clone(),
                relation: link.clone(),
            });
        }
        Ok(())
    }

    fn member_names(&self) -> impl Iterator<Item = &str> {
        self.scalar_fields
            .iter()
            .map(String::as_str)
            .chain(self.forward.iter().map(|relation| relation.name.as_str()))
            .chain(self.many_to_many.iter().map(|relation| relation.name.as_str()))
            .chain(self.reverse.iter().map(|relation| relation.name.as_str()))
    }

    fn check_names(&self) -> SchemaResult<()> {
        check_name(&self.name)?;
        let mut seen = BTreeSet::new();
        for member in self.member_names() {
            check_name(member)?;
            if RESERVED_NAMES.contains(&member) {
                return Err(SchemaError::ReservedName {
                    record_type: self.name.clone(),
                    member: member.to_string(),
                });
            }
            if !seen.insert(member) {
                return Err(SchemaError::DuplicateMember {
                    record_type: self.name.clone(),
                    member: member.to_string(),
                });
            }
        }
        if let Some(field) = self
            .copy_overrides
            .keys()
            .find(|field| !self.scalar_fields.contains(*field))
        {
            return Err(SchemaError::UnknownField {
                record_type: self.name.clone(),
                field: field.clone(),
            });
        }
        Ok(())
    }
}

/// All publishable types known to one application.
#[derive(Debug, Clone, Default)]
pub struct PublishRegistry {
    types: BTreeMap<String, RecordType>,
}

impl PublishRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one type after checking its names.
    ///
    /// Cross-type references are checked later by [`PublishRegistry::validate`].
    pub fn register(&mut self, record_type: RecordType) -> SchemaResult<()> {
        record_type.check_names()?;
        if self.types.contains_key(record_type.name()) {
            return Err(SchemaError::DuplicateType(record_type.name.clone()));
        }
        self.types.insert(record_type.name.clone(), record_type);
        Ok(())
    }

    pub fn get(&self, name: &str) -> SchemaResult<&RecordType> {
        self.types
            .get(name)
            .ok_or_else(|| SchemaError::UnknownType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Registered types sorted by name.
    pub fn types(&self) -> impl Iterator<Item = &RecordType> {
        self.types.values()
    }

    pub fn validate_record(&self, record: &Record) -> SchemaResult<()> {
        self.get(&record.record_type)?.validate_record(record)
    }

    /// Resolves every cross-type reference.
    pub fn validate(&self) -> SchemaResult<()> {
        for record_type in self.types.values() {
            for relation in &record_type.forward {
                self.check_target(record_type, &relation.name, &relation.target)?;
            }
            for relation in &record_type.many_to_many {
                self.check_target(record_type, &relation.name, &relation.target)?;
                if let Some(reverse_name) = &relation.through_reverse {
                    if record_type.reverse_relation(reverse_name).is_none() {
                        return Err(SchemaError::UnknownReverse {
                            record_type: record_type.name.clone(),
                            relation: reverse_name.clone(),
                        });
                    }
                }
            }
            for relation in &record_type.reverse {
                let child = self.get(&relation.child_type).map_err(|_| {
                    SchemaError::UnknownTarget {
                        record_type: record_type.name.clone(),
                        relation: relation.name.clone(),
                        target: relation.child_type.clone(),
                    }
                })?;
                let points_back = child.forward.iter().any(|link| {
                    link.name == relation.child_link
                        && link.target == RelationTarget::Publishable(record_type.name.clone())
                });
                if !points_back {
                    return Err(SchemaError::DanglingReverse {
                        record_type: record_type.name.clone(),
                        relation: relation.name.clone(),
                    });
                }
            }
            if let Some(name) = record_type
                .publish_reverse
                .iter()
                .find(|name| record_type.reverse_relation(name).is_none())
            {
                return Err(SchemaError::UnknownReverse {
                    record_type: record_type.name.clone(),
                    relation: name.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_target(
        &self,
        owner: &RecordType,
        relation: &str,
        target: &RelationTarget,
    ) -> SchemaResult<()> {
        match target {
            RelationTarget::Publishable(target) if !self.contains(target) => {
                Err(SchemaError::UnknownTarget {
                    record_type: owner.name.clone(),
                    relation: relation.to_string(),
                    target: target.clone(),
                })
            }
            _ => Ok(()),
        }
    }
}

fn check_name(name: &str) -> SchemaResult<()> {
    if MEMBER_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(SchemaError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::{PublishRegistry, RecordType, SchemaError};
    use crate::model::record::{FieldValue, Record};

    fn page_and_category() -> PublishRegistry {
        let mut registry = PublishRegistry::new();
        registry
            .register(
                RecordType::new("page")
                    .field("title")
                    .field("slug")
                    .link("parent", "page")
                    .many_to_many("categories", "category")
                    .reverse("children", "page", "parent"),
            )
            .unwrap();
        registry
            .register(RecordType::new("category").field("name"))
            .unwrap();
        registry
    }

    #[test]
    fn registry_validates_cross_references() {
        page_and_category().validate().unwrap();
    }

    #[test]
    fn unregistered_link_target_is_rejected() {
        let mut registry = PublishRegistry::new();
        registry
            .register(RecordType::new("page").link("author", "person"))
            .unwrap();
        assert!(matches!(
            registry.validate(),
            Err(SchemaError::UnknownTarget { target, .. }) if target == "person"
        ));
    }

    #[test]
    fn reverse_relation_must_match_child_link() {
        let mut registry = page_and_category();
        registry
            .register(RecordType::new("tag").reverse("pages", "page", "tag"))
            .unwrap();
        assert!(matches!(
            registry.validate(),
            Err(SchemaError::DanglingReverse { relation, .. }) if relation == "pages"
        ));
    }

    #[test]
    fn through_mapping_requires_declared_reverse() {
        let mut registry = PublishRegistry::new();
        registry
            .register(
                RecordType::new("book").many_to_many_through("authors", "person", "authorships"),
            )
            .unwrap();
        registry.register(RecordType::new("person")).unwrap();
        assert!(matches!(
            registry.validate(),
            Err(SchemaError::UnknownReverse { relation, .. }) if relation == "authorships"
        ));
    }

    #[test]
    fn reserved_and_duplicate_names_are_rejected() {
        let mut registry = PublishRegistry::new();
        assert!(matches!(
            registry.register(RecordType::new("page").field("public_key")),
            Err(SchemaError::ReservedName { .. })
        ));
        assert!(matches!(
            registry.register(RecordType::new("page").field("title").link("title", "page")),
            Err(SchemaError::DuplicateMember { .. })
        ));
        assert!(matches!(
            registry.register(RecordType::new("Page")),
            Err(SchemaError::InvalidName(_))
        ));
        registry.register(RecordType::new("page")).unwrap();
        assert!(matches!(
            registry.register(RecordType::new("page")),
            Err(SchemaError::DuplicateType(_))
        ));
    }

    #[test]
    fn validate_record_rejects_undeclared_members() {
        let registry = page_and_category();
        let ok = Record::draft("page").with_field("title", "Home");
        registry.validate_record(&ok).unwrap();

        let bad = Record::draft("page").with_field("body", "text");
        assert!(matches!(
            registry.validate_record(&bad),
            Err(SchemaError::UnknownField { field, .. }) if field == "body"
        ));
        assert!(matches!(
            registry.validate_record(&Record::draft("post")),
            Err(SchemaError::UnknownType(_))
        ));
    }

    #[test]
    fn copy_override_and_predicate_are_looked_up_by_field() {
        let record_type = RecordType::new("page")
            .field("slug")
            .label_field("slug")
            .copy_with("slug", |target, value| {
                let slug = value.as_text().unwrap_or_default().to_lowercase();
                target.set_field("slug", slug);
            })
            .changes_need_publishing(|draft| draft.field("slug").is_some());

        let mut target = Record::draft("page");
        let copy = record_type.copy_override("slug").unwrap();
        copy(&mut target, FieldValue::from("About-Us"));
        assert_eq!(target.field("slug"), Some(&FieldValue::from("about-us")));
        assert_eq!(record_type.label_of(&target), "about-us");

        assert!(record_type.needs_publishing(&target));
        assert!(!record_type.needs_publishing(&Record::draft("page")));
        assert!(RecordType::new("category").needs_publishing(&Record::draft("category")));
    }
}
