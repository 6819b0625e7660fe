//! Publishable record model.
//!
//! # Responsibility
//! - Define the draft/public record shape shared by every record type.
//! - Provide lifecycle helpers for the tri-state publish flag.
//!
//! # Invariants
//! - `is_public` is fixed at construction.
//! - `public_key` is only ever set on drafts; it names the public mirror.
//! - `key` is `None` until the record is first saved.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Persistent record identity.
pub type RecordKey = Uuid;

/// Publication lifecycle of a draft.
///
/// Only meaningful when `is_public == false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishState {
    /// Draft matches its public mirror.
    Default,
    /// Draft has unpublished edits.
    Changed,
    /// Draft is logically deleted; the mirror goes on the next publish pass.
    PendingDelete,
}

impl PublishState {
    /// Stable storage/label value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Changed => "changed",
            Self::PendingDelete => "pending_delete",
        }
    }

    /// Parses the storage value written by [`PublishState::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "default" => Some(Self::Default),
            "changed" => Some(Self::Changed),
            "pending_delete" => Some(Self::PendingDelete),
            _ => None,
        }
    }

    /// Admin-facing label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Default => "Published",
            Self::Changed => "Changed",
            Self::PendingDelete => "To be deleted",
        }
    }
}

/// Scalar field value.
///
/// Serialized untagged so persisted `fields` JSON stays plain.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

/// One draft or public record of any registered type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Persistent identity; `None` before the first save.
    pub key: Option<RecordKey>,
    /// Registered type name.
    pub record_type: String,
    /// True for the public mirror, false for the draft.
    pub is_public: bool,
    pub publish_state: PublishState,
    /// Draft-side link to the public mirror.
    pub public_key: Option<RecordKey>,
    /// Scalar fields by name. Missing means null.
    pub fields: BTreeMap<String, FieldValue>,
    /// Forward single-valued relations by name. Missing means null.
    pub links: BTreeMap<String, RecordKey>,
}

impl Record {
    /// Creates an unsaved draft in the `Changed` state.
    pub fn draft(record_type: impl Into<String>) -> Self {
        Self {
            key: None,
            record_type: record_type.into(),
            is_public: false,
            publish_state: PublishState::Changed,
            public_key: None,
            fields: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }

    /// Creates an empty public mirror with a preallocated identity.
    ///
    /// The key lets cyclic references resolve to the mirror before it is stored.
    pub fn public_mirror(record_type: impl Into<String>) -> Self {
        Self {
            key: Some(Uuid::new_v4()),
            record_type: record_type.into(),
            is_public: true,
            publish_state: PublishState::Default,
            public_key: None,
            fields: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }

    /// Builder-style scalar setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set_field(name, value);
        self
    }

    /// Builder-style forward relation setter.
    pub fn with_link(mut self, name: impl Into<String>, target: RecordKey) -> Self {
        self.links.insert(name.into(), target);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Sets a scalar; `Null` removes the entry.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let name = name.into();
        match value.into() {
            FieldValue::Null => {
                self.fields.remove(&name);
            }
            value => {
                self.fields.insert(name, value);
            }
        }
    }

    pub fn link(&self, name: &str) -> Option<RecordKey> {
        self.links.get(name).copied()
    }

    /// Sets or clears a forward relation.
    pub fn set_link(&mut self, name: impl Into<String>, target: Option<RecordKey>) {
        let name = name.into();
        match target {
            Some(target) => {
                self.links.insert(name, target);
            }
            None => {
                self.links.remove(&name);
            }
        }
    }

    pub fn is_marked_for_deletion(&self) -> bool {
        self.publish_state == PublishState::PendingDelete
    }

    pub fn is_saved(&self) -> bool {
        self.key.is_some()
    }
}
