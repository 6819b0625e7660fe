//! Visited-set tracker for one publish or deletion traversal.
//!
//! # Responsibility
//! - Guarantee each draft is processed at most once per traversal.
//! - Resolve a repeat reference to the canonical processed record and its
//!   public mirror.
//! - Expose the discovery tree for dry-run previews.
//!
//! # Invariants
//! - Identity is the persistent `RecordKey`, never instance equality.
//! - Each node has at most one discovery parent, entered before the node, so
//!   the nested view is always a forest.

use crate::model::record::{Record, RecordKey};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct VisitedNode {
    record: Record,
    parent: Option<RecordKey>,
    children: Vec<RecordKey>,
    public_key: Option<RecordKey>,
    public: Option<Record>,
}

/// One record in the nested preview, with everything reached through it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NestedItem {
    pub record: Record,
    pub children: Vec<NestedItem>,
}

impl NestedItem {
    /// Number of records in this subtree, itself included.
    pub fn subtree_len(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(NestedItem::subtree_len)
            .sum::<usize>()
    }
}

/// Identity map of processed records for one traversal.
#[derive(Debug, Clone, Default)]
pub struct VisitedSet {
    nodes: HashMap<RecordKey, VisitedNode>,
    order: Vec<RecordKey>,
    roots: Vec<RecordKey>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters `record` as reached through `parent`.
    ///
    /// Returns `false` for unsaved records and records already present. A
    /// parent that is not itself in the set makes the record a root.
    pub fn add(&mut self, record: &Record, parent: Option<RecordKey>) -> bool {
        let Some(key) = record.key else {
            return false;
        };
        if self.nodes.contains_key(&key) {
            return false;
        }

        let parent = parent.filter(|parent| self.nodes.contains_key(parent));
        match parent.and_then(|parent| self.nodes.get_mut(&parent)) {
            Some(parent_node) => parent_node.children.push(key),
            None => self.roots.push(key),
        }

        self.nodes.insert(
            key,
            VisitedNode {
                record: record.clone(),
                parent,
                children: Vec::new(),
                public_key: None,
                public: None,
            },
        );
        self.order.push(key);
        true
    }

    pub fn contains(&self, key: RecordKey) -> bool {
        self.nodes.contains_key(&key)
    }

    /// The canonical record for `key`: the first instance entered, updated
    /// with the outcome once processing finished.
    pub fn original(&self, key: RecordKey) -> Option<&Record> {
        self.nodes.get(&key).map(|node| &node.record)
    }

    /// Identity of the public mirror recorded for `key`.
    ///
    /// Available as soon as processing of `key` starts, so cyclic references
    /// resolve to the mirror before it is stored.
    pub fn public_key(&self, key: RecordKey) -> Option<RecordKey> {
        self.nodes.get(&key).and_then(|node| node.public_key)
    }

    /// The public mirror produced for `key`, once processing finished.
    pub fn public(&self, key: RecordKey) -> Option<&Record> {
        self.nodes.get(&key).and_then(|node| node.public.as_ref())
    }

    pub fn parent(&self, key: RecordKey) -> Option<RecordKey> {
        self.nodes.get(&key).and_then(|node| node.parent)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Keys in the order they were entered.
    pub fn keys(&self) -> impl Iterator<Item = RecordKey> + '_ {
        self.order.iter().copied()
    }

    /// Canonical records in the order they were entered.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.order
            .iter()
            .filter_map(|key| self.nodes.get(key).map(|node| &node.record))
    }

    /// Tree view: each root with the records first reached through it.
    pub fn nested_items(&self) -> Vec<NestedItem> {
        self.roots
            .iter()
            .filter_map(|key| self.nested_item(*key))
            .collect()
    }

    fn nested_item(&self, key: RecordKey) -> Option<NestedItem> {
        let node = self.nodes.get(&key)?;
        Some(NestedItem {
            record: node.record.clone(),
            children: node
                .children
                .iter()
                .filter_map(|child| self.nested_item(*child))
                .collect(),
        })
    }

    pub(crate) fn set_public_key(&mut self, key: RecordKey, public_key: Option<RecordKey>) {
        if let Some(node) = self.nodes.get_mut(&key) {
            node.public_key = public_key;
        }
    }

    /// Stores the processed state of `record` as the canonical instance.
    pub(crate) fn complete(&mut self, record: &Record, public: Option<Record>) {
        let Some(node) = record.key.and_then(|key| self.nodes.get_mut(&key)) else {
            return;
        };
        node.record = record.clone();
        if let Some(public) = public {
            node.public_key = public.key;
            node.public = Some(public);
        }
    }
}
