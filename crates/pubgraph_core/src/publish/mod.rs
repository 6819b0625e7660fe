//! Traversal bookkeeping shared by publish, unpublish and deletion passes.
//!
//! # Responsibility
//! - Track which drafts one top-level operation already processed.
//! - Carry before/after notifications to interested observers.
//!
//! # Invariants
//! - One `VisitedSet` per top-level call unless a batch shares it explicitly.
//! - Hooks never influence the outcome of a publish.

pub mod hooks;
pub mod visited;
