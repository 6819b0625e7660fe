//! Draft/public record model and static publish descriptors.
//!
//! # Responsibility
//! - Define the record shape shared by every publishable type.
//! - Declare per-type copy/traversal rules once, ahead of any publish call.
//!
//! # Invariants
//! - Records are identified by a stable `RecordKey` once saved.
//! - Relation traversal only follows what a `RecordType` declares.

pub mod record;
pub mod schema;
