//! Repository layer abstractions and SQLite implementations.
//!
//! # Responsibility
//! - Define the storage contract the publish engine runs against.
//! - Keep SQL details out of the publish service.
//!
//! # Invariants
//! - Repositories return semantic errors (`NotFound`, `MissingKey`) in
//!   addition to DB transport errors.

pub mod permission_repo;
pub mod record_repo;
