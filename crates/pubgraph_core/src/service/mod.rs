//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate record store calls into publish use-cases.
//! - Keep permission and selection concerns outside the publish core.

mod copy_engine;
mod deletion;
pub mod permission_service;
pub mod publish_service;
pub mod selection;
