//! Repository layer: SQL for model rows and junction rows.
//!
//! # Responsibility
//! - Isolate statement text from the record engine in [`crate::env`].
//!
//! # Invariants
//! - Repository functions never open or close transactions; callers do.

pub mod record_repo;
pub mod relation_repo;
