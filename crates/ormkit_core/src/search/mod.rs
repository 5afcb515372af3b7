//! Record selection.
//!
//! # Responsibility
//! - Build domain filters and translate them into SQL predicates.

pub mod domain;
