//! Declarative model layer.
//!
//! # Responsibility
//! - Describe fields and models, collect them into a registry and expose
//!   persisted instances as [`record::Record`].
//!
//! # See also
//! - `crate::env` for the CRUD surface bound to a connection.

pub mod definition;
pub mod field;
pub mod record;
pub mod registry;
