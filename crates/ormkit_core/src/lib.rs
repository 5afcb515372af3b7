//! Declarative object-relational mapping over a synchronous SQL connection.
//!
//! Models are declared in code, collected into a [`Registry`], materialized
//! as tables and used through an [`Environment`] bound to one connection.

pub mod constraint;
pub mod db;
pub mod env;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;
pub mod search;

pub use db::{
    open_db, open_db_in_memory, open_db_with, ConnectionOptions, DbError, DbResult, RecordId,
    SqlConnection, SqlRow, SqliteConnection, Value,
};
pub use env::{Environment, ModelHandle};
pub use error::{OrmError, OrmResult, ValidationError};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::definition::{ActionFn, ComputeFn, ConstraintFn, ModelDefinition};
pub use model::field::{Field, FieldKind, Junction};
pub use model::record::{FieldValue, Record};
pub use model::registry::{Registry, RegistryBuilder};
pub use search::domain::{Domain, Operator};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
