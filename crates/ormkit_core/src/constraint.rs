//! Constraint engine.
//!
//! # Responsibility
//! - Select the constraint bindings a create or write triggers.
//! - Run them against the candidate record before the transaction commits.
//!
//! # Invariants
//! - A binding runs when its trigger fields intersect the touched fields.
//! - Triggered bindings run in declaration order; the first failure stops
//!   the run.
//! - Callers see either `OrmError::Validation` or `OrmError::Db`; any other
//!   error out of a check is reported as a storage failure.

use crate::env::Environment;
use crate::db::DbError;
use crate::error::{OrmError, OrmResult};
use crate::model::definition::{ConstraintBinding, ModelDefinition};
use crate::model::record::Record;
use log::{debug, warn};

/// Bindings of `model` triggered by `touched`, in declaration order.
pub fn triggered<'m>(model: &'m ModelDefinition, touched: &[String]) -> Vec<&'m ConstraintBinding> {
    model
        .constraints()
        .iter()
        .filter(|binding| binding.is_triggered_by(touched.iter().map(String::as_str)))
        .collect()
}

/// Runs every binding triggered by `touched` on `record`.
///
/// # Errors
/// - `OrmError::Validation` when a check rejects the record.
/// - `OrmError::Db` for a storage failure inside a check, or for any other
///   error a check returns.
pub fn run_constraints(env: &Environment<'_>, record: &Record, touched: &[String]) -> OrmResult<()> {
    for binding in triggered(record.model(), touched) {
        if let Err(err) = (binding.check)(record, env) {
            warn!(
                "event=constraint_check module=constraint status=error model={} id={} constraint={} validation={}",
                record.model_name(),
                record.id(),
                binding.name,
                err.is_validation()
            );
            return Err(as_check_failure(binding, err));
        }
        debug!(
            "event=constraint_check module=constraint status=ok model={} id={} constraint={}",
            record.model_name(),
            record.id(),
            binding.name
        );
    }
    Ok(())
}

fn as_check_failure(binding: &ConstraintBinding, err: OrmError) -> OrmError {
    match err {
        OrmError::Validation(_) | OrmError::Db(_) => err,
        other => OrmError::Db(DbError::Backend(format!(
            "constraint `{}` failed unexpectedly: {other}",
            binding.name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::triggered;
    use crate::model::definition::ModelDefinition;
    use crate::model::field::Field;

    #[test]
    fn only_intersecting_bindings_trigger_in_declaration_order() {
        let model = ModelDefinition::new("product.template")
            .with_field("name", Field::text("Name"))
            .with_field("cost_price", Field::float("Cost"))
            .with_field("sale_price", Field::float("Sale Price"))
            .with_constraint("check_name", &["name"], |_, _| Ok(()))
            .with_constraint("check_prices", &["sale_price", "cost_price"], |_, _| Ok(()))
            .with_constraint("check_cost", &["cost_price"], |_, _| Ok(()));

        let names = |touched: &[&str]| -> Vec<String> {
            let touched: Vec<String> = touched.iter().map(|name| name.to_string()).collect();
            triggered(&model, &touched)
                .into_iter()
                .map(|binding| binding.name.clone())
                .collect()
        };

        assert_eq!(names(&["cost_price"]), vec!["check_prices", "check_cost"]);
        assert_eq!(names(&["sale_price", "name"]), vec!["check_name", "check_prices"]);
        assert!(names(&[]).is_empty());
    }
}
