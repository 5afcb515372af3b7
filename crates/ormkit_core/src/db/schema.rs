//! Schema materialization from model declarations.
//!
//! # Responsibility
//! - Derive one base table per model and one junction table per
//!   many-to-many pair.
//! - Apply that DDL idempotently and check an existing schema against it.
//!
//! # Invariants
//! - Every statement is `CREATE TABLE IF NOT EXISTS`; existing tables are
//!   never altered.
//! - A junction table is emitted once even when both endpoints declare it.
//! - Reverse-collection, many-to-many and computed fields add no column.

use super::{quote_ident, with_transaction, SqlConnection, Value};
use crate::error::{OrmError, OrmResult};
use crate::model::definition::{table_name_for, ModelDefinition};
use crate::model::field::{FieldKind, Junction};
use crate::model::registry::Registry;
use log::info;
use std::collections::BTreeSet;
use std::time::Instant;

/// DDL for a model's base table.
pub fn create_table_sql(model: &ModelDefinition) -> String {
    let mut columns = vec![format!(
        "{} INTEGER PRIMARY KEY AUTOINCREMENT",
        quote_ident("id")
    )];
    for (name, field) in model.stored_fields() {
        let Some(column_type) = field.column_type() else {
            continue;
        };
        let mut column = format!("{} {column_type}", quote_ident(name));
        if let FieldKind::Reference { target } = &field.kind {
            column.push_str(&format!(
                " REFERENCES {}({})",
                quote_ident(&table_name_for(target)),
                quote_ident("id")
            ));
        }
        columns.push(column);
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({});",
        quote_ident(model.table()),
        columns.join(", ")
    )
}

/// DDL for one junction table between `model` and `target`.
pub fn create_junction_sql(model: &ModelDefinition, target: &str, junction: &Junction) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         {col1} INTEGER NOT NULL REFERENCES {own}({id}) ON DELETE CASCADE, \
         {col2} INTEGER NOT NULL REFERENCES {other}({id}) ON DELETE CASCADE, \
         PRIMARY KEY ({col1}, {col2}));",
        table = quote_ident(&junction.table),
        col1 = quote_ident(&junction.column1),
        col2 = quote_ident(&junction.column2),
        own = quote_ident(model.table()),
        other = quote_ident(&table_name_for(target)),
        id = quote_ident("id"),
    )
}

/// All statements needed for `registry`: base tables first, then junctions.
pub fn schema_statements(registry: &Registry) -> OrmResult<Vec<String>> {
    let mut statements: Vec<String> = registry
        .models()
        .map(|model| create_table_sql(model))
        .collect();

    let mut seen = BTreeSet::new();
    for model in registry.models() {
        for (target, junction) in junctions_of(model)? {
            if seen.insert(junction.table.clone()) {
                statements.push(create_junction_sql(model, target, junction));
            }
        }
    }

    Ok(statements)
}

/// Creates every table of `registry` that does not exist yet.
///
/// # Side effects
/// - Runs all DDL in one transaction.
/// - Emits `schema_materialize` logging events.
pub fn materialize(conn: &dyn SqlConnection, registry: &Registry) -> OrmResult<()> {
    let started_at = Instant::now();
    let statements = schema_statements(registry)?;
    run_statements(conn, &statements)?;
    info!(
        "event=schema_materialize module=schema status=ok models={} statements={} duration_ms={}",
        registry.len(),
        statements.len(),
        started_at.elapsed().as_millis()
    );
    Ok(())
}

/// Creates one model's base table and its junction tables if absent.
pub fn materialize_model(
    conn: &dyn SqlConnection,
    registry: &Registry,
    model_name: &str,
) -> OrmResult<()> {
    let model = registry.get(model_name)?;
    let mut statements = vec![create_table_sql(&model)];
    for (target, junction) in junctions_of(&model)? {
        statements.push(create_junction_sql(&model, target, junction));
    }
    run_statements(conn, &statements)?;
    info!(
        "event=schema_materialize module=schema status=ok model={} statements={}",
        model.name(),
        statements.len()
    );
    Ok(())
}

/// Column names of `table` in declaration order; empty when it is absent.
pub fn table_columns(conn: &dyn SqlConnection, table: &str) -> OrmResult<Vec<String>> {
    let rows = conn.query(&format!("PRAGMA table_info({});", quote_ident(table)), &[])?;
    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        let name = row.get("name").and_then(Value::as_str).ok_or_else(|| {
            OrmError::InvalidData(format!("table_info of `{table}` returned no column name"))
        })?;
        columns.push(name.to_string());
    }
    Ok(columns)
}

/// Checks that a model's tables and columns exist as declared.
pub fn verify_model(conn: &dyn SqlConnection, model: &ModelDefinition) -> OrmResult<()> {
    let columns = table_columns(conn, model.table())?;
    if columns.is_empty() {
        return Err(OrmError::MissingRequiredTable(model.table().to_string()));
    }

    let expected = std::iter::once("id").chain(model.stored_fields().map(|(name, _)| name));
    for column in expected {
        if !columns.iter().any(|existing| existing == column) {
            return Err(OrmError::MissingRequiredColumn {
                table: model.table().to_string(),
                column: column.to_string(),
            });
        }
    }

    for (_, junction) in junctions_of(model)? {
        let junction_columns = table_columns(conn, &junction.table)?;
        if junction_columns.is_empty() {
            return Err(OrmError::MissingRequiredTable(junction.table.clone()));
        }
        for column in [&junction.column1, &junction.column2] {
            if !junction_columns.contains(column) {
                return Err(OrmError::MissingRequiredColumn {
                    table: junction.table.clone(),
                    column: column.clone(),
                });
            }
        }
    }

    Ok(())
}

fn junctions_of(model: &ModelDefinition) -> OrmResult<Vec<(&str, &Junction)>> {
    let mut junctions = Vec::new();
    for (name, field) in model.fields() {
        if let FieldKind::ManyToMany { target, junction } = &field.kind {
            let junction = junction.as_ref().ok_or_else(|| {
                OrmError::InvalidSchema(format!(
                    "{}.{}: junction names were never resolved",
                    model.name(),
                    name
                ))
            })?;
            junctions.push((target.as_str(), junction));
        }
    }
    Ok(junctions)
}

fn run_statements(conn: &dyn SqlConnection, statements: &[String]) -> OrmResult<()> {
    with_transaction(conn, || {
        for statement in statements {
            conn.execute(statement, &[])?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::{create_table_sql, schema_statements};
    use crate::model::definition::ModelDefinition;
    use crate::model::field::Field;
    use crate::model::registry::RegistryBuilder;

    #[test]
    fn base_table_has_one_column_per_stored_field() {
        let product = ModelDefinition::new("product.product")
            .with_field("name", Field::text("Name"))
            .with_field("price", Field::float("Price"))
            .with_field("active", Field::boolean("Active"))
            .with_field("category_id", Field::reference("Category", "product.category"))
            .with_field("tag_ids", Field::many_to_many("Tags", "product.tag"));

        assert_eq!(
            create_table_sql(&product),
            "CREATE TABLE IF NOT EXISTS \"product_product\" (\
             \"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
             \"name\" VARCHAR(255), \
             \"price\" REAL, \
             \"active\" INTEGER, \
             \"category_id\" INTEGER REFERENCES \"product_category\"(\"id\"));"
        );
    }

    #[test]
    fn junction_is_emitted_once_for_both_sides() {
        let mut builder = RegistryBuilder::new();
        builder
            .register(
                ModelDefinition::new("school.student")
                    .with_field("course_ids", Field::many_to_many("Courses", "school.course")),
            )
            .expect("student registers");
        builder
            .register(
                ModelDefinition::new("school.course")
                    .with_field("student_ids", Field::many_to_many("Students", "school.student")),
            )
            .expect("course registers");
        let registry = builder.build().expect("registry builds");

        let statements = schema_statements(&registry).expect("statements derive");
        assert_eq!(statements.len(), 3);
        let junctions: Vec<&String> = statements
            .iter()
            .filter(|sql| sql.contains("school_course_school_student_rel"))
            .collect();
        assert_eq!(junctions.len(), 1);
        assert!(junctions[0].contains("ON DELETE CASCADE"));
        assert!(junctions[0].contains("PRIMARY KEY (\"school_student_id\", \"school_course_id\")"));
    }
}
