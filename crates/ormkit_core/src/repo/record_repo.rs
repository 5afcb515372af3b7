//! Base-table row persistence for any registered model.
//!
//! # Responsibility
//! - Build and run INSERT/UPDATE/DELETE/SELECT statements for one model.
//! - Check inbound values against field kinds and decode stored rows.
//!
//! # Invariants
//! - Only stored fields (scalar and reference) ever reach a statement.
//! - Every value is bound as a parameter; identifiers come from the
//!   validated declaration set and are quoted.
//! - Read paths reject rows whose values do not fit their field kind.

use crate::db::{quote_ident, RecordId, SqlConnection, SqlRow, Value};
use crate::error::{OrmError, OrmResult};
use crate::model::definition::ModelDefinition;
use crate::model::field::{Field, FieldKind};
use crate::model::record::Record;
use crate::search::domain::Predicate;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Upper bound of identifiers bound into one `IN (...)` list.
const FETCH_CHUNK_SIZE: usize = 500;

/// Inserts one row and returns the backend-assigned identifier.
pub fn insert_row(
    conn: &dyn SqlConnection,
    model: &ModelDefinition,
    values: &[(String, Value)],
) -> OrmResult<RecordId> {
    let table = quote_ident(model.table());
    let sql = if values.is_empty() {
        format!("INSERT INTO {table} DEFAULT VALUES RETURNING \"id\";")
    } else {
        let columns = values
            .iter()
            .map(|(name, _)| quote_ident(name))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; values.len()].join(", ");
        format!("INSERT INTO {table} ({columns}) VALUES ({placeholders}) RETURNING \"id\";")
    };
    let params: Vec<Value> = values.iter().map(|(_, value)| value.clone()).collect();

    let rows = conn.query(&sql, &params)?;
    rows.first()
        .and_then(|row| row.get("id"))
        .and_then(Value::as_i64)
        .ok_or_else(|| {
            OrmError::InvalidData(format!(
                "insert into `{}` returned no identifier",
                model.table()
            ))
        })
}

/// Updates the given columns of one row; returns the affected row count.
pub fn update_row(
    conn: &dyn SqlConnection,
    model: &ModelDefinition,
    id: RecordId,
    values: &[(String, Value)],
) -> OrmResult<usize> {
    let assignments = values
        .iter()
        .map(|(name, _)| format!("{} = ?", quote_ident(name)))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE {} SET {assignments} WHERE \"id\" = ?;",
        quote_ident(model.table())
    );
    let mut params: Vec<Value> = values.iter().map(|(_, value)| value.clone()).collect();
    params.push(Value::Integer(id));

    Ok(conn.execute(&sql, &params)?)
}

/// Deletes one row; returns the affected row count.
pub fn delete_row(conn: &dyn SqlConnection, model: &ModelDefinition, id: RecordId) -> OrmResult<usize> {
    let sql = format!("DELETE FROM {} WHERE \"id\" = ?;", quote_ident(model.table()));
    Ok(conn.execute(&sql, &[Value::Integer(id)])?)
}

/// Selects all rows matching a translated domain, in identifier order.
pub fn select_where(
    conn: &dyn SqlConnection,
    model: &Arc<ModelDefinition>,
    predicate: &Predicate,
) -> OrmResult<Vec<Record>> {
    let sql = format!(
        "{} WHERE {} ORDER BY \"id\" ASC;",
        select_sql(model),
        predicate.clause
    );
    let rows = conn.query(&sql, &predicate.params)?;
    rows.iter().map(|row| parse_record_row(model, row)).collect()
}

/// Selects the rows whose identifiers are listed, in identifier order.
///
/// Duplicated and unknown identifiers are tolerated.
pub fn select_by_ids(
    conn: &dyn SqlConnection,
    model: &Arc<ModelDefinition>,
    ids: &[RecordId],
) -> OrmResult<Vec<Record>> {
    let mut unique = ids.to_vec();
    unique.sort_unstable();
    unique.dedup();

    let mut records = Vec::with_capacity(unique.len());
    for chunk in unique.chunks(FETCH_CHUNK_SIZE) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "{} WHERE \"id\" IN ({placeholders}) ORDER BY \"id\" ASC;",
            select_sql(model)
        );
        let params: Vec<Value> = chunk.iter().map(|id| Value::Integer(*id)).collect();
        for row in conn.query(&sql, &params)? {
            records.push(parse_record_row(model, &row)?);
        }
    }

    Ok(records)
}

/// Checks one inbound value against its field kind.
///
/// Integers widen to floats; `Null` is accepted for every stored kind.
pub fn coerce_for_write(
    model: &ModelDefinition,
    name: &str,
    field: &Field,
    value: Value,
) -> OrmResult<Value> {
    if value.is_null() {
        return Ok(value);
    }

    let invalid = |message: String| OrmError::InvalidValue {
        model: model.name().to_string(),
        field: name.to_string(),
        message,
    };

    match (&field.kind, value) {
        (FieldKind::Text, value @ Value::Text(_)) => Ok(value),
        (FieldKind::Selection { options }, Value::Text(key)) => {
            if options.iter().any(|(option, _)| *option == key) {
                Ok(Value::Text(key))
            } else {
                Err(invalid(format!("`{key}` is not a selection option")))
            }
        }
        (FieldKind::Integer | FieldKind::Reference { .. }, value @ Value::Integer(_)) => Ok(value),
        (FieldKind::Float, value @ Value::Float(_)) => Ok(value),
        (FieldKind::Float, Value::Integer(number)) => Ok(Value::Float(number as f64)),
        (FieldKind::Boolean, value @ Value::Bool(_)) => Ok(value),
        (_, value) if !field.is_stored() => Err(invalid(format!(
            "{} fields cannot be written directly (got {})",
            field.kind_name(),
            value.type_name()
        ))),
        (_, value) => Err(invalid(format!(
            "expected {} value, got {}",
            field.kind_name(),
            value.type_name()
        ))),
    }
}

/// Decodes one stored row into a record of `model`.
pub fn parse_record_row(model: &Arc<ModelDefinition>, row: &SqlRow) -> OrmResult<Record> {
    let id = row.get("id").and_then(Value::as_i64).ok_or_else(|| {
        OrmError::InvalidData(format!("row of `{}` has no integer id", model.table()))
    })?;

    let mut values = BTreeMap::new();
    for (name, field) in model.stored_fields() {
        let raw = row.get(name).cloned().ok_or_else(|| OrmError::MissingRequiredColumn {
            table: model.table().to_string(),
            column: name.to_string(),
        })?;
        let decoded = decode_stored(field, raw).map_err(|found| {
            OrmError::InvalidData(format!(
                "{} value in {}.{} where {} was expected",
                found,
                model.table(),
                name,
                field.kind_name()
            ))
        })?;
        values.insert(name.to_string(), decoded);
    }

    Ok(Record::from_parts(Arc::clone(model), id, values))
}

fn decode_stored(field: &Field, raw: Value) -> Result<Value, &'static str> {
    match (&field.kind, raw) {
        (_, Value::Null) => Ok(Value::Null),
        (FieldKind::Text | FieldKind::Selection { .. }, value @ Value::Text(_)) => Ok(value),
        (FieldKind::Integer | FieldKind::Reference { .. }, value @ Value::Integer(_)) => Ok(value),
        (FieldKind::Float, value @ Value::Float(_)) => Ok(value),
        (FieldKind::Float, Value::Integer(number)) => Ok(Value::Float(number as f64)),
        (FieldKind::Boolean, Value::Integer(0)) => Ok(Value::Bool(false)),
        (FieldKind::Boolean, Value::Integer(1)) => Ok(Value::Bool(true)),
        (_, other) => Err(other.type_name()),
    }
}

fn select_sql(model: &ModelDefinition) -> String {
    let mut columns = vec![quote_ident("id")];
    columns.extend(model.stored_fields().map(|(name, _)| quote_ident(name)));
    format!(
        "SELECT {} FROM {}",
        columns.join(", "),
        quote_ident(model.table())
    )
}
