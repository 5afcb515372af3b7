//! Junction-table persistence for many-to-many fields.
//!
//! # Invariants
//! - `column1` always holds the declaring record, `column2` the partner.
//! - Link inserts are idempotent; the composite primary key prevents
//!   duplicate pairs.

use crate::db::{quote_ident, RecordId, SqlConnection, Value};
use crate::error::{OrmError, OrmResult};
use crate::model::field::Junction;

/// Returns partner identifiers linked to `id`, ascending.
pub fn partner_ids(
    conn: &dyn SqlConnection,
    junction: &Junction,
    id: RecordId,
) -> OrmResult<Vec<RecordId>> {
    let sql = format!(
        "SELECT {col2} FROM {table} WHERE {col1} = ? ORDER BY {col2} ASC;",
        table = quote_ident(&junction.table),
        col1 = quote_ident(&junction.column1),
        col2 = quote_ident(&junction.column2),
    );

    let mut ids = Vec::new();
    for row in conn.query(&sql, &[Value::Integer(id)])? {
        let partner = row.get_index(0).and_then(Value::as_i64).ok_or_else(|| {
            OrmError::InvalidData(format!(
                "non-integer value in {}.{}",
                junction.table, junction.column2
            ))
        })?;
        ids.push(partner);
    }
    Ok(ids)
}

/// Links `id` to each partner; returns how many new pairs were written.
pub fn insert_links(
    conn: &dyn SqlConnection,
    junction: &Junction,
    id: RecordId,
    partners: &[RecordId],
) -> OrmResult<usize> {
    let sql = format!(
        "INSERT INTO {table} ({col1}, {col2}) VALUES (?, ?) ON CONFLICT DO NOTHING;",
        table = quote_ident(&junction.table),
        col1 = quote_ident(&junction.column1),
        col2 = quote_ident(&junction.column2),
    );

    let mut inserted = 0;
    for partner in partners {
        inserted += conn.execute(&sql, &[Value::Integer(id), Value::Integer(*partner)])?;
    }
    Ok(inserted)
}

/// Removes the given pairs; returns how many existed.
pub fn delete_links(
    conn: &dyn SqlConnection,
    junction: &Junction,
    id: RecordId,
    partners: &[RecordId],
) -> OrmResult<usize> {
    let sql = format!(
        "DELETE FROM {table} WHERE {col1} = ? AND {col2} = ?;",
        table = quote_ident(&junction.table),
        col1 = quote_ident(&junction.column1),
        col2 = quote_ident(&junction.column2),
    );

    let mut removed = 0;
    for partner in partners {
        removed += conn.execute(&sql, &[Value::Integer(id), Value::Integer(*partner)])?;
    }
    Ok(removed)
}

/// Removes every pair of `id`.
pub fn clear_links(conn: &dyn SqlConnection, junction: &Junction, id: RecordId) -> OrmResult<usize> {
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?;",
        quote_ident(&junction.table),
        quote_ident(&junction.column1)
    );
    Ok(conn.execute(&sql, &[Value::Integer(id)])?)
}
