//! rusqlite-backed [`SqlConnection`] implementation.

use super::value::Value;
use super::{quote_ident, DbError, DbResult, SqlConnection, SqlRow};
use rusqlite::types::Value as SqliteValue;
use rusqlite::{params_from_iter, Connection};

/// SQLite connection exposed through the ORM connection boundary.
pub struct SqliteConnection {
    conn: Connection,
}

impl SqliteConnection {
    /// Wraps an already configured rusqlite connection.
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Borrows the underlying rusqlite connection.
    pub fn raw(&self) -> &Connection {
        &self.conn
    }
}

impl SqlConnection for SqliteConnection {
    fn execute(&self, sql: &str, params: &[Value]) -> DbResult<usize> {
        let mut stmt = self.conn.prepare(sql)?;
        let changed = stmt.execute(params_from_iter(params.iter().map(to_sqlite)))?;
        Ok(changed)
    }

    fn query(&self, sql: &str, params: &[Value]) -> DbResult<Vec<SqlRow>> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut rows = stmt.query(params_from_iter(params.iter().map(to_sqlite)))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for index in 0..columns.len() {
                let raw: SqliteValue = row.get(index)?;
                values.push(from_sqlite(raw, &columns[index])?);
            }
            result.push(SqlRow::new(columns.clone(), values));
        }

        Ok(result)
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn begin(&self) -> DbResult<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        Ok(())
    }

    fn commit(&self) -> DbResult<()> {
        self.conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    fn rollback(&self) -> DbResult<()> {
        self.conn.execute_batch("ROLLBACK;")?;
        Ok(())
    }

    fn savepoint(&self, name: &str) -> DbResult<()> {
        self.conn.execute_batch(&format!("SAVEPOINT {};", quote_ident(name)))?;
        Ok(())
    }

    fn release_savepoint(&self, name: &str) -> DbResult<()> {
        self.conn.execute_batch(&format!("RELEASE SAVEPOINT {};", quote_ident(name)))?;
        Ok(())
    }

    fn rollback_to_savepoint(&self, name: &str) -> DbResult<()> {
        self.conn
            .execute_batch(&format!("ROLLBACK TO SAVEPOINT {};", quote_ident(name)))?;
        Ok(())
    }
}

fn to_sqlite(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Bool(flag) => SqliteValue::Integer(i64::from(*flag)),
        Value::Integer(number) => SqliteValue::Integer(*number),
        Value::Float(number) => SqliteValue::Real(*number),
        Value::Text(text) => SqliteValue::Text(text.clone()),
    }
}

fn from_sqlite(value: SqliteValue, column: &str) -> DbResult<Value> {
    match value {
        SqliteValue::Null => Ok(Value::Null),
        SqliteValue::Integer(number) => Ok(Value::Integer(number)),
        SqliteValue::Real(number) => Ok(Value::Float(number)),
        SqliteValue::Text(text) => Ok(Value::Text(text)),
        SqliteValue::Blob(_) => Err(DbError::Backend(format!(
            "blob value in column `{column}` is not supported"
        ))),
    }
}
