//! Connection boundary, SQLite adapter and schema materialization.
//!
//! # Responsibility
//! - Define the minimal statement-executing contract the ORM consumes.
//! - Open and configure SQLite connections that satisfy that contract.
//! - Translate model declarations into tables (see [`schema`]).
//!
//! # Invariants
//! - Statement parameters are always bound, never interpolated.
//! - The ORM never acquires, retries or pools connections itself.

use log::warn;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod open;
pub mod schema;
mod sqlite;
mod value;

pub use open::{open_db, open_db_in_memory, open_db_with, ConnectionOptions};
pub use sqlite::SqliteConnection;
pub use value::{RecordId, Value};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// Failure reported by a non-SQLite connection implementation.
    Backend(String),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Backend(message) => write!(f, "backend error: {message}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Backend(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// One result row with its column names.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlRow {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl SqlRow {
    /// Builds a row; `columns` and `values` are matched by position.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the value of the named column, if the row has one.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|name| name == column)
            .and_then(|index| self.values.get(index))
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

/// Statement-executing connection consumed by the ORM.
///
/// Implementations own transport, retries and reconnection. All calls block
/// until the backend answers.
pub trait SqlConnection {
    /// Executes one parametrized statement and returns affected row count.
    fn execute(&self, sql: &str, params: &[Value]) -> DbResult<usize>;

    /// Runs one parametrized query and returns all rows.
    fn query(&self, sql: &str, params: &[Value]) -> DbResult<Vec<SqlRow>>;

    /// Returns whether a transaction is currently open.
    fn in_transaction(&self) -> bool;

    fn begin(&self) -> DbResult<()>;
    fn commit(&self) -> DbResult<()>;
    fn rollback(&self) -> DbResult<()>;

    /// Marks a nested rollback point inside the open transaction.
    fn savepoint(&self, name: &str) -> DbResult<()>;
    /// Discards the named savepoint, keeping its writes in the transaction.
    fn release_savepoint(&self, name: &str) -> DbResult<()>;
    /// Undoes writes made after the named savepoint; the savepoint stays open.
    fn rollback_to_savepoint(&self, name: &str) -> DbResult<()>;
}

const OPERATION_SAVEPOINT: &str = "ormkit_op";

/// Runs `body` inside a transaction on `conn`.
///
/// Opens and commits a transaction only when none is open yet. Inside a
/// caller's transaction the body runs under a savepoint instead, so an error
/// undoes only the body's writes and leaves the outer transaction open.
pub fn with_transaction<T, E>(
    conn: &dyn SqlConnection,
    body: impl FnOnce() -> Result<T, E>,
) -> Result<T, E>
where
    E: From<DbError>,
{
    if conn.in_transaction() {
        return with_savepoint(conn, body);
    }

    conn.begin()?;
    match body() {
        Ok(value) => {
            if let Err(err) = conn.commit() {
                rollback_quietly(conn);
                return Err(err.into());
            }
            Ok(value)
        }
        Err(err) => {
            rollback_quietly(conn);
            Err(err)
        }
    }
}

fn with_savepoint<T, E>(
    conn: &dyn SqlConnection,
    body: impl FnOnce() -> Result<T, E>,
) -> Result<T, E>
where
    E: From<DbError>,
{
    conn.savepoint(OPERATION_SAVEPOINT)?;
    match body() {
        Ok(value) => {
            conn.release_savepoint(OPERATION_SAVEPOINT)?;
            Ok(value)
        }
        Err(err) => {
            rollback_to_savepoint_quietly(conn);
            Err(err)
        }
    }
}

fn rollback_quietly(conn: &dyn SqlConnection) {
    if !conn.in_transaction() {
        return;
    }
    if let Err(err) = conn.rollback() {
        warn!("event=tx_rollback module=db status=error error={err}");
    }
}

fn rollback_to_savepoint_quietly(conn: &dyn SqlConnection) {
    // SQLite may already have aborted the whole transaction.
    if !conn.in_transaction() {
        return;
    }
    let result = conn
        .rollback_to_savepoint(OPERATION_SAVEPOINT)
        .and_then(|()| conn.release_savepoint(OPERATION_SAVEPOINT));
    if let Err(err) = result {
        warn!("event=tx_savepoint_rollback module=db status=error error={err}");
    }
}

/// Quotes an identifier that already passed registry validation.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

#[cfg(test)]
mod tests {
    use super::{with_transaction, DbError, SqlConnection, SqlRow, SqliteConnection, Value};

    #[test]
    fn row_lookup_by_column_name() {
        let row = SqlRow::new(
            vec!["id".to_string(), "name".to_string()],
            vec![Value::Integer(7), Value::Text("Mouse".to_string())],
        );

        assert_eq!(row.get("id"), Some(&Value::Integer(7)));
        assert_eq!(row.get("name").and_then(Value::as_str), Some("Mouse"));
        assert!(row.get("price").is_none());
        assert_eq!(row.get_index(1), row.get("name"));
    }

    fn scratch() -> SqliteConnection {
        let conn = rusqlite::Connection::open_in_memory().expect("in-memory sqlite should open");
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT);")
            .expect("scratch table should be created");
        SqliteConnection::new(conn)
    }

    fn count(conn: &SqliteConnection) -> usize {
        conn.query("SELECT id FROM t;", &[])
            .expect("select should succeed")
            .len()
    }

    #[test]
    fn with_transaction_commits_on_success() {
        let conn = scratch();
        let result: Result<(), DbError> = with_transaction(&conn, || {
            conn.execute("INSERT INTO t (name) VALUES (?);", &[Value::from("kept")])?;
            Ok(())
        });

        assert!(result.is_ok());
        assert!(!conn.in_transaction());
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn with_transaction_rolls_back_on_error() {
        let conn = scratch();
        let result: Result<(), DbError> = with_transaction(&conn, || {
            conn.execute("INSERT INTO t (name) VALUES (?);", &[Value::from("gone")])?;
            Err(DbError::Backend("rejected".to_string()))
        });

        assert!(matches!(result, Err(DbError::Backend(_))));
        assert!(!conn.in_transaction());
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn with_transaction_joins_an_open_transaction() {
        let conn = scratch();
        conn.begin().expect("outer begin should succeed");

        let result: Result<(), DbError> = with_transaction(&conn, || {
            conn.execute("INSERT INTO t (name) VALUES (?);", &[Value::from("inner")])?;
            Ok(())
        });
        assert!(result.is_ok());
        assert!(conn.in_transaction(), "joined transaction stays open");

        conn.rollback().expect("outer rollback should succeed");
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn failed_body_inside_open_transaction_undoes_only_its_own_writes() {
        let conn = scratch();
        conn.begin().expect("outer begin should succeed");
        conn.execute("INSERT INTO t (name) VALUES (?);", &[Value::from("earlier")])
            .expect("outer insert should succeed");

        let result: Result<(), DbError> = with_transaction(&conn, || {
            conn.execute("INSERT INTO t (name) VALUES (?);", &[Value::from("gone")])?;
            Err(DbError::Backend("rejected".to_string()))
        });
        assert!(matches!(result, Err(DbError::Backend(_))));
        assert!(conn.in_transaction(), "outer transaction stays open");
        assert_eq!(count(&conn), 1);

        let nested: Result<(), DbError> = with_transaction(&conn, || {
            conn.execute("INSERT INTO t (name) VALUES (?);", &[Value::from("later")])?;
            Ok(())
        });
        assert!(nested.is_ok());

        conn.commit().expect("outer commit should succeed");
        let names: Vec<String> = conn
            .query("SELECT name FROM t ORDER BY id;", &[])
            .expect("select should succeed")
            .iter()
            .filter_map(|row| row.get("name").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert_eq!(names, vec!["earlier", "later"]);
    }
}
