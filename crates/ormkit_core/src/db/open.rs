//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure connection pragmas the ORM relies on.
//!
//! # Invariants
//! - With default options, returned connections have `foreign_keys=ON`, so
//!   junction rows cascade and broken references fail at the storage layer.
//! - Opening never materializes model tables; that is [`super::schema`]'s job.

use super::sqlite::SqliteConnection;
use super::DbResult;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings applied right after opening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Enforce `REFERENCES` clauses and `ON DELETE CASCADE`.
    pub foreign_keys: bool,
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            foreign_keys: true,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

/// Opens a SQLite database file with default options.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<SqliteConnection> {
    open_db_with(path, &ConnectionOptions::default())
}

/// Opens a SQLite database file with explicit options.
pub fn open_db_with(
    path: impl AsRef<Path>,
    options: &ConnectionOptions,
) -> DbResult<SqliteConnection> {
    open_logged("file", options, || Connection::open(path))
}

/// Opens an in-memory SQLite database with default options.
pub fn open_db_in_memory() -> DbResult<SqliteConnection> {
    open_logged("memory", &ConnectionOptions::default(), Connection::open_in_memory)
}

fn open_logged(
    mode: &str,
    options: &ConnectionOptions,
    open: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<SqliteConnection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={mode}");

    let conn = match open() {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_open_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match configure_connection(&conn, options) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={} foreign_keys={} duration_ms={}",
                mode,
                options.foreign_keys,
                started_at.elapsed().as_millis()
            );
            Ok(SqliteConnection::new(conn))
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_configure_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn configure_connection(conn: &Connection, options: &ConnectionOptions) -> DbResult<()> {
    let pragma = if options.foreign_keys {
        "PRAGMA foreign_keys = ON;"
    } else {
        "PRAGMA foreign_keys = OFF;"
    };
    conn.execute_batch(pragma)?;
    conn.busy_timeout(options.busy_timeout)?;
    Ok(())
}
