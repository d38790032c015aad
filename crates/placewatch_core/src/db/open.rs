//! Connection bootstrap for the presence database.
//!
//! # Responsibility
//! - Open file-backed or in-memory SQLite connections.
//! - Apply pragmas and migrations before handing a connection out.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - Returned connections have migrations fully applied.
//! - Returned connections wait up to `BUSY_TIMEOUT` on a locked database.

use super::migrations::{apply_migrations, MigrationReport};
use super::{DbError, DbResult};
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
enum OpenMode {
    File,
    Memory,
}

impl OpenMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Memory => "memory",
        }
    }
}

/// Opens (or creates) a presence database file.
///
/// # Side effects
/// - Emits `db_open` events with mode, duration and status.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    let path = path.as_ref();
    open_with(OpenMode::File, &path.display().to_string(), || {
        Connection::open(path)
    })
}

/// Opens a private in-memory presence database.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_with(OpenMode::Memory, ":memory:", Connection::open_in_memory)
}

fn open_with(
    mode: OpenMode,
    target: &str,
    opener: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!(
        "event=db_open module=db status=start mode={}",
        mode.as_str()
    );

    let mut conn = opener().map_err(|source| {
        let err = DbError::Open {
            target: target.to_string(),
            source,
        };
        error!(
            "event=db_open module=db status=error mode={} duration_ms={} error_code={} error={}",
            mode.as_str(),
            started_at.elapsed().as_millis(),
            err.code(),
            err
        );
        err
    })?;

    let report = match bootstrap_connection(&mut conn, target) {
        Ok(report) => report,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code={} error={}",
                mode.as_str(),
                started_at.elapsed().as_millis(),
                err.code(),
                err
            );
            return Err(err);
        }
    };

    info!(
        "event=db_open module=db status=ok mode={} duration_ms={} schema_from={} schema_to={}",
        mode.as_str(),
        started_at.elapsed().as_millis(),
        report.from_version,
        report.to_version
    );
    Ok(conn)
}

fn bootstrap_connection(conn: &mut Connection, target: &str) -> DbResult<MigrationReport> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .and_then(|()| conn.busy_timeout(BUSY_TIMEOUT))
        .map_err(|source| DbError::Open {
            target: target.to_string(),
            source,
        })?;
    apply_migrations(conn)
}
