//! # tribe-db
//!
//! Store access layer for shareable resources.
//!
//! - [`executor`]: runs units of work inside a SQLite transaction with a
//!   declared isolation level, statement timeout, cancellation and
//!   retry on serialization failures.
//! - [`queries`]: single-transaction primitives per table. They never open
//!   their own transaction and never retry.
//!
//! ## Schema
//!
//! - WAL mode mandatory
//! - Foreign keys enforced
//! - All timestamps are Unix epoch seconds (u64)
//! - Rows are soft-deleted through a nullable `deleted_at`
//! - Schema version stored in `PRAGMA user_version`

pub mod context;
pub mod executor;
pub mod migrations;
pub mod queries;
pub mod schema;

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode};

pub use context::Context;
pub use executor::{Database, DbConfig, IsolationLevel, RetryPolicy, TxOptions};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Lock wait applied to connections outside of a transaction.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("value out of range: {0}")]
    OutOfRange(String),

    #[error("transaction still conflicting after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("statement timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection pool closed")]
    Closed,

    #[error("transaction worker failed: {0}")]
    Worker(String),
}

impl DbError {
    /// Whether the failure is a serialization conflict worth re-running.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DbError::Sqlite(e) if is_serialization_failure(e))
    }

    /// Map a write failure, separating uniqueness from other constraint
    /// violations.
    pub fn from_write(err: rusqlite::Error, what: &str) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
                match e.extended_code {
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                        DbError::Duplicate(what.to_string())
                    }
                    _ => DbError::Constraint(format!("{what}: {err}")),
                }
            }
            _ => DbError::Sqlite(err),
        }
    }

    /// Map a single-row read, turning an empty result into `NotFound`.
    pub fn from_lookup(err: rusqlite::Error, what: &str) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(what.to_string()),
            other => DbError::Sqlite(other),
        }
    }
}

/// Busy and locked are SQLite's serialization failures: another
/// connection holds a conflicting lock or the snapshot went stale.
pub fn is_serialization_failure(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        }
        _ => false,
    }
}

/// Error type a unit of work may return from [`Database::run_in_transaction`].
pub trait TransactionError: std::error::Error + From<DbError> + Send + 'static {
    /// Whether the whole unit of work should be re-run.
    fn is_retryable(&self) -> bool;
}

impl TransactionError for DbError {
    fn is_retryable(&self) -> bool {
        DbError::is_retryable(self)
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Bind an unsigned value as an SQLite integer, which is signed 64-bit.
pub(crate) fn to_sql_int(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| DbError::OutOfRange(value.to_string()))
}

/// Open or create the database at the given path.
///
/// Configures WAL mode, foreign keys, and runs any pending migrations.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = connect(path)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an additional connection to an already migrated database.
pub(crate) fn connect(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    Ok(conn)
}

/// Configure SQLite pragmas.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;",
    )?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}
