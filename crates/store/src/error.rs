//! Error type for result store operations

use std::time::Duration;

use sqlx::postgres::PgDatabaseError;
use sqlx::sqlite::SqliteError;

use crate::reliability::Retryable;

/// Error type for result store operations
///
/// A missing record is never an error: unknown tasks read as `PENDING` and
/// unknown groups as `None`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Missing or invalid configuration, detected before any connection attempt
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Error raised by the database driver or connection pool
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Payload could not be encoded or decoded by the configured serializer
    #[error("serialization error ({content_type}): {source}")]
    Serialization {
        content_type: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A stored row holds a value the store does not understand
    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    /// Waiting for a task to become ready timed out
    #[error("timed out after {waited:?} waiting for task {task_id}")]
    Timeout { task_id: String, waited: Duration },
}

impl StoreError {
    pub(crate) fn serialization(
        content_type: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Serialization {
            content_type,
            source: source.into(),
        }
    }

    /// Whether this error is expected to go away if the operation is retried
    ///
    /// Only database errors can be transient; configuration, serialization and
    /// corrupt-record errors are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(err) => is_transient_db_error(err),
            _ => false,
        }
    }
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// SQLSTATE codes PostgreSQL uses for conditions that clear up on their own.
const PG_TRANSIENT_CODES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
    "57P01", // admin_shutdown
    "57P02", // crash_shutdown
    "57P03", // cannot_connect_now
];

/// SQLite primary result codes for a busy or locked database.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

fn is_transient_db_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db_err) => {
            let Some(code) = db_err.code() else {
                return false;
            };
            // The Any driver passes the native error through, so the code
            // format is known from the driver that raised it.
            if db_err.try_downcast_ref::<SqliteError>().is_some() {
                is_transient_sqlite_code(&code)
            } else if db_err.try_downcast_ref::<PgDatabaseError>().is_some() {
                is_transient_sqlstate(&code)
            } else {
                false
            }
        }
        _ => false,
    }
}

fn is_transient_sqlstate(code: &str) -> bool {
    // Connection exceptions (class 08)
    code.starts_with("08") || PG_TRANSIENT_CODES.contains(&code)
}

fn is_transient_sqlite_code(code: &str) -> bool {
    // Extended result codes carry the primary code in the low byte
    match code.parse::<i32>() {
        Ok(extended) => matches!(extended & 0xff, SQLITE_BUSY | SQLITE_LOCKED),
        Err(_) => false,
    }
}
