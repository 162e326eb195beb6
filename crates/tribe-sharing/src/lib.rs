//! # tribe-sharing
//!
//! Sharing state machine for lists and activities.
//!
//! A resource is owned by users and groups ("tribes") and can be shared
//! with a tribe, optionally until an expiry time. Sharing promotes the
//! tribe to an owner of the resource; the last share going away (unshare
//! or expiry sweep) demotes it again, unless the tribe is also a direct
//! owner.
//!
//! Every operation runs as one unit of work through
//! [`tribe_db::Database::run_in_transaction`]; there is no in-process
//! locking. Writes run serializable, listings read-committed (see
//! [`config::SharingConfig`]). Units of work are written to be re-run from
//! scratch on serialization failures.

pub mod clock;
pub mod config;
mod ownership;
mod service;
pub mod sweeper;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

use std::time::Duration;

use tribe_db::{DbError, TransactionError};

pub use config::SharingConfig;
pub use ownership::{DeleteSummary, NewResource};
pub use service::SharingService;
pub use sweeper::ExpirySweeper;
pub use tribe_db::queries::shares::{ShareListing, SharedResource};
pub use tribe_db::Context;

/// Sharing error types.
#[derive(Debug, thiserror::Error)]
pub enum SharingError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("transaction kept conflicting after {attempts} attempts")]
    Transient { attempts: u32 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("statement timed out after {0:?}")]
    Timeout(Duration),

    #[error("{op}: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: DbError,
    },
}

impl From<DbError> for SharingError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => SharingError::NotFound(what),
            DbError::Duplicate(what) => SharingError::Duplicate(what),
            DbError::OutOfRange(value) => {
                SharingError::InvalidInput(format!("{value} is out of range"))
            }
            DbError::Transient { attempts, .. } => SharingError::Transient { attempts },
            DbError::Cancelled => SharingError::Cancelled,
            DbError::DeadlineExceeded => SharingError::DeadlineExceeded,
            DbError::Timeout(after) => SharingError::Timeout(after),
            other => SharingError::Store {
                op: "store",
                source: other,
            },
        }
    }
}

impl TransactionError for SharingError {
    fn is_retryable(&self) -> bool {
        matches!(self, SharingError::Store { source, .. } if source.is_retryable())
    }
}

impl SharingError {
    /// Attach the name of the failing operation to wrapped store errors.
    pub(crate) fn in_op(self, op: &'static str) -> Self {
        match self {
            SharingError::Store { source, .. } => SharingError::Store { op, source },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, SharingError>;

/// Reject nil identifiers before touching the store.
pub(crate) fn require_id(is_nil: bool, what: &str) -> Result<()> {
    if is_nil {
        return Err(SharingError::InvalidInput(format!("{what} id is required")));
    }
    Ok(())
}
