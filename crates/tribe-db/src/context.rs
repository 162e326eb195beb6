//! Caller context: cancellation plus an optional deadline.
//!
//! Every store operation takes a `&Context`. Cancelling it, or letting its
//! deadline pass, aborts waits for a transaction slot and interrupts the
//! statement that is currently running.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{DbError, Result};

#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Derived context: cancelled with its parent, never outlives its
    /// parent's deadline.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derived context whose deadline is the earlier of the parent's and
    /// `deadline`.
    pub fn child_until(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the context is done, if it is.
    pub fn err(&self) -> Option<DbError> {
        if self.token.is_cancelled() {
            Some(DbError::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(DbError::DeadlineExceeded)
        } else {
            None
        }
    }

    pub fn check(&self) -> Result<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> DbError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => DbError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => DbError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                DbError::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_is_never_done() {
        let ctx = Context::background();
        assert!(ctx.check().is_ok());
        let done = tokio::time::timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(done.is_err());
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_child() {
        let parent = Context::background();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(matches!(child.done().await, DbError::Cancelled));
        assert!(matches!(child.check(), Err(DbError::Cancelled)));
    }

    #[tokio::test]
    async fn test_child_cancel_does_not_reach_parent() {
        let parent = Context::background();
        parent.child().cancel();
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let ctx = Context::with_timeout(Duration::from_secs(5));
        assert!(ctx.check().is_ok());
        assert!(matches!(ctx.done().await, DbError::DeadlineExceeded));
        assert!(matches!(ctx.err(), Some(DbError::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_until_keeps_earlier_deadline() {
        let now = Instant::now();
        let parent = Context::with_deadline(now + Duration::from_secs(1));
        let child = parent.child_until(now + Duration::from_secs(10));
        assert_eq!(child.deadline(), Some(now + Duration::from_secs(1)));
    }
}
