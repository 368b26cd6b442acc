//! Terminal errors reported by a locked run.

use std::time::Duration;

use thiserror::Error;

use crate::client::LockError;

/// The task was cancelled because lock extension failed or the extension
/// limit was reached.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ExtendLockError {
    message: String,
    extend_limit: u32,
    #[source]
    source: Option<LockError>,
}

impl ExtendLockError {
    pub(crate) fn limit_reached(extend_limit: u32) -> Self {
        Self {
            message: format!("lock extension limit of {extend_limit} reached; task cancelled"),
            extend_limit,
            source: None,
        }
    }

    pub(crate) fn extend_failed(extend_limit: u32, source: LockError) -> Self {
        Self {
            message: format!("failed to extend lock {:?}: {source}", source.key()),
            extend_limit,
            source: Some(source),
        }
    }

    /// The configured extension-tick limit in effect for the run.
    pub fn extend_limit(&self) -> u32 {
        self.extend_limit
    }

    /// The extension failure that triggered cancellation, if any. `None`
    /// when the tick limit was reached.
    pub fn lock_error(&self) -> Option<&LockError> {
        self.source.as_ref()
    }
}

/// Release failed after the task finished. The lock service still reclaims
/// the key once its ttl lapses.
#[derive(Debug, Error)]
#[error("{message}; the lock will expire after its ttl")]
pub struct UnlockError {
    message: String,
    #[source]
    source: LockError,
}

impl UnlockError {
    pub(crate) fn new(source: LockError) -> Self {
        Self {
            message: format!("failed to release lock {:?}", source.key()),
            source,
        }
    }

    /// The underlying release failure.
    pub fn lock_error(&self) -> &LockError {
        &self.source
    }
}

/// Terminal outcome of a locked run, short of task success.
///
/// `E` is the task's own error type, propagated unchanged. When several
/// failures coincide the runner reports exactly one: a heartbeat
/// cancellation shadows a task error, which shadows a release failure.
#[derive(Debug, Error)]
pub enum RunError<E> {
    /// The requested ttl is below the runner's configured minimum. Nothing
    /// was acquired.
    #[error("lock ttl of {requested:?} is below the configured minimum of {minimum:?}")]
    TtlBelowMinimum {
        requested: Duration,
        minimum: Duration,
    },

    /// At least one lock key must be supplied and every key must be a
    /// non-empty string.
    #[error("lock keys must be one or more non-empty strings")]
    InvalidLockKey,

    /// Acquisition failed; surfaced unchanged from the lock client.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The extension heartbeat cancelled the task.
    #[error(transparent)]
    ExtendLock(#[from] ExtendLockError),

    /// Release failed and no higher-priority error shadows it.
    #[error(transparent)]
    Unlock(#[from] UnlockError),

    /// The task itself failed.
    #[error("{0}")]
    Task(E),
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn limit_reached_names_the_limit() {
        let error = ExtendLockError::limit_reached(20);
        assert_eq!(error.extend_limit(), 20);
        assert!(error.lock_error().is_none());
        assert!(error.source().is_none());
        assert!(error.to_string().contains("20"));
    }

    #[test]
    fn extend_failure_preserves_the_cause() {
        let cause = LockError::NotHeld {
            key: "jobs".to_string(),
        };
        let error = ExtendLockError::extend_failed(20, cause);
        assert_eq!(error.extend_limit(), 20);
        assert!(matches!(
            error.lock_error(),
            Some(LockError::NotHeld { key }) if key == "jobs"
        ));
        assert!(error.source().is_some());
        assert!(error.to_string().contains("jobs"));
    }

    #[test]
    fn unlock_error_notes_ttl_expiry() {
        let cause = LockError::Service {
            key: "jobs".to_string(),
            message: "connection reset".to_string(),
        };
        let error = UnlockError::new(cause);
        assert_eq!(error.lock_error().key(), "jobs");
        assert!(error.to_string().contains("expire after its ttl"));
        assert!(error.source().is_some());
    }

    #[test]
    fn run_error_passes_lock_errors_through() {
        let error: RunError<String> = LockError::RetriesExhausted {
            key: "jobs".to_string(),
            attempts: 5,
        }
        .into();
        assert_eq!(
            error.to_string(),
            "unable to acquire lock \"jobs\" after 5 attempts"
        );
    }

    #[test]
    fn ttl_rejection_names_the_minimum() {
        let error: RunError<String> = RunError::TtlBelowMinimum {
            requested: Duration::from_millis(99),
            minimum: Duration::from_millis(100),
        };
        let message = error.to_string();
        assert!(message.contains("99ms"));
        assert!(message.contains("100ms"));
    }
}
