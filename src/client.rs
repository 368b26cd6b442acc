//! Lock service client contract.
//!
//! The runner coordinates lock lifecycles through these traits and never
//! talks to a lock service directly. A client hands out opaque handles;
//! a handle stays valid until it is released or its ttl lapses.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by a lock service client.
#[derive(Debug, Clone, Error)]
pub enum LockError {
    /// The acquisition retry budget ran out without obtaining the lock.
    #[error("unable to acquire lock {key:?} after {attempts} attempts")]
    RetriesExhausted { key: String, attempts: u32 },

    /// The lock no longer belongs to this holder: the key expired or was
    /// taken over.
    #[error("lock {key:?} is no longer held")]
    NotHeld { key: String },

    /// Transport or service failure.
    #[error("lock service error for {key:?}: {message}")]
    Service { key: String, message: String },
}

impl LockError {
    /// Key the failing operation was addressed to.
    pub fn key(&self) -> &str {
        match self {
            LockError::RetriesExhausted { key, .. }
            | LockError::NotHeld { key }
            | LockError::Service { key, .. } => key,
        }
    }

    /// Number of acquisition attempts, when the error represents an
    /// exhausted retry budget. Transport and takeover failures carry none.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            LockError::RetriesExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

pub type LockResult<T> = Result<T, LockError>;

/// Options forwarded to a lock client on construction.
#[derive(Debug, Clone)]
pub struct LockClientOptions {
    /// Acquisition attempts before giving up on a contended key.
    pub retry_count: u32,
    /// Delay between acquisition attempts.
    pub retry_delay: Duration,
}

impl Default for LockClientOptions {
    fn default() -> Self {
        Self {
            retry_count: 10,
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// A held lock, usable until released or expired.
#[async_trait]
pub trait LockHandle: Send + Sync + std::fmt::Debug {
    /// Key the lock was acquired under.
    fn key(&self) -> &str;

    /// Reset the remaining ttl on the underlying key.
    async fn extend(&self, ttl: Duration) -> LockResult<()>;

    /// Release the lock. Best-effort: on failure the key is reclaimed by
    /// ttl expiry.
    async fn release(&self) -> LockResult<()>;
}

/// Client for a named-lock service.
#[async_trait]
pub trait LockClient: Send + Sync {
    /// Acquire `key` for `ttl`, failing once the retry budget is exhausted
    /// or the service is unreachable.
    async fn acquire(&self, key: &str, ttl: Duration) -> LockResult<Box<dyn LockHandle>>;
}
