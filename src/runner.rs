//! Locked task runner.
//!
//! A [`Runner`] wraps an async task in a critical section guarded by one or
//! more named locks: it acquires every key up front, keeps the locks
//! extended on a heartbeat while the task runs, cancels the task when
//! extension fails or hits its limit, and releases every acquired lock on
//! every exit path before reporting a single terminal outcome.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{LockClient, LockError, LockHandle};
use crate::error::{RunError, UnlockError};
use crate::heartbeat::{CancellationCause, ExtendHeartbeat, spawn_extend_heartbeat};

/// Default floor for per-run lock ttls.
pub const DEFAULT_MINIMUM_TTL: Duration = Duration::from_millis(100);

/// Default slack between an extension tick and the previous ttl's expiry.
pub const DEFAULT_EXTEND_BUFFER: Duration = Duration::from_millis(50);

/// Default number of extension ticks before the task is cancelled.
pub const DEFAULT_MAX_EXTEND_COUNT: u32 = 20;

/// Default per-run lock ttl.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_millis(1000);

/// Configuration for a [`Runner`].
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Smallest lock ttl accepted for a run.
    pub minimum_ttl: Duration,
    /// Subtracted from the lock ttl to get the extension period, so each
    /// extension lands before the previous ttl lapses.
    pub extend_buffer: Duration,
    /// Extension ticks allowed before the task is cancelled. Bounds a
    /// run's lifetime at roughly `max_extend_count * (ttl - buffer)`.
    pub max_extend_count: u32,
    /// Label attached to this runner's diagnostic events.
    pub debug_key: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            minimum_ttl: DEFAULT_MINIMUM_TTL,
            extend_buffer: DEFAULT_EXTEND_BUFFER,
            max_extend_count: DEFAULT_MAX_EXTEND_COUNT,
            debug_key: "belay".to_string(),
        }
    }
}

/// One lock key or an ordered set of keys guarding a run.
///
/// Locks on distinct keys are independent; a multi-key run acquires every
/// key before the task starts and releases every key after it settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockKey {
    Single(String),
    Many(Vec<String>),
}

impl LockKey {
    fn into_keys(self) -> Vec<String> {
        match self {
            LockKey::Single(key) => vec![key],
            LockKey::Many(keys) => keys,
        }
    }
}

impl From<&str> for LockKey {
    fn from(key: &str) -> Self {
        LockKey::Single(key.to_owned())
    }
}

impl From<String> for LockKey {
    fn from(key: String) -> Self {
        LockKey::Single(key)
    }
}

impl From<Vec<String>> for LockKey {
    fn from(keys: Vec<String>) -> Self {
        LockKey::Many(keys)
    }
}

impl From<Vec<&str>> for LockKey {
    fn from(keys: Vec<&str>) -> Self {
        LockKey::Many(keys.into_iter().map(str::to_owned).collect())
    }
}

impl From<&[&str]> for LockKey {
    fn from(keys: &[&str]) -> Self {
        LockKey::Many(keys.iter().map(|key| (*key).to_owned()).collect())
    }
}

/// Per-run parameters.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub lock_key: LockKey,
    pub lock_ttl: Duration,
}

impl RunOptions {
    pub fn new(lock_key: impl Into<LockKey>) -> Self {
        Self {
            lock_key: lock_key.into(),
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }

    pub fn with_lock_ttl(mut self, lock_ttl: Duration) -> Self {
        self.lock_ttl = lock_ttl;
        self
    }
}

/// Runs tasks inside a critical section guarded by distributed locks.
///
/// A runner is long-lived and reusable; [`Runner::run`] takes `&self` and
/// concurrent runs under distinct keys are independent.
pub struct Runner {
    client: Arc<dyn LockClient>,
    config: RunnerConfig,
}

impl Runner {
    /// Create a runner bound to one lock service client.
    ///
    /// `minimum_ttl` is lifted above `extend_buffer` when a config would
    /// otherwise admit a ttl with no room for an extension period.
    pub fn new(client: Arc<dyn LockClient>, config: RunnerConfig) -> Self {
        let mut config = config;
        if config.minimum_ttl <= config.extend_buffer {
            let lifted = config.extend_buffer + Duration::from_millis(1);
            warn!(
                debug_key = %config.debug_key,
                minimum_ttl_ms = config.minimum_ttl.as_millis() as u64,
                lifted_ms = lifted.as_millis() as u64,
                "minimum ttl leaves no extension period; lifting it above the extend buffer"
            );
            config.minimum_ttl = lifted;
        }
        Self { client, config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `task` while holding every lock named by `options.lock_key`.
    ///
    /// The task receives a [`CancellationToken`] that trips when lock
    /// extension fails or passes its limit; well-behaved tasks consult it
    /// at suspension points. The task is always awaited to completion and
    /// every acquired lock gets exactly one release attempt before this
    /// returns. When several failures coincide, the reported outcome is
    /// the most upstream one: heartbeat cancellation, then the task's own
    /// error, then a release failure.
    pub async fn run<F, Fut, T, E>(&self, options: RunOptions, task: F) -> Result<T, RunError<E>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let RunOptions { lock_key, lock_ttl } = options;

        if lock_ttl < self.config.minimum_ttl {
            return Err(RunError::TtlBelowMinimum {
                requested: lock_ttl,
                minimum: self.config.minimum_ttl,
            });
        }
        let keys = lock_key.into_keys();
        if keys.is_empty() || keys.iter().any(|key| key.trim().is_empty()) {
            return Err(RunError::InvalidLockKey);
        }

        let locks = Arc::new(self.acquire_all(&keys, lock_ttl).await?);

        let period = lock_ttl - self.config.extend_buffer;
        let task_cancel = CancellationToken::new();
        let cause: CancellationCause = Arc::new(Mutex::new(None));
        let disarm = CancellationToken::new();
        let heartbeat = spawn_extend_heartbeat(
            ExtendHeartbeat {
                locks: Arc::clone(&locks),
                lock_ttl,
                period,
                extend_limit: self.config.max_extend_count,
                task_cancel: task_cancel.clone(),
                cause: Arc::clone(&cause),
                debug_key: self.config.debug_key.clone(),
            },
            disarm.clone().cancelled_owned(),
        );
        // Stops the heartbeat even if this future is dropped mid-task.
        let _disarm_guard = disarm.clone().drop_guard();

        debug!(debug_key = %self.config.debug_key, "starting task");
        let task_result = task(task_cancel.clone()).await;

        // Disarm strictly before release: joining the heartbeat guarantees
        // no extension lands on a lock that is already being released.
        disarm.cancel();
        if heartbeat.await.is_err() {
            warn!(debug_key = %self.config.debug_key, "extension heartbeat panicked");
        }

        debug!(debug_key = %self.config.debug_key, count = locks.len(), "releasing locks");
        let releases = locks.iter().map(|lock| lock.release());
        let release_failure = futures::future::join_all(releases)
            .await
            .into_iter()
            .find_map(Result::err);
        debug!(debug_key = %self.config.debug_key, "released locks");

        let cancelled = cause.lock().expect("cancellation cause poisoned").take();
        match (cancelled, task_result, release_failure) {
            (Some(cause), _, _) => Err(RunError::ExtendLock(cause)),
            (None, Err(task_error), _) => Err(RunError::Task(task_error)),
            (None, Ok(_), Some(error)) => Err(RunError::Unlock(UnlockError::new(error))),
            (None, Ok(value), None) => Ok(value),
        }
    }

    /// Acquire every key in parallel. On any failure the successfully
    /// acquired subset is rolled back best-effort and the first error is
    /// surfaced unchanged.
    async fn acquire_all(
        &self,
        keys: &[String],
        lock_ttl: Duration,
    ) -> Result<Vec<Box<dyn LockHandle>>, LockError> {
        debug!(
            debug_key = %self.config.debug_key,
            count = keys.len(),
            ttl_ms = lock_ttl.as_millis() as u64,
            "acquiring locks"
        );
        let acquires = keys.iter().map(|key| self.client.acquire(key, lock_ttl));
        let results = futures::future::join_all(acquires).await;

        let mut locks = Vec::with_capacity(keys.len());
        let mut failure = None;
        for result in results {
            match result {
                Ok(handle) => locks.push(handle),
                Err(error) => failure = failure.or(Some(error)),
            }
        }

        let Some(error) = failure else {
            return Ok(locks);
        };

        for lock in &locks {
            if let Err(rollback_error) = lock.release().await {
                warn!(
                    debug_key = %self.config.debug_key,
                    key = lock.key(),
                    error = %rollback_error,
                    "failed to roll back partially acquired lock"
                );
            }
        }
        Err(error)
    }
}
