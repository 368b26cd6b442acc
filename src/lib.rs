//! Belay - run async tasks inside a distributed-lock critical section
//!
//! This crate wraps the execution of a user task in one or more named locks
//! held in a distributed lock service, and keeps those locks alive for as
//! long as the task runs by extending their ttls on a heartbeat. The key
//! components are:
//!
//! ## Runner
//!
//! - [`Runner`]: acquires every key, runs the task concurrently with the
//!   extension heartbeat, and guarantees release on every exit path
//! - [`RunnerConfig`]: ttl floor, extension buffer and tick limit
//! - [`LockKey`] / [`RunOptions`]: per-run keys and ttl
//!
//! ## Lock service contract
//!
//! - [`LockClient`] / [`LockHandle`]: acquire, extend and release named
//!   locks behind an opaque handle
//! - [`MemoryLockClient`]: process-local implementation for tests and
//!   single-node use
//!
//! ## Outcomes
//!
//! - [`RunError`]: one terminal outcome per run; a heartbeat cancellation
//!   ([`ExtendLockError`]) shadows a task error, which shadows a release
//!   failure ([`UnlockError`])
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use belay::{MemoryLockClient, RunOptions, Runner, RunnerConfig};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let runner = Runner::new(Arc::new(MemoryLockClient::new()), RunnerConfig::default());
//!
//! let report = runner
//!     .run(
//!         RunOptions::new("nightly-report").with_lock_ttl(Duration::from_secs(2)),
//!         |cancel| async move {
//!             let mut pages = Vec::new();
//!             for page in 0..100 {
//!                 if cancel.is_cancelled() {
//!                     break;
//!                 }
//!                 pages.push(page);
//!             }
//!             anyhow::Ok(pages.len())
//!         },
//!     )
//!     .await?;
//! # let _ = report;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
mod heartbeat;
pub mod memory;
pub mod runner;

// Lock service contract
pub use client::{LockClient, LockClientOptions, LockError, LockHandle, LockResult};

// In-memory lock service
pub use memory::MemoryLockClient;

// Terminal outcomes
pub use error::{ExtendLockError, RunError, UnlockError};

// Runner
pub use runner::{
    DEFAULT_EXTEND_BUFFER, DEFAULT_LOCK_TTL, DEFAULT_MAX_EXTEND_COUNT, DEFAULT_MINIMUM_TTL,
    LockKey, RunOptions, Runner, RunnerConfig,
};
