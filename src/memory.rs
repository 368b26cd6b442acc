//! In-memory lock service for local runs and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::client::{LockClient, LockClientOptions, LockError, LockHandle, LockResult};

#[derive(Debug)]
struct HeldLock {
    token: Uuid,
    expires_at: Instant,
}

type LockTable = Arc<Mutex<HashMap<String, HeldLock>>>;

/// Lock service backed by a process-local table.
///
/// Gives real mutual exclusion within one process: acquisition of a
/// contended key retries until the holder releases or its ttl lapses, and
/// extend/release verify a per-acquisition holder token, so a stale handle
/// cannot touch a key that was reclaimed and re-acquired.
#[derive(Clone)]
pub struct MemoryLockClient {
    locks: LockTable,
    options: LockClientOptions,
}

impl Default for MemoryLockClient {
    fn default() -> Self {
        Self::with_options(LockClientOptions::default())
    }
}

impl MemoryLockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: LockClientOptions) -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
            options,
        }
    }

    /// Whether `key` is currently held and unexpired.
    pub fn is_held(&self, key: &str) -> bool {
        let locks = self.locks.lock().expect("lock table poisoned");
        locks
            .get(key)
            .is_some_and(|held| held.expires_at > Instant::now())
    }

    /// Keys currently held and unexpired.
    pub fn held_keys(&self) -> Vec<String> {
        let locks = self.locks.lock().expect("lock table poisoned");
        let now = Instant::now();
        locks
            .iter()
            .filter(|(_, held)| held.expires_at > now)
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn try_insert(&self, key: &str, ttl: Duration) -> Option<Uuid> {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        let now = Instant::now();
        match locks.get(key) {
            Some(held) if held.expires_at > now => None,
            _ => {
                let token = Uuid::new_v4();
                locks.insert(
                    key.to_owned(),
                    HeldLock {
                        token,
                        expires_at: now + ttl,
                    },
                );
                Some(token)
            }
        }
    }
}

#[async_trait]
impl LockClient for MemoryLockClient {
    async fn acquire(&self, key: &str, ttl: Duration) -> LockResult<Box<dyn LockHandle>> {
        let attempts = self.options.retry_count.max(1);
        for attempt in 1..=attempts {
            if let Some(token) = self.try_insert(key, ttl) {
                debug!(key, attempt, "acquired in-memory lock");
                return Ok(Box::new(MemoryLockHandle {
                    key: key.to_owned(),
                    token,
                    locks: Arc::clone(&self.locks),
                }));
            }
            if attempt < attempts {
                tokio::time::sleep(self.options.retry_delay).await;
            }
        }
        Err(LockError::RetriesExhausted {
            key: key.to_owned(),
            attempts,
        })
    }
}

#[derive(Debug)]
struct MemoryLockHandle {
    key: String,
    token: Uuid,
    locks: LockTable,
}

#[async_trait]
impl LockHandle for MemoryLockHandle {
    fn key(&self) -> &str {
        &self.key
    }

    async fn extend(&self, ttl: Duration) -> LockResult<()> {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        let now = Instant::now();
        match locks.get_mut(&self.key) {
            Some(held) if held.token == self.token && held.expires_at > now => {
                held.expires_at = now + ttl;
                Ok(())
            }
            _ => Err(LockError::NotHeld {
                key: self.key.clone(),
            }),
        }
    }

    async fn release(&self) -> LockResult<()> {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        match locks.get(&self.key) {
            Some(held) if held.token == self.token => {
                locks.remove(&self.key);
                Ok(())
            }
            _ => Err(LockError::NotHeld {
                key: self.key.clone(),
            }),
        }
    }
}
