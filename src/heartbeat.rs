//! Periodic lock extension while a task runs.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::LockHandle;
use crate::error::ExtendLockError;

/// Slot for the error that cancelled the task. Written at most once by the
/// heartbeat; read by the runner after the task settles and the heartbeat
/// has fully stopped.
pub(crate) type CancellationCause = Arc<Mutex<Option<ExtendLockError>>>;

pub(crate) struct ExtendHeartbeat {
    pub locks: Arc<Vec<Box<dyn LockHandle>>>,
    pub lock_ttl: Duration,
    pub period: Duration,
    pub extend_limit: u32,
    pub task_cancel: CancellationToken,
    pub cause: CancellationCause,
    pub debug_key: String,
}

impl ExtendHeartbeat {
    fn cancel_task(&self, error: ExtendLockError) {
        let mut cause = self.cause.lock().expect("cancellation cause poisoned");
        if cause.is_none() {
            *cause = Some(error);
        }
        drop(cause);
        self.task_cancel.cancel();
    }
}

/// Spawn the extension loop for one run.
///
/// Every `period` the loop extends all held locks in parallel. It stops on
/// the first failed extension or once the tick count passes `extend_limit`,
/// cancelling the task either way, or silently when `stop` resolves because
/// the task finished on its own.
pub(crate) fn spawn_extend_heartbeat(
    heartbeat: ExtendHeartbeat,
    stop: tokio_util::sync::WaitForCancellationFutureOwned,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stop = std::pin::pin!(stop);
        let mut ticks: u32 = 0;
        loop {
            tokio::select! {
                _ = &mut stop => {
                    debug!(debug_key = %heartbeat.debug_key, ticks, "extension heartbeat disarmed");
                    break;
                }
                _ = tokio::time::sleep(heartbeat.period) => {}
            }

            ticks += 1;
            if ticks > heartbeat.extend_limit {
                warn!(
                    debug_key = %heartbeat.debug_key,
                    extend_limit = heartbeat.extend_limit,
                    "lock extension limit reached; cancelling task"
                );
                heartbeat.cancel_task(ExtendLockError::limit_reached(heartbeat.extend_limit));
                break;
            }

            debug!(
                debug_key = %heartbeat.debug_key,
                tick = ticks,
                count = heartbeat.locks.len(),
                "extending locks"
            );
            let extends = heartbeat
                .locks
                .iter()
                .map(|lock| lock.extend(heartbeat.lock_ttl));
            let failure = futures::future::join_all(extends)
                .await
                .into_iter()
                .find_map(Result::err);
            match failure {
                None => {
                    debug!(debug_key = %heartbeat.debug_key, tick = ticks, "extended all locks");
                }
                Some(error) => {
                    warn!(
                        debug_key = %heartbeat.debug_key,
                        key = error.key(),
                        error = %error,
                        "lock extension failed; cancelling task"
                    );
                    heartbeat
                        .cancel_task(ExtendLockError::extend_failed(heartbeat.extend_limit, error));
                    break;
                }
            }
        }
    })
}
