//! One Tokio task per attempt, gated by a semaphore
//!
//! Each attempt is spawned right away and waits for one of `parallelism`
//! permits. A retry is a task sleeping until the record's eligibility time.

use super::attempt::{Core, RetryRecord};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone)]
pub(crate) struct ImmediateStrategy {
    core: Arc<Core>,
    permits: Arc<Semaphore>,
    parallelism: u32,
    shutdown: CancellationToken,
}

impl ImmediateStrategy {
    pub(crate) fn new(core: Arc<Core>) -> Self {
        let parallelism =
            u32::try_from(core.config.parallelism.min(Semaphore::MAX_PERMITS)).unwrap_or(u32::MAX);
        Self {
            permits: Arc::new(Semaphore::new(parallelism as usize)),
            parallelism,
            shutdown: CancellationToken::new(),
            core,
        }
    }

    pub(crate) fn schedule<T: Send + 'static>(&self, record: RetryRecord<T>) {
        let this = self.clone();
        self.core.runtime.spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = this.shutdown.cancelled() => return,
                permit = this.permits.clone().acquire_owned() => permit,
            };
            // Closed semaphore means the strategy has stopped.
            let Ok(permit) = permit else {
                return;
            };

            let retry = this.core.run_guarded(record).await;
            drop(permit);

            if let Some(record) = retry {
                this.schedule_retry(record);
            }
        });
    }

    fn schedule_retry<T: Send + 'static>(&self, record: RetryRecord<T>) {
        let this = self.clone();
        let eligible_at = record.next_eligible;
        self.core.runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = this.shutdown.cancelled() => {
                    debug!(attempts = record.attempts(), "Dropping scheduled retry on shutdown");
                }
                _ = tokio::time::sleep_until(eligible_at) => this.schedule(record),
            }
        });
    }

    /// Abandon pending retries and wait for running attempts to finish
    pub(crate) async fn stop(&self) {
        self.shutdown.cancel();
        if let Ok(permits) = self.permits.acquire_many(self.parallelism).await {
            drop(permits);
        }
        self.permits.close();
    }

    /// Non-blocking half of [`stop`](Self::stop)
    pub(crate) fn signal_shutdown(&self) {
        self.shutdown.cancel();
    }
}
