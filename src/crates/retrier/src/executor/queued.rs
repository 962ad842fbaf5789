//! Deadline heap, dispatcher and a fixed worker pool
//!
//! Records wait in a [`DeadlineHeap`] until eligible. A single dispatcher
//! sleeps until the earliest deadline, then moves every due record onto a
//! bounded channel that `parallelism` workers consume. When the channel is
//! full the dispatcher blocks, which is the backpressure bound on in-flight
//! work.

use super::attempt::{Core, RetryRecord};
use super::heap::DeadlineHeap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type SharedHeap<T> = Arc<Mutex<DeadlineHeap<RetryRecord<T>>>>;
type SharedReceiver<T> = Arc<tokio::sync::Mutex<mpsc::Receiver<RetryRecord<T>>>>;

/// Insert side of the heap: push and wake the dispatcher
struct Scheduler<T> {
    heap: SharedHeap<T>,
    wake: mpsc::UnboundedSender<Instant>,
    shutdown: CancellationToken,
}

impl<T> Clone for Scheduler<T> {
    fn clone(&self) -> Self {
        Self {
            heap: self.heap.clone(),
            wake: self.wake.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<T> Scheduler<T> {
    fn schedule(&self, record: RetryRecord<T>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let eligible_at = record.next_eligible;
        self.heap.lock().push(eligible_at, record);
        // The dispatcher only goes away on shutdown.
        let _ = self.wake.send(eligible_at);
    }
}

pub(crate) struct QueuedStrategy<T> {
    scheduler: Scheduler<T>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + 'static> QueuedStrategy<T> {
    /// Spawn the dispatcher and workers on the core's runtime
    pub(crate) fn start(core: Arc<Core>) -> Self {
        let heap: SharedHeap<T> = Arc::new(Mutex::new(DeadlineHeap::new()));
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let (exec_tx, exec_rx) = mpsc::channel(core.config.max_queue_depth.max(1));
        let exec_rx: SharedReceiver<T> = Arc::new(tokio::sync::Mutex::new(exec_rx));
        let shutdown = CancellationToken::new();

        let scheduler = Scheduler {
            heap: heap.clone(),
            wake: wake_tx,
            shutdown: shutdown.clone(),
        };

        let parallelism = core.config.parallelism.max(1);
        let mut tasks = Vec::with_capacity(parallelism + 1);
        tasks.push(core.runtime.spawn(dispatch(
            heap,
            wake_rx,
            exec_tx,
            shutdown,
        )));
        for id in 0..parallelism {
            tasks.push(core.runtime.spawn(work(
                id,
                core.clone(),
                scheduler.clone(),
                exec_rx.clone(),
            )));
        }
        debug!(
            workers = parallelism,
            max_queue_depth = core.config.max_queue_depth,
            "Queued strategy started"
        );

        Self {
            scheduler,
            tasks: Mutex::new(tasks),
        }
    }

    pub(crate) fn schedule(&self, record: RetryRecord<T>) {
        self.scheduler.schedule(record);
    }

    /// Stop the dispatcher, then wait for workers to finish their current attempt
    pub(crate) async fn stop(&self) {
        self.scheduler.shutdown.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Queued strategy task ended abnormally");
            }
        }

        let mut heap = self.scheduler.heap.lock();
        if !heap.is_empty() {
            debug!(dropped = heap.len(), "Discarding pending retries");
        }
        heap.clear();
    }
}

impl<T> QueuedStrategy<T> {
    /// Non-blocking half of [`stop`](Self::stop)
    pub(crate) fn signal_shutdown(&self) {
        self.scheduler.shutdown.cancel();
    }
}

async fn dispatch<T: Send + 'static>(
    heap: SharedHeap<T>,
    mut wake: mpsc::UnboundedReceiver<Instant>,
    exec: mpsc::Sender<RetryRecord<T>>,
    shutdown: CancellationToken,
) {
    let timer = tokio::time::sleep_until(Instant::now());
    tokio::pin!(timer);
    let mut armed: Option<Instant> = None;

    'outer: loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            Some(deadline) = wake.recv() => {
                if armed.map_or(true, |current| deadline < current) {
                    timer.as_mut().reset(deadline);
                    armed = Some(deadline);
                }
                continue;
            }
            _ = &mut timer, if armed.is_some() => {}
        }

        // Timer fired: hand every due record to the workers.
        let now = Instant::now();
        loop {
            let due = heap.lock().pop_due(now);
            let Some(record) = due else {
                break;
            };
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break 'outer,
                sent = exec.send(record) => {
                    if sent.is_err() {
                        break 'outer;
                    }
                }
            }
        }

        armed = heap.lock().peek_deadline();
        if let Some(next) = armed {
            timer.as_mut().reset(next);
        }
    }

    heap.lock().clear();
    debug!("Dispatcher stopped");
}

async fn work<T: Send + 'static>(
    id: usize,
    core: Arc<Core>,
    scheduler: Scheduler<T>,
    exec: SharedReceiver<T>,
) {
    loop {
        let next = exec.lock().await.recv().await;
        let Some(record) = next else {
            break;
        };
        // Drain without running once shutdown starts.
        if scheduler.shutdown.is_cancelled() {
            continue;
        }

        if let Some(record) = core.run_guarded(record).await {
            scheduler.schedule(record);
        }
    }
    debug!(worker = id, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExecutorConfig, StrategyKind};
    use crate::context::Context;
    use crate::error::BoxError;
    use crate::executor::work_fn;
    use crate::NoopDiagnostics;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::runtime::Handle;

    fn strategy<T: Send + 'static>(parallelism: usize) -> (Arc<Core>, QueuedStrategy<T>) {
        let config = ExecutorConfig {
            strategy: StrategyKind::Queued,
            parallelism,
            max_queue_depth: 4,
            ..Default::default()
        };
        let core = Arc::new(Core::new(
            config.clone().normalized(),
            config.delay_policy(),
            Arc::new(NoopDiagnostics),
            None,
            Handle::current(),
        ));
        let strategy = QueuedStrategy::start(core.clone());
        (core, strategy)
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_run_in_eligibility_order() {
        let (core, strategy) = strategy::<()>(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        let base = Instant::now();

        for (label, offset) in [("late", 30u64), ("early", 10), ("middle", 20)] {
            let order = order.clone();
            let work = work_fn(move |_ctx| {
                order.lock().push(label);
                async { Ok::<_, BoxError>(()) }
            });
            let mut record = core.new_record(work, None, Context::background());
            record.next_eligible = base + Duration::from_millis(offset);
            strategy.schedule(record);
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*order.lock(), vec!["early", "middle", "late"]);
        strategy.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_workers_bound_concurrency() {
        let (core, strategy) = strategy::<()>(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..12 {
            let (running, peak, done) = (running.clone(), peak.clone(), done.clone());
            let work = work_fn(move |_ctx| {
                let (running, peak, done) = (running.clone(), peak.clone(), done.clone());
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                }
            });
            strategy.schedule(core.new_record(work, None, Context::background()));
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(done.load(Ordering::SeqCst), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        strategy.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_pending_records() {
        let (core, strategy) = strategy::<()>(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let work = work_fn(move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, BoxError>(()) }
        });
        let mut record = core.new_record(work, None, Context::background());
        record.next_eligible = Instant::now() + Duration::from_secs(1);
        strategy.schedule(record);

        strategy.stop().await;
        assert!(strategy.scheduler.heap.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
