//! Bridge from lifecycle events to a metrics backend
//!
//! [`StatsSink`] is the minimal counter/gauge/timer interface a metrics
//! system exposes. [`AsyncStatsSink`] moves every call onto a background task
//! so instrumentation never blocks a worker, and [`StatsDiagnostics`] turns
//! executor lifecycle events into metric updates.

use super::{Diagnostics, Outcome};
use crate::{Result, RetrierError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Counter, gauge and timer sink of a metrics system
pub trait StatsSink: Send + Sync {
    fn increment(&self, name: &str, n: i64);
    fn gauge(&self, name: &str, value: i64);
    fn record_duration(&self, name: &str, duration: Duration);
}

enum StatsEvent {
    Increment(String, i64),
    Gauge(String, i64),
    Duration(String, Duration),
    Flush(oneshot::Sender<()>),
}

/// Wraps a synchronous sink and dispatches every call on a background task
///
/// Calls return immediately. Events are delivered in submission order. The
/// background task ends once every clone of the wrapper is dropped.
#[derive(Clone)]
pub struct AsyncStatsSink {
    tx: mpsc::UnboundedSender<StatsEvent>,
}

impl AsyncStatsSink {
    /// Wrap `inner`, spawning the dispatcher on the current Tokio runtime
    pub fn new(inner: Arc<dyn StatsSink>) -> Result<Self> {
        let handle =
            tokio::runtime::Handle::try_current().map_err(|_| RetrierError::NoRuntime)?;
        Ok(Self::with_handle(inner, &handle))
    }

    /// Wrap `inner`, spawning the dispatcher on `handle`
    pub fn with_handle(inner: Arc<dyn StatsSink>, handle: &tokio::runtime::Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        handle.spawn(dispatch(inner, rx));
        Self { tx }
    }

    /// Wait until every event sent before this call has reached the inner sink
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(StatsEvent::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    fn send(&self, event: StatsEvent) {
        // A closed channel means the runtime is gone; metrics are best effort.
        let _ = self.tx.send(event);
    }
}

async fn dispatch(inner: Arc<dyn StatsSink>, mut rx: mpsc::UnboundedReceiver<StatsEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            StatsEvent::Increment(name, n) => inner.increment(&name, n),
            StatsEvent::Gauge(name, value) => inner.gauge(&name, value),
            StatsEvent::Duration(name, duration) => inner.record_duration(&name, duration),
            StatsEvent::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Stats dispatcher stopped");
}

impl StatsSink for AsyncStatsSink {
    fn increment(&self, name: &str, n: i64) {
        self.send(StatsEvent::Increment(name.to_string(), n));
    }

    fn gauge(&self, name: &str, value: i64) {
        self.send(StatsEvent::Gauge(name.to_string(), value));
    }

    fn record_duration(&self, name: &str, duration: Duration) {
        self.send(StatsEvent::Duration(name.to_string(), duration));
    }
}

/// Diagnostics sink that reports to a [`StatsSink`]
///
/// Metric names, each prefixed with the configured prefix:
///
/// | event | metric |
/// |-------|--------|
/// | submission | `task.started` (+1), `task.submitted` (+width), `task.width` (gauge) |
/// | task end | `task.completed.<outcome>` (timer) |
/// | attempt start | `attempt.started` (+1), `attempt.scheduling_delay` (timer) |
/// | attempt end | `attempt.completed.<outcome>` (timer) |
/// | callback | `callback.duration` (timer) |
pub struct StatsDiagnostics {
    sink: Arc<dyn StatsSink>,
    prefix: String,
}

impl StatsDiagnostics {
    pub fn new(sink: Arc<dyn StatsSink>) -> Self {
        Self::with_prefix(sink, "")
    }

    /// Prefix every metric name, e.g. `"retrier."`
    pub fn with_prefix(sink: Arc<dyn StatsSink>, prefix: impl Into<String>) -> Self {
        Self {
            sink,
            prefix: prefix.into(),
        }
    }

    fn name(&self, metric: &str) -> String {
        format!("{}{}", self.prefix, metric)
    }
}

impl Diagnostics for StatsDiagnostics {
    fn task_started(&self, width: usize) {
        let width = i64::try_from(width).unwrap_or(i64::MAX);
        self.sink.increment(&self.name("task.started"), 1);
        self.sink.increment(&self.name("task.submitted"), width);
        self.sink.gauge(&self.name("task.width"), width);
    }

    fn task_completed(&self, outcome: Outcome, duration: Duration) {
        let metric = format!("task.completed.{}", outcome.as_str());
        self.sink.record_duration(&self.name(&metric), duration);
    }

    fn attempt_started(&self, scheduling_delay: Duration) {
        self.sink.increment(&self.name("attempt.started"), 1);
        self.sink
            .record_duration(&self.name("attempt.scheduling_delay"), scheduling_delay);
    }

    fn attempt_completed(&self, outcome: Outcome, duration: Duration) {
        let metric = format!("attempt.completed.{}", outcome.as_str());
        self.sink.record_duration(&self.name(&metric), duration);
    }

    fn callback_duration(&self, duration: Duration) {
        self.sink
            .record_duration(&self.name("callback.duration"), duration);
    }
}
