//! Periodically logged diagnostics
//!
//! [`PeriodicDiagnostics`] accumulates count, total and max duration per
//! outcome into lock-free counters. A ticker task swaps in a fresh window on
//! every tick and logs a summary of the one it replaced.

use super::{Diagnostics, Outcome};
use crate::logging::format_duration;
use crate::{Result, RetrierError};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Count, total and maximum of a set of durations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DurationStats {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
}

impl DurationStats {
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            let nanos = self.total.as_nanos() / u128::from(self.count);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }
    }
}

impl fmt::Display for DurationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} avg={} max={}",
            self.count,
            format_duration(self.mean()),
            format_duration(self.max)
        )
    }
}

#[derive(Default)]
struct DurationCounter {
    count: AtomicU64,
    total_nanos: AtomicU64,
    max_nanos: AtomicU64,
}

impl DurationCounter {
    fn record(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DurationStats {
        DurationStats {
            count: self.count.load(Ordering::Relaxed),
            total: Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed)),
            max: Duration::from_nanos(self.max_nanos.load(Ordering::Relaxed)),
        }
    }
}

struct Window {
    started: Instant,
    submissions: AtomicU64,
    tasks_submitted: AtomicU64,
    tasks_completed: [DurationCounter; 5],
    scheduling_delay: DurationCounter,
    attempts_completed: [DurationCounter; 5],
    callbacks: DurationCounter,
}

impl Window {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            submissions: AtomicU64::new(0),
            tasks_submitted: AtomicU64::new(0),
            tasks_completed: Default::default(),
            scheduling_delay: DurationCounter::default(),
            attempts_completed: Default::default(),
            callbacks: DurationCounter::default(),
        }
    }

    fn summarize(&self, ended: Instant) -> DiagnosticsSummary {
        DiagnosticsSummary {
            window: ended.saturating_duration_since(self.started),
            submissions: self.submissions.load(Ordering::Relaxed),
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_completed: std::array::from_fn(|i| self.tasks_completed[i].snapshot()),
            scheduling_delay: self.scheduling_delay.snapshot(),
            attempts_completed: std::array::from_fn(|i| self.attempts_completed[i].snapshot()),
            callbacks: self.callbacks.snapshot(),
        }
    }
}

/// Snapshot of one diagnostics window
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsSummary {
    /// Length of the window
    pub window: Duration,
    /// Number of submission calls (`exec`, `exec_many`, ...)
    pub submissions: u64,
    /// Number of tasks across all submissions
    pub tasks_submitted: u64,
    tasks_completed: [DurationStats; 5],
    /// Attempts started, with the delay between eligibility and start
    pub scheduling_delay: DurationStats,
    attempts_completed: [DurationStats; 5],
    /// Time spent in completion callbacks
    pub callbacks: DurationStats,
}

impl DiagnosticsSummary {
    /// Completed tasks with the given outcome
    pub fn tasks(&self, outcome: Outcome) -> DurationStats {
        self.tasks_completed[outcome.index()]
    }

    /// Completed attempts with the given outcome
    pub fn attempts(&self, outcome: Outcome) -> DurationStats {
        self.attempts_completed[outcome.index()]
    }

    pub fn total_tasks_completed(&self) -> u64 {
        self.tasks_completed.iter().map(|s| s.count).sum()
    }

    pub fn total_attempts_completed(&self) -> u64 {
        self.attempts_completed.iter().map(|s| s.count).sum()
    }

    /// True when nothing at all happened during the window
    pub fn is_empty(&self) -> bool {
        self.submissions == 0
            && self.scheduling_delay.count == 0
            && self.total_tasks_completed() == 0
            && self.total_attempts_completed() == 0
            && self.callbacks.count == 0
    }
}

impl fmt::Display for DiagnosticsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "window {}: {} submissions, {} tasks",
            format_duration(self.window),
            self.submissions,
            self.tasks_submitted
        )?;

        write!(f, "  tasks completed:")?;
        write_outcomes(f, &self.tasks_completed)?;
        writeln!(f)?;

        writeln!(f, "  attempts started: {}", self.scheduling_delay)?;

        write!(f, "  attempts completed:")?;
        write_outcomes(f, &self.attempts_completed)?;
        writeln!(f)?;

        write!(f, "  callbacks: {}", self.callbacks)
    }
}

fn write_outcomes(f: &mut fmt::Formatter<'_>, stats: &[DurationStats; 5]) -> fmt::Result {
    let mut any = false;
    for outcome in Outcome::ALL {
        let s = stats[outcome.index()];
        if s.count > 0 {
            write!(f, " {} {};", outcome, s)?;
            any = true;
        }
    }
    if !any {
        write!(f, " none")?;
    }
    Ok(())
}

/// Diagnostics sink that logs a summary every interval
///
/// # Example
///
/// ```rust,ignore
/// use retrier::{ExecutorBuilder, PeriodicDiagnostics};
/// use std::time::Duration;
///
/// let diagnostics = PeriodicDiagnostics::start(Duration::from_secs(10))?;
/// let executor = ExecutorBuilder::new()
///     .with_diagnostics(diagnostics.clone())
///     .build::<u64>()?;
/// ```
pub struct PeriodicDiagnostics {
    window: RwLock<Arc<Window>>,
    shutdown: CancellationToken,
}

impl PeriodicDiagnostics {
    /// Create an aggregator without a ticker; call `take_window` manually
    pub fn new() -> Self {
        Self {
            window: RwLock::new(Arc::new(Window::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Create an aggregator and spawn a ticker logging every `interval`
    ///
    /// Must be called from within a Tokio runtime. The ticker stops when the
    /// last handle is dropped or `shutdown` is called.
    pub fn start(interval: Duration) -> Result<Arc<Self>> {
        let handle =
            tokio::runtime::Handle::try_current().map_err(|_| RetrierError::NoRuntime)?;
        if interval.is_zero() {
            return Err(RetrierError::Config(
                "diagnostics interval must be non-zero".to_string(),
            ));
        }

        let diagnostics = Arc::new(Self::new());
        let weak = Arc::downgrade(&diagnostics);
        let shutdown = diagnostics.shutdown.clone();
        handle.spawn(run_ticker(weak, interval, shutdown));

        Ok(diagnostics)
    }

    /// Swap in a fresh window and return the summary of the previous one
    pub fn take_window(&self) -> DiagnosticsSummary {
        let previous = {
            let mut window = self.window.write();
            std::mem::replace(&mut *window, Arc::new(Window::new()))
        };
        previous.summarize(Instant::now())
    }

    /// Summary of the current window without resetting it
    pub fn peek(&self) -> DiagnosticsSummary {
        self.window.read().summarize(Instant::now())
    }

    /// Stop the ticker task
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Default for PeriodicDiagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PeriodicDiagnostics {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl fmt::Debug for PeriodicDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicDiagnostics")
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish()
    }
}

async fn run_ticker(
    diagnostics: Weak<PeriodicDiagnostics>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let Some(first_tick) = Instant::now().checked_add(interval) else {
        debug!(interval = ?interval, "Diagnostics interval out of range; not reporting");
        return;
    };
    let mut ticker = tokio::time::interval_at(first_tick, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(diagnostics) = diagnostics.upgrade() else {
            break;
        };
        let summary = diagnostics.take_window();
        drop(diagnostics);

        if summary.is_empty() {
            debug!(window = ?summary.window, "No executor activity");
        } else {
            info!(
                submissions = summary.submissions,
                tasks_completed = summary.total_tasks_completed(),
                attempts_completed = summary.total_attempts_completed(),
                "Executor diagnostics\n{}",
                summary
            );
        }
    }

    debug!("Diagnostics ticker stopped");
}

impl Diagnostics for PeriodicDiagnostics {
    fn task_started(&self, width: usize) {
        let window = self.window.read();
        window.submissions.fetch_add(1, Ordering::Relaxed);
        window
            .tasks_submitted
            .fetch_add(width as u64, Ordering::Relaxed);
    }

    fn task_completed(&self, outcome: Outcome, duration: Duration) {
        self.window.read().tasks_completed[outcome.index()].record(duration);
    }

    fn attempt_started(&self, scheduling_delay: Duration) {
        self.window.read().scheduling_delay.record(scheduling_delay);
    }

    fn attempt_completed(&self, outcome: Outcome, duration: Duration) {
        self.window.read().attempts_completed[outcome.index()].record(duration);
    }

    fn callback_duration(&self, duration: Duration) {
        self.window.read().callbacks.record(duration);
    }
}
