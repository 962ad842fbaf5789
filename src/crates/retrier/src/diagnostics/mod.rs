//! Lifecycle observers
//!
//! The executor reports every task start, attempt start, attempt outcome,
//! task completion and callback duration to a [`Diagnostics`] sink. Sinks are
//! write-only; the executor never reads anything back.
//!
//! Provided sinks:
//! - [`NoopDiagnostics`] discards everything
//! - [`PeriodicDiagnostics`] aggregates per-outcome counters and logs a summary
//!   every window
//! - [`StatsDiagnostics`] forwards events to a [`StatsSink`] metric backend

mod periodic;
mod stats;

pub use periodic::{DiagnosticsSummary, DurationStats, PeriodicDiagnostics};
pub use stats::{AsyncStatsSink, StatsDiagnostics, StatsSink};

use crate::error::ExecError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Classification of one attempt or one finished task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// A single attempt exceeded the attempt timeout
    AttemptTimeout,
    /// The task exceeded the global timeout, or a retry would have
    GlobalTimeout,
    Canceled,
    /// The work function returned an error or panicked
    Error,
}

impl Outcome {
    pub const ALL: [Outcome; 5] = [
        Outcome::Success,
        Outcome::AttemptTimeout,
        Outcome::GlobalTimeout,
        Outcome::Canceled,
        Outcome::Error,
    ];

    /// Stable lowercase name used in logs and metric names
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::AttemptTimeout => "attempt_timeout",
            Outcome::GlobalTimeout => "global_timeout",
            Outcome::Canceled => "canceled",
            Outcome::Error => "error",
        }
    }

    /// Outcome a failed task or attempt is counted under
    pub fn from_error(error: &ExecError) -> Outcome {
        match error {
            ExecError::AttemptTimeout { .. } => Outcome::AttemptTimeout,
            ExecError::GlobalTimeout { .. } | ExecError::WouldExceedGlobalTimeout { .. } => {
                Outcome::GlobalTimeout
            }
            ExecError::Canceled | ExecError::Stopped => Outcome::Canceled,
            ExecError::Task(_) | ExecError::Panic { .. } => Outcome::Error,
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Outcome::Success => 0,
            Outcome::AttemptTimeout => 1,
            Outcome::GlobalTimeout => 2,
            Outcome::Canceled => 3,
            Outcome::Error => 4,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer of task and attempt lifecycle events
///
/// Implementations are called concurrently from many workers and must not
/// block on I/O.
pub trait Diagnostics: Send + Sync {
    /// A submission of `width` tasks was accepted
    fn task_started(&self, width: usize);

    /// A task reached its terminal state
    fn task_completed(&self, outcome: Outcome, duration: Duration);

    /// An attempt began, `scheduling_delay` after it became eligible
    fn attempt_started(&self, scheduling_delay: Duration);

    /// An attempt finished
    fn attempt_completed(&self, outcome: Outcome, duration: Duration);

    /// Time spent inside the user's completion callback
    fn callback_duration(&self, duration: Duration);
}

/// Diagnostics sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDiagnostics;

impl Diagnostics for NoopDiagnostics {
    fn task_started(&self, _width: usize) {}
    fn task_completed(&self, _outcome: Outcome, _duration: Duration) {}
    fn attempt_started(&self, _scheduling_delay: Duration) {}
    fn attempt_completed(&self, _outcome: Outcome, _duration: Duration) {}
    fn callback_duration(&self, _duration: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_names() {
        assert_eq!(Outcome::AttemptTimeout.as_str(), "attempt_timeout");
        assert_eq!(Outcome::GlobalTimeout.to_string(), "global_timeout");
    }

    #[test]
    fn test_outcome_indices_are_distinct() {
        for (i, outcome) in Outcome::ALL.iter().enumerate() {
            assert_eq!(outcome.index(), i);
        }
    }

    #[test]
    fn test_outcome_serde_names_match_as_str() {
        for outcome in Outcome::ALL {
            let json = serde_json::to_string(&outcome).unwrap();
            assert_eq!(json, format!("\"{}\"", outcome.as_str()));
        }
    }

    #[test]
    fn test_outcome_from_error() {
        assert_eq!(Outcome::from_error(&ExecError::task("x")), Outcome::Error);
        assert_eq!(
            Outcome::from_error(&ExecError::WouldExceedGlobalTimeout {
                timeout: Duration::ZERO,
                last_error: String::new(),
            }),
            Outcome::GlobalTimeout
        );
        assert_eq!(Outcome::from_error(&ExecError::Canceled), Outcome::Canceled);
        assert_eq!(
            Outcome::from_error(&ExecError::AttemptTimeout {
                timeout: Duration::from_millis(5)
            }),
            Outcome::AttemptTimeout
        );
    }

    #[test]
    fn test_noop_accepts_everything() {
        let sink = NoopDiagnostics;
        sink.task_started(3);
        sink.attempt_started(Duration::from_millis(1));
        sink.attempt_completed(Outcome::Error, Duration::from_millis(2));
        sink.task_completed(Outcome::Success, Duration::from_millis(3));
        sink.callback_duration(Duration::from_micros(4));
    }
}
