//! Task failure taxonomy
//!
//! Every way a task can end unsuccessfully is a variant of [`ExecError`].
//! The executor never panics or aborts because of user code; failures are
//! converted into one of these variants and delivered through
//! [`Try`](crate::Try).
//!
//! ```text
//! ExecError
//! ├── Task                      - work function returned an error (retryable)
//! ├── AttemptTimeout            - one attempt exceeded its deadline (retryable)
//! ├── GlobalTimeout             - the whole task exceeded its deadline
//! ├── Canceled                  - the task context was canceled externally
//! ├── WouldExceedGlobalTimeout  - next retry would start after the global deadline
//! ├── Panic                     - work function panicked (retryable)
//! └── Stopped                   - executor stopped before the task finished
//! ```

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by work functions
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Terminal or per-attempt failure of a task
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    /// The work function returned an error
    #[error("{0}")]
    Task(Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// A single attempt ran past the configured attempt timeout
    #[error("attempt timed out (attempt timeout {timeout:?})")]
    AttemptTimeout { timeout: Duration },

    /// The task ran past the configured global timeout
    #[error("task timed out (global timeout {timeout:?})")]
    GlobalTimeout { timeout: Duration },

    /// The task context was canceled before the task could finish
    #[error("task canceled")]
    Canceled,

    /// Retrying would start the next attempt after the global deadline
    #[error("next retry would exceed global timeout {timeout:?}; last error: {last_error}")]
    WouldExceedGlobalTimeout {
        timeout: Duration,
        last_error: String,
    },

    /// The work function panicked
    #[error("work function panicked: {message}")]
    Panic { message: String },

    /// The executor was stopped before the task produced a result
    #[error("executor stopped before the task completed")]
    Stopped,
}

impl ExecError {
    /// Wrap an arbitrary error returned by a work function
    pub fn task(error: impl Into<BoxError>) -> Self {
        ExecError::Task(Arc::from(error.into()))
    }

    /// Whether the executor may schedule another attempt after this failure
    ///
    /// Only work-function errors, panics and attempt timeouts are retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::Task(_) | ExecError::AttemptTimeout { .. } | ExecError::Panic { .. }
        )
    }

    /// Whether this failure was caused by either timeout horizon
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ExecError::AttemptTimeout { .. }
                | ExecError::GlobalTimeout { .. }
                | ExecError::WouldExceedGlobalTimeout { .. }
        )
    }
}

impl From<BoxError> for ExecError {
    fn from(error: BoxError) -> Self {
        ExecError::Task(Arc::from(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_messages_carry_durations() {
        let attempt = ExecError::AttemptTimeout {
            timeout: Duration::from_millis(10),
        };
        assert!(attempt.to_string().contains("10ms"));

        let global = ExecError::GlobalTimeout {
            timeout: Duration::from_secs(2),
        };
        assert!(global.to_string().contains("global timeout 2s"));
    }

    #[test]
    fn test_would_exceed_embeds_last_error() {
        let err = ExecError::WouldExceedGlobalTimeout {
            timeout: Duration::from_millis(250),
            last_error: "connection reset".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("250ms"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_task_error_passes_message_through() {
        let err = ExecError::task("disk full");
        assert_eq!(err.to_string(), "disk full");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ExecError::task("boom").is_retryable());
        assert!(ExecError::AttemptTimeout {
            timeout: Duration::from_millis(1)
        }
        .is_retryable());
        assert!(ExecError::Panic {
            message: "oops".into()
        }
        .is_retryable());
        assert!(!ExecError::Canceled.is_retryable());
        assert!(!ExecError::GlobalTimeout {
            timeout: Duration::from_millis(1)
        }
        .is_retryable());
        assert!(!ExecError::Stopped.is_retryable());
    }

    #[test]
    fn test_is_timeout() {
        assert!(ExecError::GlobalTimeout {
            timeout: Duration::ZERO
        }
        .is_timeout());
        assert!(!ExecError::Canceled.is_timeout());
        assert!(!ExecError::task("x").is_timeout());
    }
}
