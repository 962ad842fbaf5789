//! Cancellable, deadline-carrying context for work functions
//!
//! A [`Context`] is handed to every attempt. It resolves [`Context::done`]
//! when it is canceled or its deadline passes, and [`Context::err`] reports
//! which of the two happened. The first cause observed sticks, so a context
//! that expired and is canceled later still reports `DeadlineExceeded`.
//!
//! Children inherit the parent's cancellation and the tighter of the two
//! deadlines. The executor relies on this to tell a global timeout (parent
//! expired) from an attempt timeout (only the child expired).

use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context is done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// `cancel()` was called on this context or an ancestor
    #[error("context canceled")]
    Canceled,
    /// The deadline of this context or an ancestor passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Handle passed to work functions for cooperative cancellation
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    token: CancellationToken,
    deadline: Option<Instant>,
    cause: OnceLock<ContextError>,
    parent: Option<Context>,
}

impl Context {
    /// Root context with no deadline
    pub fn background() -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                deadline: None,
                cause: OnceLock::new(),
                parent: None,
            }),
        }
    }

    /// Root context that expires at `deadline`
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::background().child_with_deadline(Some(deadline))
    }

    /// Child that is canceled with this context and shares its deadline
    pub fn child(&self) -> Self {
        self.child_with_deadline(None)
    }

    /// Child that additionally expires after `timeout`
    ///
    /// A timeout too large to represent as an instant adds no deadline.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        self.child_with_deadline(Instant::now().checked_add(timeout))
    }

    fn child_with_deadline(&self, deadline: Option<Instant>) -> Self {
        let deadline = match (self.inner.deadline, deadline) {
            (Some(parent), Some(own)) => Some(parent.min(own)),
            (parent, own) => parent.or(own),
        };

        Self {
            inner: Arc::new(Inner {
                token: self.inner.token.child_token(),
                deadline,
                cause: OnceLock::new(),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Cancel this context and all of its children
    pub fn cancel(&self) {
        let _ = self.inner.cause.set(ContextError::Canceled);
        self.inner.token.cancel();
    }

    /// Effective deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the deadline
    ///
    /// Returns `None` when there is no deadline and `Some(Duration::ZERO)` once
    /// it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Why this context is done, or `None` while it is still live
    pub fn err(&self) -> Option<ContextError> {
        if let Some(cause) = self.inner.cause.get() {
            return Some(*cause);
        }

        if let Some(parent) = &self.inner.parent {
            if let Some(cause) = parent.err() {
                return Some(*self.inner.cause.get_or_init(|| cause));
            }
        }

        if let Some(deadline) = self.inner.deadline {
            if Instant::now() >= deadline {
                return Some(*self.inner.cause.get_or_init(|| ContextError::DeadlineExceeded));
            }
        }

        None
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolve once the context is canceled or its deadline passes
    pub async fn done(&self) {
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.inner.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.inner.token.cancelled().await,
        }
    }

    /// Run `future` unless the context finishes first
    ///
    /// Returns the context error if the context won the race.
    pub async fn run_until_done<F, T>(&self, future: F) -> Result<T, ContextError>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            output = future => Ok(output),
            _ = self.done() => Err(self.err().unwrap_or(ContextError::Canceled)),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
