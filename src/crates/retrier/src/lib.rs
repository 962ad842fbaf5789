//! In-process asynchronous task executor with retries
//!
//! `retrier` runs caller-supplied work functions on a Tokio runtime and hands
//! the final outcome to a callback. Every task gets a retry budget, a delay
//! policy between attempts, an optional global timeout covering the whole
//! task and an optional per-attempt timeout.
//!
//! # Modules
//!
//! - `executor` - The engine, its builder and the two scheduling strategies
//! - `context` - Cancellable, deadline-carrying handle passed to work functions
//! - `result` - The `Try` success/failure carrier
//! - `delay` - Constant and capped-exponential delay policies
//! - `diagnostics` - Lifecycle observers (no-op, periodic logging, stats sink)
//! - `config` - Serializable executor configuration and environment loading
//! - `error` - Task failure taxonomy
//! - `logging` - Duration formatting and the default panic logger
//!
//! # Example
//!
//! ```rust,ignore
//! use retrier::{ExecutorBuilder, ConstantDelay, Try};
//! use std::time::Duration;
//!
//! let executor = ExecutorBuilder::new()
//!     .with_max_attempts(3)
//!     .with_delay_policy(ConstantDelay::new(Duration::from_millis(50)))
//!     .with_attempt_timeout(Duration::from_secs(1))
//!     .build::<String>()?;
//!
//! executor.exec(
//!     |ctx| async move { fetch(ctx).await },
//!     Some(Box::new(|result: Try<String>| {
//!         if result.is_success() {
//!             println!("got {}", result.value());
//!         }
//!     })),
//! );
//!
//! executor.stop().await;
//! ```

pub mod config;
pub mod context;
pub mod delay;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod logging;
pub mod result;

pub use config::{DelayConfig, ExecutorConfig, StrategyKind};
pub use context::{Context, ContextError};
pub use delay::{ConstantDelay, DelayPolicy, ExponentialDelay};
pub use diagnostics::{
    AsyncStatsSink, Diagnostics, DiagnosticsSummary, NoopDiagnostics, Outcome,
    PeriodicDiagnostics, StatsDiagnostics, StatsSink,
};
pub use error::{BoxError, ExecError};
pub use executor::{
    work_fn, Callback, Executor, ExecutorBuilder, ManyCallback, PanicLogger, WorkFn,
};
pub use result::Try;

use thiserror::Error;

/// Errors raised while configuring or constructing an executor
///
/// Task failures never surface here; they travel inside [`Try`].
#[derive(Debug, Error)]
pub enum RetrierError {
    /// Invalid or unparsable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// `build()` was called outside a Tokio runtime and no handle was supplied
    #[error("No Tokio runtime available; build inside a runtime or pass one with with_runtime()")]
    NoRuntime,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for configuration and construction
pub type Result<T> = std::result::Result<T, RetrierError>;

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
