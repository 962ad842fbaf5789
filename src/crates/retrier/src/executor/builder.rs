//! Fluent construction of an [`Executor`]

use super::attempt::Core;
use super::{Executor, PanicLogger};
use crate::config::{DelayConfig, ExecutorConfig, StrategyKind};
use crate::delay::DelayPolicy;
use crate::diagnostics::{Diagnostics, NoopDiagnostics};
use crate::{Result, RetrierError};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Builder for [`Executor`]
///
/// Starts from [`ExecutorConfig::default`]. Out-of-range values are clamped
/// when the executor is built, so `with_parallelism(0)` yields one worker.
///
/// ```rust,no_run
/// use retrier::{ExponentialDelay, Executor, StrategyKind};
/// use std::time::Duration;
///
/// # fn example() -> retrier::Result<()> {
/// let executor: Executor<String> = Executor::<String>::builder()
///     .with_strategy(StrategyKind::Queued)
///     .with_parallelism(8)
///     .with_max_queue_depth(64)
///     .with_delay_policy(ExponentialDelay::new(
///         Duration::from_millis(50),
///         Duration::from_secs(5),
///     ))
///     .with_global_timeout(Duration::from_secs(30))
///     .build()?;
/// # let _ = executor;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ExecutorBuilder {
    config: ExecutorConfig,
    delay_policy: Option<Arc<dyn DelayPolicy>>,
    diagnostics: Option<Arc<dyn Diagnostics>>,
    panic_logger: Option<PanicLogger>,
    runtime: Option<Handle>,
}

impl ExecutorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every configurable value with `config`
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.config.strategy = strategy;
        self
    }

    /// Maximum number of attempts running at once
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.config.parallelism = parallelism;
        self
    }

    /// Attempts per task, including the first
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.max_attempts = max_attempts;
        self
    }

    /// Dispatcher hand-off capacity for the queued strategy
    pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.config.max_queue_depth = depth;
        self
    }

    /// Use one of the built-in delay policies, described as data
    pub fn with_delay(mut self, delay: DelayConfig) -> Self {
        self.config.delay = delay;
        self.delay_policy = None;
        self
    }

    /// Use a custom delay policy; overrides the configured delay
    pub fn with_delay_policy(mut self, policy: impl DelayPolicy + 'static) -> Self {
        self.delay_policy = Some(Arc::new(policy));
        self
    }

    /// Deadline for a whole task; zero disables it
    pub fn with_global_timeout(mut self, timeout: Duration) -> Self {
        self.config.global_timeout = Some(timeout);
        self
    }

    /// Deadline for each attempt; zero disables it
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.config.attempt_timeout = Some(timeout);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Called with the message and backtrace of every recovered panic
    pub fn with_panic_logger(mut self, logger: PanicLogger) -> Self {
        self.panic_logger = Some(logger);
        self
    }

    /// Spawn onto `runtime` instead of the runtime current at `build`
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build and start the executor
    ///
    /// Fails with [`RetrierError::NoRuntime`] when called outside a Tokio
    /// runtime and no handle was supplied.
    pub fn build<T: Send + 'static>(self) -> Result<Executor<T>> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| RetrierError::NoRuntime)?,
        };
        let config = self.config.normalized();
        let delay_policy = self
            .delay_policy
            .unwrap_or_else(|| config.delay_policy());
        let diagnostics = self
            .diagnostics
            .unwrap_or_else(|| Arc::new(NoopDiagnostics));

        let core = Core::new(
            config,
            delay_policy,
            diagnostics,
            self.panic_logger,
            runtime,
        );
        Ok(Executor::from_core(Arc::new(core)))
    }
}
