//! The retrying executor
//!
//! [`Executor`] accepts work functions, runs them with bounded parallelism,
//! retries failures according to its delay policy, and reports each task's
//! final [`Try`] to a completion callback.
//!
//! # Example
//!
//! ```rust,no_run
//! use retrier::{BoxError, Executor, Try};
//! use std::time::Duration;
//!
//! # async fn example() -> retrier::Result<()> {
//! let executor: Executor<u64> = Executor::<u64>::builder()
//!     .with_parallelism(4)
//!     .with_max_attempts(3)
//!     .with_attempt_timeout(Duration::from_secs(2))
//!     .build()?;
//!
//! let result = executor
//!     .exec_async(|_ctx| async { Ok::<_, BoxError>(42) })
//!     .await;
//! assert!(matches!(result, Try::Success(42)));
//!
//! executor.stop().await;
//! # Ok(())
//! # }
//! ```

mod attempt;
mod builder;
mod fanout;
mod heap;
mod immediate;
mod queued;

pub use builder::ExecutorBuilder;

use self::attempt::{Core, RetryRecord};
use self::fanout::{Gather, Remaining};
use self::immediate::ImmediateStrategy;
use self::queued::QueuedStrategy;
use crate::config::{ExecutorConfig, StrategyKind};
use crate::context::Context;
use crate::diagnostics::Diagnostics;
use crate::error::{BoxError, ExecError};
use crate::result::Try;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::backtrace::Backtrace;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// A unit of work: called once per attempt with that attempt's context
pub type WorkFn<T> =
    Arc<dyn Fn(Context) -> BoxFuture<'static, Result<T, BoxError>> + Send + Sync>;

/// Receives a task's final result
pub type Callback<T> = Box<dyn FnOnce(Try<T>) + Send>;

/// Receives each unit's final result in a fan-out, with the unit's index
pub type ManyCallback<T> = Arc<dyn Fn(usize, Try<T>) + Send + Sync>;

/// Receives the message and backtrace of every recovered panic
pub type PanicLogger = Arc<dyn Fn(&str, &Backtrace) + Send + Sync>;

/// Wrap an async closure as a [`WorkFn`]
///
/// ```rust
/// use retrier::{work_fn, BoxError};
///
/// let work = work_fn(|ctx| async move {
///     if ctx.is_done() {
///         return Err::<u32, BoxError>("gave up".into());
///     }
///     Ok(7)
/// });
/// # let _ = work;
/// ```
pub fn work_fn<T, E, F, Fut>(f: F) -> WorkFn<T>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    E: Into<BoxError>,
    T: 'static,
{
    Arc::new(move |ctx| {
        let fut = f(ctx);
        async move { fut.await.map_err(Into::into) }.boxed()
    })
}

enum Strategy<T> {
    Immediate(ImmediateStrategy),
    Queued(QueuedStrategy<T>),
}

/// Retrying task executor
///
/// Build one with [`Executor::builder`]. Call [`stop`](Executor::stop) before
/// dropping it to wait for running attempts; dropping it without stopping
/// abandons pending retries without waiting.
pub struct Executor<T> {
    core: Arc<Core>,
    strategy: Strategy<T>,
}

impl<T: Send + 'static> Executor<T> {
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    fn from_core(core: Arc<Core>) -> Self {
        let strategy = match core.config.strategy {
            StrategyKind::Immediate => Strategy::Immediate(ImmediateStrategy::new(core.clone())),
            StrategyKind::Queued => Strategy::Queued(QueuedStrategy::start(core.clone())),
        };
        info!(
            strategy = %core.config.strategy,
            parallelism = core.config.parallelism,
            max_attempts = core.config.max_attempts,
            "Executor started"
        );
        Self { core, strategy }
    }

    /// Effective configuration, after normalization
    pub fn config(&self) -> &ExecutorConfig {
        &self.core.config
    }

    pub fn is_stopped(&self) -> bool {
        self.core.is_stopped()
    }

    /// Submit one task; `callback` receives its final result
    ///
    /// Returns immediately. Submissions after [`stop`](Self::stop) are dropped.
    pub fn exec<F, Fut, E>(&self, f: F, callback: Option<Callback<T>>)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.exec_work(work_fn(f), callback);
    }

    /// [`exec`](Self::exec) for an already wrapped [`WorkFn`]
    pub fn exec_work(&self, work: WorkFn<T>, callback: Option<Callback<T>>) {
        if self.reject_if_stopped(1) {
            return;
        }
        self.core.diagnostics().task_started(1);
        let ctx = self.core.submission_context();
        self.submit(self.core.new_record(work, callback, ctx));
    }

    /// Submit one task and ignore its result
    pub fn exec_and_forget<F, Fut, E>(&self, f: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.exec(f, None);
    }

    /// Submit one task and wait for its final result
    ///
    /// Resolves to [`ExecError::Stopped`] if the executor stops before the
    /// task completes.
    pub async fn exec_async<F, Fut, E>(&self, f: F) -> Try<T>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let (tx, rx) = oneshot::channel();
        self.exec(
            f,
            Some(Box::new(move |result: Try<T>| {
                let _ = tx.send(result);
            })),
        );
        rx.await.unwrap_or(Try::Failure(ExecError::Stopped))
    }

    /// Submit independent units sharing one global deadline
    ///
    /// `callback` runs once per unit with the unit's index. An empty batch
    /// does nothing.
    pub fn exec_many(&self, works: Vec<WorkFn<T>>, callback: Option<ManyCallback<T>>) {
        if works.is_empty() || self.reject_if_stopped(works.len()) {
            return;
        }

        let shared = self.core.submission_context();
        let remaining = Remaining::new(works.len(), shared.clone());
        self.submit_batch(works, &shared, |index| {
            let callback = callback.clone();
            let remaining = remaining.clone();
            Box::new(move |result: Try<T>| {
                remaining.complete_one();
                if let Some(callback) = callback {
                    callback(index, result);
                }
            })
        });
    }

    /// Submit units whose results are delivered together, in input order
    ///
    /// The first unit to fail cancels its siblings and `callback` receives
    /// that failure. An empty batch calls `callback` right away with an empty
    /// vector.
    pub fn exec_gathered(&self, works: Vec<WorkFn<T>>, callback: Option<Callback<Vec<T>>>) {
        let Some(callback) = callback else {
            self.exec_many(works, None);
            return;
        };
        if works.is_empty() {
            callback(Try::Success(Vec::new()));
            return;
        }
        if self.reject_if_stopped(works.len()) {
            return;
        }

        let shared = self.core.submission_context();
        let gather = Gather::new(works.len(), callback, shared.clone());
        self.submit_batch(works, &shared, |index| {
            let gather = gather.clone();
            Box::new(move |result: Try<T>| gather.complete(index, result))
        });
    }

    /// Replace the diagnostics sink; later events go to `diagnostics`
    pub fn set_diagnostics(&self, diagnostics: Arc<dyn Diagnostics>) {
        self.core.set_diagnostics(diagnostics);
    }

    /// Stop accepting work and wait for running attempts to finish
    ///
    /// Pending retries are dropped and no callback runs afterwards. Calling
    /// `stop` again returns immediately.
    pub async fn stop(&self) {
        if self.core.mark_stopped() {
            return;
        }
        info!("Stopping executor");
        match &self.strategy {
            Strategy::Immediate(strategy) => strategy.stop().await,
            Strategy::Queued(strategy) => strategy.stop().await,
        }
        info!("Executor stopped");
    }

    fn submit_batch<C>(&self, works: Vec<WorkFn<T>>, shared: &Context, mut unit_callback: C)
    where
        C: FnMut(usize) -> Callback<T>,
    {
        self.core.diagnostics().task_started(works.len());
        for (index, work) in works.into_iter().enumerate() {
            let callback = unit_callback(index);
            self.submit(
                self.core
                    .new_record(work, Some(callback), shared.child()),
            );
        }
    }

    fn submit(&self, record: RetryRecord<T>) {
        match &self.strategy {
            Strategy::Immediate(strategy) => strategy.schedule(record),
            Strategy::Queued(strategy) => strategy.schedule(record),
        }
    }

    fn reject_if_stopped(&self, width: usize) -> bool {
        if self.core.is_stopped() {
            warn!(width, "Executor stopped; dropping submission");
            return true;
        }
        false
    }
}

impl<T> Drop for Executor<T> {
    fn drop(&mut self) {
        if self.core.mark_stopped() {
            return;
        }
        match &self.strategy {
            Strategy::Immediate(strategy) => strategy.signal_shutdown(),
            Strategy::Queued(strategy) => strategy.signal_shutdown(),
        }
    }
}

impl<T> fmt::Debug for Executor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.core.config)
            .field("stopped", &self.core.is_stopped())
            .finish()
    }
}
