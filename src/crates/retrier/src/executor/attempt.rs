//! Per-attempt algorithm shared by both strategies
//!
//! A strategy decides *when* an attempt runs; [`Core::run_attempt`] decides
//! what the attempt means. It invokes the work function behind a panic
//! boundary, classifies the outcome by comparing the task context with the
//! attempt context, and either completes the task or hands the record back
//! for rescheduling.

use super::{Callback, PanicLogger, WorkFn};
use crate::config::ExecutorConfig;
use crate::context::{Context, ContextError};
use crate::delay::DelayPolicy;
use crate::diagnostics::{Diagnostics, Outcome};
use crate::error::{BoxError, ExecError};
use crate::result::Try;
use futures::FutureExt;
use parking_lot::RwLock;
use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// State of one task across its attempts
///
/// Owned by exactly one party at a time: the strategy while waiting, the
/// worker while an attempt runs. Attempts of one task therefore never
/// overlap.
pub(crate) struct RetryRecord<T> {
    work: WorkFn<T>,
    callback: Option<Callback<T>>,
    started_at: Instant,
    /// When the next attempt may start
    pub(crate) next_eligible: Instant,
    /// Task context; carries the global deadline
    ctx: Context,
    attempts: u32,
}

impl<T> RetryRecord<T> {
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }
}

pub(crate) struct Core {
    pub(crate) config: ExecutorConfig,
    delay_policy: Arc<dyn DelayPolicy>,
    diagnostics: RwLock<Arc<dyn Diagnostics>>,
    panic_logger: Option<PanicLogger>,
    stopped: AtomicBool,
    pub(crate) runtime: Handle,
}

impl Core {
    pub(crate) fn new(
        config: ExecutorConfig,
        delay_policy: Arc<dyn DelayPolicy>,
        diagnostics: Arc<dyn Diagnostics>,
        panic_logger: Option<PanicLogger>,
        runtime: Handle,
    ) -> Self {
        Self {
            config,
            delay_policy,
            diagnostics: RwLock::new(diagnostics),
            panic_logger,
            stopped: AtomicBool::new(false),
            runtime,
        }
    }

    pub(crate) fn diagnostics(&self) -> Arc<dyn Diagnostics> {
        self.diagnostics.read().clone()
    }

    pub(crate) fn set_diagnostics(&self, diagnostics: Arc<dyn Diagnostics>) {
        *self.diagnostics.write() = diagnostics;
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Mark the core stopped; returns true if it already was
    pub(crate) fn mark_stopped(&self) -> bool {
        self.stopped.swap(true, Ordering::AcqRel)
    }

    /// Root context for a new submission, bounded by the global timeout
    pub(crate) fn submission_context(&self) -> Context {
        let deadline = self
            .config
            .global_timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));
        match deadline {
            Some(deadline) => Context::with_deadline(deadline),
            None => Context::background(),
        }
    }

    pub(crate) fn new_record<T>(
        &self,
        work: WorkFn<T>,
        callback: Option<Callback<T>>,
        ctx: Context,
    ) -> RetryRecord<T> {
        let now = Instant::now();
        RetryRecord {
            work,
            callback,
            started_at: now,
            next_eligible: now,
            ctx,
            attempts: 0,
        }
    }

    /// Run one attempt of `record`
    ///
    /// Returns the record when another attempt should be scheduled at
    /// `record.next_eligible`; otherwise the task is finished and its
    /// callback has run.
    pub(crate) async fn run_attempt<T: Send + 'static>(
        &self,
        mut record: RetryRecord<T>,
    ) -> Option<RetryRecord<T>> {
        let diagnostics = self.diagnostics();
        let started = Instant::now();
        diagnostics.attempt_started(started.saturating_duration_since(record.next_eligible));

        let (outcome, result) = match record.ctx.err() {
            Some(cause) => {
                let error = self.task_context_error(cause);
                (Outcome::from_error(&error), Err(error))
            }
            None => {
                record.attempts += 1;
                let attempt_ctx = match self.config.attempt_timeout {
                    Some(timeout) => record.ctx.child_with_timeout(timeout),
                    None => record.ctx.child(),
                };

                let returned = self.invoke(&record.work, attempt_ctx.clone()).await;
                let classified = self.classify(returned, &record.ctx, &attempt_ctx);
                attempt_ctx.cancel();
                classified
            }
        };

        let finished = Instant::now();
        diagnostics.attempt_completed(outcome, finished.saturating_duration_since(started));

        if self.is_stopped() {
            debug!(attempts = record.attempts, "Executor stopped; dropping task");
            record.ctx.cancel();
            return None;
        }

        let result = match result {
            Err(error) if error.is_retryable() && record.attempts < self.config.max_attempts => {
                let delay = self.delay_policy.delay(record.attempts);
                let next_eligible = finished.checked_add(delay);

                match (record.ctx.deadline(), next_eligible) {
                    (Some(deadline), next) if next.map_or(true, |next| deadline < next) => {
                        debug!(
                            attempts = record.attempts,
                            delay = ?delay,
                            error = %error,
                            "Next retry would pass the global deadline"
                        );
                        Err(ExecError::WouldExceedGlobalTimeout {
                            timeout: self.config.global_timeout.unwrap_or_default(),
                            last_error: error.to_string(),
                        })
                    }
                    (_, None) => {
                        warn!(
                            attempts = record.attempts,
                            delay = ?delay,
                            error = %error,
                            "Retry delay out of range; giving up"
                        );
                        Err(error)
                    }
                    (_, Some(next_eligible)) => {
                        debug!(
                            attempts = record.attempts,
                            max_attempts = self.config.max_attempts,
                            delay = ?delay,
                            error = %error,
                            "Attempt failed; scheduling retry"
                        );
                        record.next_eligible = next_eligible;
                        return Some(record);
                    }
                }
            }
            other => other,
        };

        let task_outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(error) => Outcome::from_error(error),
        };
        self.complete(record, task_outcome, result, diagnostics.as_ref());
        None
    }

    /// [`run_attempt`](Self::run_attempt) with panics outside the work
    /// function contained
    ///
    /// Such a panic (a misbehaving diagnostics sink, for one) loses the
    /// record without running its callback, but leaves the calling worker
    /// alive.
    pub(crate) async fn run_guarded<T: Send + 'static>(
        &self,
        record: RetryRecord<T>,
    ) -> Option<RetryRecord<T>> {
        match AssertUnwindSafe(self.run_attempt(record)).catch_unwind().await {
            Ok(next) => next,
            Err(payload) => {
                let error = panic_to_error(payload);
                error!(error = %error, "Attempt panicked outside the work function; task dropped");
                self.log_panic(&error);
                None
            }
        }
    }

    async fn invoke<T>(&self, work: &WorkFn<T>, ctx: Context) -> Result<T, ExecError> {
        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| work(ctx))) {
            Ok(future) => future,
            Err(payload) => return Err(self.recovered_panic(payload)),
        };

        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(ExecError::from(error)),
            Err(payload) => Err(self.recovered_panic(payload)),
        }
    }

    /// Reclassify a failed attempt by which context layer expired
    fn classify<T>(
        &self,
        returned: Result<T, ExecError>,
        task_ctx: &Context,
        attempt_ctx: &Context,
    ) -> (Outcome, Result<T, ExecError>) {
        let error = match returned {
            Ok(value) => return (Outcome::Success, Ok(value)),
            Err(error) => error,
        };

        let error = match (task_ctx.err(), attempt_ctx.err()) {
            (Some(cause), _) => self.task_context_error(cause),
            (None, Some(ContextError::DeadlineExceeded)) => ExecError::AttemptTimeout {
                timeout: self.config.attempt_timeout.unwrap_or_default(),
            },
            _ => error,
        };

        (Outcome::from_error(&error), Err(error))
    }

    fn task_context_error(&self, cause: ContextError) -> ExecError {
        match cause {
            ContextError::DeadlineExceeded => ExecError::GlobalTimeout {
                timeout: self.config.global_timeout.unwrap_or_default(),
            },
            ContextError::Canceled => ExecError::Canceled,
        }
    }

    fn complete<T>(
        &self,
        record: RetryRecord<T>,
        outcome: Outcome,
        result: Result<T, ExecError>,
        diagnostics: &dyn Diagnostics,
    ) {
        let RetryRecord {
            callback,
            started_at,
            ctx,
            attempts,
            ..
        } = record;

        diagnostics.task_completed(outcome, started_at.elapsed());
        ctx.cancel();

        if let Err(error) = &result {
            debug!(attempts, outcome = %outcome, error = %error, "Task failed");
        }

        let Some(callback) = callback else {
            return;
        };

        let callback_started = Instant::now();
        let delivered = Try::from(result);
        if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| callback(delivered))) {
            let error = panic_to_error(payload);
            warn!(error = %error, "Completion callback panicked");
            self.log_panic(&error);
        }
        diagnostics.callback_duration(callback_started.elapsed());
    }

    fn recovered_panic(&self, payload: Box<dyn Any + Send>) -> ExecError {
        let error = panic_to_error(payload);
        warn!(error = %error, "Recovered panic in work function");
        self.log_panic(&error);
        error
    }

    fn log_panic(&self, error: &ExecError) {
        if let Some(logger) = &self.panic_logger {
            logger(&error.to_string(), &Backtrace::force_capture());
        }
    }
}

/// Convert a panic payload into a failure
///
/// String payloads become the message, error payloads pass through, anything
/// else gets a generic description.
pub(crate) fn panic_to_error(payload: Box<dyn Any + Send>) -> ExecError {
    let payload = match payload.downcast::<ExecError>() {
        Ok(error) => return *error,
        Err(payload) => payload,
    };
    let payload = match payload.downcast::<BoxError>() {
        Ok(error) => return ExecError::Task(Arc::from(*error)),
        Err(payload) => payload,
    };

    let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        format!("panic with non-string payload ({:?})", (*payload).type_id())
    };

    ExecError::Panic { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::ConstantDelay;
    use crate::diagnostics::PeriodicDiagnostics;
    use crate::executor::work_fn;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn core_with(config: ExecutorConfig, diagnostics: Arc<dyn Diagnostics>) -> Core {
        let policy = config.delay_policy();
        Core::new(
            config.normalized(),
            policy,
            diagnostics,
            None,
            Handle::current(),
        )
    }

    fn capture<T: Send + 'static>() -> (Callback<T>, Arc<Mutex<Option<Try<T>>>>) {
        let slot = Arc::new(Mutex::new(None));
        let sink = slot.clone();
        let callback: Callback<T> = Box::new(move |result| {
            *sink.lock() = Some(result);
        });
        (callback, slot)
    }

    #[test]
    fn test_panic_payloads() {
        let err = panic_to_error(Box::new("static message"));
        assert_eq!(err.to_string(), "work function panicked: static message");

        let err = panic_to_error(Box::new(String::from("owned message")));
        assert!(err.to_string().contains("owned message"));

        let boxed: BoxError = "inner failure".into();
        let err = panic_to_error(Box::new(boxed));
        assert!(matches!(err, ExecError::Task(_)));
        assert_eq!(err.to_string(), "inner failure");

        let err = panic_to_error(Box::new(ExecError::Canceled));
        assert!(matches!(err, ExecError::Canceled));

        let err = panic_to_error(Box::new(17u32));
        assert!(err.to_string().contains("non-string payload"));
    }

    #[tokio::test]
    async fn test_success_completes_on_first_attempt() {
        let diag = Arc::new(PeriodicDiagnostics::new());
        let core = core_with(ExecutorConfig::default(), diag.clone());
        let (callback, slot) = capture::<u32>();

        let work = work_fn(|_ctx| async { Ok::<_, BoxError>(5) });
        let record = core.new_record(work, Some(callback), Context::background());

        assert!(core.run_attempt(record).await.is_none());
        assert_eq!(*slot.lock().take().unwrap().value(), 5);

        let summary = diag.take_window();
        assert_eq!(summary.attempts(Outcome::Success).count, 1);
        assert_eq!(summary.tasks(Outcome::Success).count, 1);
        assert_eq!(summary.callbacks.count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_returns_record_with_next_eligible() {
        let config = ExecutorConfig {
            delay: crate::config::DelayConfig::Constant {
                delay: Duration::from_millis(40),
            },
            ..Default::default()
        };
        let core = core_with(config, Arc::new(crate::NoopDiagnostics));
        let work = work_fn(|_ctx| async { Err::<u32, _>("flaky") });
        let record = core.new_record(work, None, Context::background());

        let before = Instant::now();
        let record = core.run_attempt(record).await.expect("should retry");
        assert_eq!(record.attempts(), 1);
        assert_eq!(record.next_eligible, before + Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_expired_task_context_skips_work() {
        let core = core_with(ExecutorConfig::default(), Arc::new(crate::NoopDiagnostics));
        let (callback, slot) = capture::<u32>();
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = calls.clone();
        let work = work_fn(move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, BoxError>(1) }
        });

        let ctx = Context::background();
        ctx.cancel();
        let record = core.new_record(work, Some(callback), ctx);

        assert!(core.run_attempt(record).await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(
            slot.lock().take().unwrap().error(),
            ExecError::Canceled
        ));
    }

    #[tokio::test]
    async fn test_panicking_work_is_contained() {
        let config = ExecutorConfig {
            max_attempts: 1,
            ..Default::default()
        };
        let logged = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = logged.clone();
        let logger: PanicLogger = Arc::new(move |message: &str, _bt: &Backtrace| {
            sink.lock().push(message.to_string());
        });
        let core = Core::new(
            config.normalized(),
            Arc::new(ConstantDelay::zero()),
            Arc::new(crate::NoopDiagnostics),
            Some(logger),
            Handle::current(),
        );
        let (callback, slot) = capture::<u32>();
        let work = work_fn(|_ctx| async {
            if true {
                panic!("kaboom");
            }
            Ok::<u32, BoxError>(0)
        });
        let record = core.new_record(work, Some(callback), Context::background());

        assert!(core.run_attempt(record).await.is_none());
        let result = slot.lock().take().unwrap();
        assert!(result.error().to_string().contains("kaboom"));
        assert_eq!(logged.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_panicking_callback_is_contained() {
        let core = core_with(ExecutorConfig::default(), Arc::new(crate::NoopDiagnostics));
        let work = work_fn(|_ctx| async { Ok::<_, BoxError>(()) });
        let callback: Callback<()> = Box::new(|_| panic!("callback exploded"));
        let record = core.new_record(work, Some(callback), Context::background());

        assert!(core.run_attempt(record).await.is_none());
    }

    #[tokio::test]
    async fn test_stopped_core_drops_callback() {
        let core = core_with(ExecutorConfig::default(), Arc::new(crate::NoopDiagnostics));
        let (callback, slot) = capture::<u32>();
        let work = work_fn(|_ctx| async { Ok::<_, BoxError>(9) });
        let record = core.new_record(work, Some(callback), Context::background());

        assert!(!core.mark_stopped());
        assert!(core.mark_stopped());
        assert!(core.run_attempt(record).await.is_none());
        assert!(slot.lock().is_none());
    }
}
