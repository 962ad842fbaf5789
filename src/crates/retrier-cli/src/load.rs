//! Simulated flaky work and the load-test driver

use crate::cli::{Mode, RunArgs};
use anyhow::{bail, Result};
use rand::Rng;
use retrier::logging::format_duration;
use retrier::{
    work_fn, Context, DiagnosticsSummary, Executor, ManyCallback, Outcome, Try, WorkFn,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

/// Failures produced by simulated work
#[derive(Debug, Error)]
pub enum SimulatedError {
    #[error("simulated failure on attempt {attempt}")]
    Failed { attempt: u64 },

    #[error("interrupted after {elapsed:?}")]
    Interrupted { elapsed: Duration },
}

/// Shape of the simulated workload
#[derive(Debug, Clone, Serialize)]
pub struct LoadProfile {
    pub tasks: usize,
    #[serde(skip)]
    pub mode: Mode,
    pub batch: usize,
    pub failure_rate: f64,
    pub panic_rate: f64,
    pub min_latency: Duration,
    pub max_latency: Duration,
}

impl LoadProfile {
    pub fn validate(&self) -> Result<()> {
        for (name, rate) in [
            ("failure rate", self.failure_rate),
            ("panic rate", self.panic_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                bail!("{} must be between 0 and 1, got {}", name, rate);
            }
        }
        if self.failure_rate + self.panic_rate > 1.0 {
            bail!("failure rate and panic rate together exceed 1");
        }
        if self.min_latency > self.max_latency {
            bail!(
                "minimum latency {:?} exceeds maximum latency {:?}",
                self.min_latency,
                self.max_latency
            );
        }
        if self.batch == 0 {
            bail!("batch size must be at least 1");
        }
        Ok(())
    }
}

impl TryFrom<&RunArgs> for LoadProfile {
    type Error = anyhow::Error;

    fn try_from(args: &RunArgs) -> Result<Self> {
        let profile = Self {
            tasks: args.tasks,
            mode: args.mode,
            batch: args.batch,
            failure_rate: args.failure_rate,
            panic_rate: args.panic_rate,
            min_latency: Duration::from_millis(args.min_latency_ms),
            max_latency: Duration::from_millis(args.max_latency_ms),
        };
        profile.validate()?;
        Ok(profile)
    }
}

enum Fate {
    Succeed,
    Fail,
    Panic,
}

/// Work that sleeps a random latency, then succeeds, fails or panics
///
/// Every invocation bumps `attempts`. The sleep is abandoned when the attempt
/// context finishes.
pub fn simulated_work(profile: &LoadProfile, attempts: Arc<AtomicU64>) -> WorkFn<u64> {
    let (min, max) = (profile.min_latency, profile.max_latency);
    let (failure_rate, panic_rate) = (profile.failure_rate, profile.panic_rate);

    work_fn(move |ctx: Context| {
        let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let (latency, fate) = {
            let mut rng = rand::thread_rng();
            let latency = rng.gen_range(min..=max);
            let roll: f64 = rng.gen();
            let fate = if roll < panic_rate {
                Fate::Panic
            } else if roll < panic_rate + failure_rate {
                Fate::Fail
            } else {
                Fate::Succeed
            };
            (latency, fate)
        };

        async move {
            let started = Instant::now();
            tokio::select! {
                _ = tokio::time::sleep(latency) => {}
                _ = ctx.done() => {
                    return Err(SimulatedError::Interrupted { elapsed: started.elapsed() });
                }
            }
            match fate {
                Fate::Succeed => Ok(attempt),
                Fate::Fail => Err(SimulatedError::Failed { attempt }),
                Fate::Panic => panic!("simulated panic on attempt {}", attempt),
            }
        }
    })
}

/// Outcome tallies of one run
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub profile: LoadProfile,
    pub mode: String,
    pub attempts: u64,
    pub completed: u64,
    /// Completed tasks keyed by outcome name
    pub outcomes: BTreeMap<String, u64>,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// Diagnostics accumulated since the last periodic report
    pub diagnostics: Option<DiagnosticsSummary>,
}

fn serialize_millis<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u128(duration.as_millis())
}

impl LoadReport {
    pub fn count(&self, outcome: Outcome) -> u64 {
        self.outcomes.get(outcome.as_str()).copied().unwrap_or(0)
    }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "mode={} tasks={} completed={} attempts={} elapsed={}",
            self.mode,
            self.profile.tasks,
            self.completed,
            self.attempts,
            format_duration(self.elapsed)
        )?;
        for outcome in Outcome::ALL {
            writeln!(f, "  {:<16} {}", outcome.as_str(), self.count(outcome))?;
        }
        if let Some(summary) = &self.diagnostics {
            write!(f, "{}", summary)?;
        }
        Ok(())
    }
}

/// Submit the whole profile and wait for every callback
///
/// Returns early if the executor drops callbacks, which only happens once it
/// has been stopped.
pub async fn run(executor: &Executor<u64>, profile: &LoadProfile) -> LoadReport {
    let attempts = Arc::new(AtomicU64::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel::<(Outcome, u64)>();
    let started = Instant::now();
    let mut submitted = 0usize;

    info!(
        tasks = profile.tasks,
        mode = ?profile.mode,
        batch = profile.batch,
        "Starting load run"
    );

    match profile.mode {
        Mode::Single => {
            for _ in 0..profile.tasks {
                let tx = tx.clone();
                executor.exec_work(
                    simulated_work(profile, attempts.clone()),
                    Some(Box::new(move |result: Try<u64>| {
                        let _ = tx.send((outcome_of(&result), 1));
                    })),
                );
                submitted += 1;
            }
        }
        Mode::Many => {
            let tx = tx.clone();
            let callback: ManyCallback<u64> = Arc::new(move |_index, result| {
                let _ = tx.send((outcome_of(&result), 1));
            });
            for width in batches(profile.tasks, profile.batch) {
                executor.exec_many(
                    batch_of(profile, &attempts, width),
                    Some(callback.clone()),
                );
                submitted += width;
            }
        }
        Mode::Gathered => {
            for width in batches(profile.tasks, profile.batch) {
                let tx = tx.clone();
                executor.exec_gathered(
                    batch_of(profile, &attempts, width),
                    Some(Box::new(move |result: Try<Vec<u64>>| {
                        let _ = tx.send((outcome_of(&result), width as u64));
                    })),
                );
                submitted += width;
            }
        }
    }
    drop(tx);
    debug!(submitted, "All work submitted");

    let mut outcomes = BTreeMap::new();
    let mut completed = 0u64;
    while completed < submitted as u64 {
        let Some((outcome, count)) = rx.recv().await else {
            break;
        };
        *outcomes.entry(outcome.as_str().to_string()).or_insert(0) += count;
        completed += count;
    }

    LoadReport {
        profile: profile.clone(),
        mode: format!("{:?}", profile.mode).to_lowercase(),
        attempts: attempts.load(Ordering::Relaxed),
        completed,
        outcomes,
        elapsed: started.elapsed(),
        diagnostics: None,
    }
}

fn outcome_of<T>(result: &Try<T>) -> Outcome {
    match result {
        Try::Success(_) => Outcome::Success,
        Try::Failure(error) => Outcome::from_error(error),
    }
}

fn batch_of(profile: &LoadProfile, attempts: &Arc<AtomicU64>, width: usize) -> Vec<WorkFn<u64>> {
    (0..width)
        .map(|_| simulated_work(profile, attempts.clone()))
        .collect()
}

/// Split `total` into chunks of at most `size`
fn batches(total: usize, size: usize) -> impl Iterator<Item = usize> {
    let size = size.max(1);
    (0..total).step_by(size).map(move |start| size.min(total - start))
}
