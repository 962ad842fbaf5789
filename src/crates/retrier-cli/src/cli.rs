//! Command-line arguments

use clap::{Args, Parser, Subcommand, ValueEnum};
use retrier::config::ConfigOverrides;
use retrier::StrategyKind;
use std::path::PathBuf;
use std::time::Duration;

/// Drive a retrier executor with simulated flaky work
#[derive(Parser, Debug)]
#[command(name = "retrier-load")]
#[command(about = "Synthetic load generator for the retrier executor", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// YAML or JSON executor configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Prefix of executor environment variables
    #[arg(long, global = true, default_value = "RETRIER_")]
    pub env_prefix: String,

    #[command(flatten)]
    pub executor: ExecutorArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a load test and print a report
    Run(RunArgs),

    /// Print the effective executor configuration
    Config {
        #[arg(short, long, value_enum, default_value_t = Format::Yaml)]
        format: Format,
    },
}

/// Executor settings; each one overrides the file and environment
#[derive(Args, Debug, Default, Clone)]
pub struct ExecutorArgs {
    /// Scheduling strategy (immediate or queued)
    #[arg(long, global = true)]
    pub strategy: Option<StrategyKind>,

    /// Maximum attempts running at once
    #[arg(long, global = true)]
    pub parallelism: Option<i64>,

    /// Attempts per task, including the first
    #[arg(long, global = true)]
    pub max_attempts: Option<i64>,

    /// Dispatcher hand-off capacity (queued strategy)
    #[arg(long, global = true)]
    pub max_queue_depth: Option<i64>,

    /// Delay between attempts, in milliseconds
    #[arg(long, global = true, allow_negative_numbers = true)]
    pub delay_ms: Option<i64>,

    /// Switch to exponential backoff capped at this many milliseconds
    #[arg(long, global = true)]
    pub backoff_cap_ms: Option<i64>,

    /// Whole-task timeout in milliseconds; zero or less disables it
    #[arg(long, global = true, allow_negative_numbers = true)]
    pub global_timeout_ms: Option<i64>,

    /// Per-attempt timeout in milliseconds; zero or less disables it
    #[arg(long, global = true, allow_negative_numbers = true)]
    pub attempt_timeout_ms: Option<i64>,
}

impl ExecutorArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            strategy: self.strategy,
            parallelism: self.parallelism.map(clamp_count),
            max_attempts: self
                .max_attempts
                .map(|n| n.clamp(1, i64::from(u32::MAX)) as u32),
            max_queue_depth: self.max_queue_depth.map(clamp_count),
            delay: self.delay_ms.map(millis),
            backoff_cap: self.backoff_cap_ms.map(millis),
            global_timeout: self.global_timeout_ms.map(millis),
            attempt_timeout: self.attempt_timeout_ms.map(millis),
        }
    }
}

/// How work is submitted during a run
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One `exec` per task
    Single,
    /// `exec_many` batches of `--batch` tasks
    Many,
    /// `exec_gathered` batches of `--batch` tasks
    Gathered,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Number of tasks to submit
    #[arg(short = 'n', long, default_value_t = 1000)]
    pub tasks: usize,

    #[arg(long, value_enum, default_value_t = Mode::Single)]
    pub mode: Mode,

    /// Tasks per submission in `many` and `gathered` modes
    #[arg(long, default_value_t = 10)]
    pub batch: usize,

    /// Probability that an attempt fails
    #[arg(long, default_value_t = 0.2)]
    pub failure_rate: f64,

    /// Probability that an attempt panics
    #[arg(long, default_value_t = 0.0)]
    pub panic_rate: f64,

    /// Minimum simulated latency per attempt, in milliseconds
    #[arg(long, default_value_t = 1)]
    pub min_latency_ms: u64,

    /// Maximum simulated latency per attempt, in milliseconds
    #[arg(long, default_value_t = 20)]
    pub max_latency_ms: u64,

    /// Log a diagnostics summary at this interval, in milliseconds; 0 disables
    #[arg(long, default_value_t = 1000)]
    pub report_interval_ms: u64,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
}

fn clamp_count(n: i64) -> usize {
    usize::try_from(n.max(1)).unwrap_or(usize::MAX)
}

fn millis(n: i64) -> Duration {
    Duration::from_millis(n.max(0) as u64)
}
