//! `retrier-load` entry point

use anyhow::Result;
use clap::Parser;
use retrier::logging::tracing_panic_logger;
use retrier::{Executor, PeriodicDiagnostics};
use retrier_cli::cli::{Command, Format};
use retrier_cli::{load, settings, Cli, LoadProfile};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = settings::resolve(
        cli.config.as_deref(),
        &cli.env_prefix,
        cli.executor.overrides(),
    )?;

    match cli.command {
        Command::Config { format } => {
            let rendered = match format {
                Format::Yaml => serde_yaml::to_string(&config)?,
                Format::Json => config.to_json()?,
            };
            println!("{}", rendered.trim_end());
        }
        Command::Run(args) => {
            let profile = LoadProfile::try_from(&args)?;
            let diagnostics = if args.report_interval_ms > 0 {
                PeriodicDiagnostics::start(Duration::from_millis(args.report_interval_ms))?
            } else {
                Arc::new(PeriodicDiagnostics::new())
            };

            let executor: Executor<u64> = Executor::<u64>::builder()
                .with_config(config)
                .with_diagnostics(diagnostics.clone())
                .with_panic_logger(tracing_panic_logger())
                .build()?;
            info!(config = ?executor.config(), "Executor ready");

            let mut report = load::run(&executor, &profile).await;
            executor.stop().await;
            diagnostics.shutdown();
            report.diagnostics = Some(diagnostics.take_window());

            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report);
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
