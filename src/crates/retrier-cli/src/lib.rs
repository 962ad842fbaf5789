//! # retrier-cli
//!
//! Load generator for the `retrier` executor. Builds an executor from a
//! config file, `RETRIER_*` environment variables and command-line flags,
//! drives it with simulated flaky work and reports outcome tallies.

pub mod cli;
pub mod load;
pub mod settings;

pub use cli::{Cli, Command};
pub use load::{LoadProfile, LoadReport};
