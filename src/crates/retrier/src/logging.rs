//! Logging helpers
//!
//! Human-readable duration formatting for summaries and the default
//! tracing-backed logger for panics recovered from work functions.

use std::backtrace::Backtrace;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use crate::executor::PanicLogger;

/// Format duration in human-readable form
///
/// # Example
///
/// ```rust
/// use retrier::logging::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
/// assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
/// assert_eq!(format_duration(Duration::from_micros(500)), "500μs");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let micros = duration.as_micros();

    if micros < 1000 {
        format!("{}μs", micros)
    } else if micros < 1_000_000 {
        format!("{}ms", micros / 1000)
    } else if micros < 60_000_000 {
        format!("{:.2}s", micros as f64 / 1_000_000.0)
    } else {
        let seconds = micros / 1_000_000;
        let minutes = seconds / 60;
        let secs = seconds % 60;
        format!("{}m{}s", minutes, secs)
    }
}

/// Panic logger that writes the message and backtrace through `tracing`
pub fn tracing_panic_logger() -> PanicLogger {
    Arc::new(|message: &str, backtrace: &Backtrace| {
        error!(panic = %message, "Recovered panic in executor task\n{}", backtrace);
    })
}
