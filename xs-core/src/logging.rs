//! Structured logging setup using the `tracing` ecosystem.
//!
//! Console output goes to stderr as `LEVEL message`. A daily-rotated log
//! file can be added, in human-readable or JSON form.

use std::path::Path;

use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{XsError, XsResult};

/// Map the CLI verbosity flags to a filter directive.
pub fn level_for_flags(quiet: bool, debug: bool) -> &'static str {
    if quiet {
        "error"
    } else if debug {
        "debug"
    } else {
        "info"
    }
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn console_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

/// Initialize the global tracing subscriber with console and file output.
///
/// # Arguments
/// * `level` - Log level or filter directive: "trace", "debug", "info", "warn", "error"
/// * `log_dir` - Directory for log files
/// * `json_output` - If true, use JSON format for file output
pub fn init_logging(level: &str, log_dir: &Path, json_output: bool) -> XsResult<LogGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = rolling::daily(log_dir, "send-msg.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let registry = tracing_subscriber::registry()
        .with(build_filter(level))
        .with(console_layer());

    let result = if json_output {
        registry
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .json()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
    };
    result.map_err(|e| XsError::Internal(format!("failed to install logger: {e}")))?;

    tracing::debug!("logging initialized at level={level}, dir={}", log_dir.display());

    Ok(LogGuard { _guard: guard })
}

/// Guard that keeps the non-blocking log writer alive.
/// Drop this to flush and close the log file.
pub struct LogGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Initialize a console-only logger. Subsequent calls are no-ops.
pub fn init_console_logging(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(build_filter(level))
        .with(console_layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for_flags() {
        assert_eq!(level_for_flags(true, false), "error");
        assert_eq!(level_for_flags(false, true), "debug");
        assert_eq!(level_for_flags(true, true), "error");
        assert_eq!(level_for_flags(false, false), "info");
    }

    #[test]
    fn test_console_logging_does_not_panic() {
        init_console_logging("debug");
        init_console_logging("not a ==== directive");
    }
}
