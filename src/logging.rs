use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::Config;

/// Initializes the tracing subscriber: stdout plus a daily-rolling file.
/// The returned guard must live for the duration of the process so buffered
/// log lines are flushed on exit.
pub fn init_logging(config: &Config) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let file_layer = fmt::layer()
        .with_target(false)
        .with_writer(non_blocking)
        .with_ansi(false);
    let stdout_layer = fmt::layer().with_target(false).with_ansi(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    guard
}
