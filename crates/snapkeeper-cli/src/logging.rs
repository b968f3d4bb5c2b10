use snapkeeper_core::engine::logs_dir;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Holds the non-blocking writer guards; dropping it flushes both files.
pub struct LoggingGuard {
    _debug: WorkerGuard,
    _warnings: WorkerGuard,
}

/// Stdout plus two project log files, both truncated at startup:
/// `Logs/Debug.log` gets everything, `Logs/WarningsErrors.log` warn and up.
pub fn init_logger(project_dir: &Path) -> std::io::Result<LoggingGuard> {
    let logs = logs_dir(project_dir);
    fs::create_dir_all(&logs)?;

    // File::create truncates, which is the wanted start-of-run behaviour.
    let debug_file = fs::File::create(logs.join("Debug.log"))?;
    let warnings_file = fs::File::create(logs.join("WarningsErrors.log"))?;
    let (debug_writer, debug_guard) = tracing_appender::non_blocking(debug_file);
    let (warn_writer, warn_guard) = tracing_appender::non_blocking(warnings_file);

    let stdout_filter =
        std::env::var("SNAPKEEPER_LOG").unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .pretty()
                .with_file(false)
                .without_time()
                .with_ansi(true)
                .with_filter(EnvFilter::new(stdout_filter)),
        )
        .with(
            fmt::layer()
                .with_writer(debug_writer)
                .with_ansi(false)
                .with_filter(LevelFilter::DEBUG),
        )
        .with(
            fmt::layer()
                .with_writer(warn_writer)
                .with_ansi(false)
                .with_filter(LevelFilter::WARN),
        )
        .init();

    Ok(LoggingGuard {
        _debug: debug_guard,
        _warnings: warn_guard,
    })
}
