//! Tracing setup for the engine and the `pulsedev` binary
//!
//! The engine usually runs inside an editor integration that owns the
//! process's stdout and stderr, so records go to a daily-rotated file under
//! `$XDG_STATE_HOME/pulsedev/` and nothing reaches the terminal.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};

const FALLBACK_LEVEL: &str = "info";

/// Install the file subscriber. `RUST_LOG` overrides `config.level`.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes buffered lines.
pub fn init(config: &LoggingConfig) -> Result<LogGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let log_path = Config::log_path();
    let prefix = log_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("pulsedev.log");

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(config.max_files.max(1))
        .build(&log_dir)
        .map_err(|e| Error::Config(format!("cannot open log file in {}: {}", log_dir.display(), e)))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(&config.level)))
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.level,
        retained_files = config.max_files,
        "pulsedev logging ready"
    );
    Ok(LogGuard { _worker: guard })
}

/// Subscriber for test binaries; output is captured per test
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Holds the background log writer open
pub struct LogGuard {
    _worker: WorkerGuard,
}

pub fn log_file_path() -> PathBuf {
    Config::log_path()
}

/// Filter for a configured level; an unparseable level falls back to `info`
fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(FALLBACK_LEVEL))
}
