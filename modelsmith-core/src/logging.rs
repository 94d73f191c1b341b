//! Tracing subscriber setup.
//!
//! A human-readable stderr layer filtered by verbosity, plus an optional
//! daily-rolling JSON file layer for structured search logs.

use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("A global tracing subscriber is already installed")]
    AlreadyInstalled,
}

/// Options for [`init_tracing`].
#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// 0 = info, 1 = debug, 2+ = trace.
    pub verbosity: u8,
    /// Only errors on stderr. Ignored when `verbosity > 0`.
    pub quiet: bool,
    /// Directory for the JSON log file. No file layer when `None`.
    pub json_log_dir: Option<PathBuf>,
}

impl LoggingOptions {
    /// Filter directive for the stderr layer.
    pub fn stderr_filter(&self) -> &'static str {
        match self.verbosity {
            0 if self.quiet => "error",
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Install the global tracing subscriber.
///
/// Returns the file writer guard when a JSON layer was requested; it must be
/// kept alive for buffered log lines to be flushed.
pub fn init_tracing(options: &LoggingOptions) -> Result<Option<WorkerGuard>, LoggingError> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(options.stderr_filter()));

    let (json_layer, guard) = match &options.json_log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| LoggingError::LogDir {
                path: dir.clone(),
                source,
            })?;
            let appender = tracing_appender::rolling::daily(dir, "modelsmith.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInstalled)?;

    Ok(guard)
}
