//! Tracing setup.

use batchflow_shared::errors::{BatchflowError, BatchflowResult};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "BATCHFLOW_LOG";

const LOG_FILE_PREFIX: &str = "batchflow.log";

/// Build the log filter from `BATCHFLOW_LOG`, then `RUST_LOG`, then `info`.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global tracing subscriber.
///
/// Without `log_dir`, events go to stderr. With `log_dir`, events go to a
/// daily-rolling file through a non-blocking writer; keep the returned guard
/// alive until exit or buffered lines are lost.
///
/// Returns `Ok(None)` if a subscriber is already installed.
pub fn init_logging(log_dir: Option<&Path>) -> BatchflowResult<Option<WorkerGuard>> {
    match log_dir {
        None => {
            let installed = tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(std::io::stderr)
                .try_init();
            if installed.is_err() {
                tracing::debug!("tracing subscriber already installed");
            }
            Ok(None)
        }
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                BatchflowError::Config(format!(
                    "Failed to create log directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let installed = tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_ansi(false)
                .with_writer(writer)
                .try_init();
            match installed {
                Ok(()) => Ok(Some(guard)),
                Err(_) => {
                    tracing::debug!("tracing subscriber already installed");
                    Ok(None)
                }
            }
        }
    }
}
