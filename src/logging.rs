//! Tracing subscriber setup
//!
//! `RUST_LOG` wins over the configured filter directive. When a log file is
//! configured, a non-blocking file layer is added next to the console layer;
//! keep the returned guard alive or buffered lines are lost on exit.

use crate::config::LogConfig;
use crate::error::{Result, X2cError};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber; fails if one is already installed
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| X2cError::Config(format!("Invalid log filter '{}': {}", config.filter, e)))?;

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let file_name = path.file_name().ok_or_else(|| {
                X2cError::Config(format!("Log file path has no file name: {:?}", path))
            })?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|e| X2cError::Config(format!("Logger already initialized: {}", e)))?;

    tracing::debug!("Logging initialized");
    Ok(guard)
}
