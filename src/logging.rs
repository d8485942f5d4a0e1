//! 日志初始化
//!
//! `RUST_LOG` 优先于配置中的 `logging.level`。

use crate::config::LoggingConfig;
use crate::error::{AppError, Result};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| AppError::Config(format!("Invalid log filter {}: {}", config.level, e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| AppError::Internal(format!("Failed to install tracing subscriber: {}", e)))
}
