//! Tracing subscriber setup for processes running workers.

use crate::config::TelemetryConfig;
use crate::error::{JobError, JobResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over [`TelemetryConfig::log_level`]. Fails if
/// a global subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> JobResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_filter(&config.log_level)?,
    };

    let result = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };

    result.map_err(|e| JobError::Configuration(format!("Failed to install subscriber: {}", e)))?;

    tracing::info!(log_level = %config.log_level, json = config.json, "Tracing initialized");
    Ok(())
}

fn parse_filter(directives: &str) -> JobResult<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|e| JobError::Configuration(format!("Invalid log filter `{}`: {}", directives, e)))
}
