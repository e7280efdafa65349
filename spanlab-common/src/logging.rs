//! Tracing initialization for hosts embedding the editor
//!
//! The library itself only emits `tracing` events. Hosts that do not install
//! their own subscriber can call [`init`] once at startup.

use crate::config::LoggingConfig;
use crate::{Error, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Build the filter: `RUST_LOG` wins, otherwise the configured level for
/// the spanlab crates.
pub fn env_filter(config: &LoggingConfig) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "spanlab_editor={level},spanlab_common={level}",
            level = config.level
        )
        .into()
    })
}

/// Install the global subscriber
///
/// Returns an error if a global subscriber is already set.
pub fn init(config: &LoggingConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| Error::Internal(format!("tracing already initialized: {}", e)))
}
