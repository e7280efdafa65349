//! Configuration loading
//!
//! Editor configuration is read from a TOML file. Resolution priority:
//! 1. Explicit path passed by the host (highest priority)
//! 2. `SPANLAB_CONFIG` environment variable
//! 3. User config file (`<config dir>/spanlab/editor.toml`)
//! 4. Compiled defaults (fallback)
//!
//! A missing file never stops the editor: it logs a warning and keeps the
//! defaults. An explicit path that cannot be read is an error.
//! `SPANLAB_API_URL` and `SPANLAB_API_TOKEN` override the `[api]` table.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a config file
pub const CONFIG_ENV_VAR: &str = "SPANLAB_CONFIG";
/// Environment override for `api.base_url`
pub const API_URL_ENV_VAR: &str = "SPANLAB_API_URL";
/// Environment override for `api.token`
pub const API_TOKEN_ENV_VAR: &str = "SPANLAB_API_TOKEN";

/// Where new annotations land in the annotation list
///
/// Also decides which annotation is reselected after initialization and
/// after leaving compare-mode: the most recently created one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingPolicy {
    /// Server order, newest last; reselect the last annotation
    #[default]
    AppendToEnd,
    /// Newest first; reselect the first annotation
    PrependToStart,
}

/// Backend API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            token: None,
            timeout_ms: 30_000,
        }
    }
}

/// Busy window applied to every coordinated submission operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Minimum time the busy flag stays set
    pub min_busy_ms: u64,
    /// Ceiling after which the busy flag clears even if the request is pending
    pub max_wait_ms: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            min_busy_ms: 200,
            max_wait_ms: 5_000,
        }
    }
}

impl SubmissionConfig {
    pub fn min_busy(&self) -> Duration {
        Duration::from_millis(self.min_busy_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms.max(self.min_busy_ms))
    }
}

/// Annotation store behavior
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub ordering: OrderingPolicy,
    /// Seed new annotations with non-interactive prediction results
    pub carry_non_interactive_predictions: bool,
}

/// Event bus sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Complete editor configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub api: ApiConfig,
    pub submission: SubmissionConfig,
    pub store: StoreConfig,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
}

impl EditorConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EditorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Resolve configuration following the priority order in the module docs
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        // Priority 1: explicit path must be readable
        let mut config = if let Some(path) = explicit_path {
            Self::from_file(path)?
        } else {
            Self::load_discovered()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn load_discovered() -> Self {
        // Priority 2: environment variable
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let path = PathBuf::from(path);
            match Self::from_file(&path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Config from {} unusable, continuing", CONFIG_ENV_VAR);
                }
            }
        }

        // Priority 3: user config file
        if let Some(path) = user_config_path() {
            if path.exists() {
                match Self::from_file(&path) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "User config unusable, using defaults");
                    }
                }
            }
        }

        // Priority 4: compiled defaults
        tracing::debug!("No config file found, using compiled defaults");
        Self::default()
    }

    /// Apply `SPANLAB_API_URL` / `SPANLAB_API_TOKEN` overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV_VAR) {
            if !url.trim().is_empty() {
                self.api.base_url = url.trim().to_string();
            }
        }
        if let Ok(token) = std::env::var(API_TOKEN_ENV_VAR) {
            if !token.trim().is_empty() {
                self.api.token = Some(token.trim().to_string());
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(Error::Config("api.base_url must not be empty".to_string()));
        }
        if self.submission.max_wait_ms < self.submission.min_busy_ms {
            return Err(Error::Config(format!(
                "submission.max_wait_ms ({}) must be >= submission.min_busy_ms ({})",
                self.submission.max_wait_ms, self.submission.min_busy_ms
            )));
        }
        if self.events.capacity == 0 {
            return Err(Error::Config("events.capacity must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Platform user config file location, if the platform has one
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("spanlab").join("editor.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EditorConfig::default();
        assert_eq!(config.submission.min_busy(), Duration::from_millis(200));
        assert_eq!(config.submission.max_wait(), Duration::from_secs(5));
        assert_eq!(config.store.ordering, OrderingPolicy::AppendToEnd);
        assert!(!config.store.carry_non_interactive_predictions);
        assert_eq!(config.events.capacity, 256);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EditorConfig::from_toml_str(
            r#"
            [store]
            ordering = "prepend_to_start"
            "#,
        )
        .expect("valid config");
        assert_eq!(config.store.ordering, OrderingPolicy::PrependToStart);
        assert_eq!(config.submission, SubmissionConfig::default());
    }

    #[test]
    fn test_ceiling_below_minimum_rejected() {
        let err = EditorConfig::from_toml_str(
            r#"
            [submission]
            min_busy_ms = 500
            max_wait_ms = 100
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unknown_ordering_is_parse_error() {
        let err = EditorConfig::from_toml_str("[store]\nordering = \"sideways\"\n").unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
    }
}
