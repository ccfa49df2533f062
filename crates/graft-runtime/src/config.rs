//! Runtime configuration.
//!
//! Loaded in layers via figment: built-in defaults, then `graft.toml`, then
//! `GRAFT_`-prefixed environment variables with `__` as the section
//! separator (`GRAFT_HTTP__PER_MINUTE=10` sets `http.per_minute`). Every
//! field has a serde default so a missing file is never an error.

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading failure.
#[derive(Debug, Error)]
#[error("configuration error: {0}")]
pub struct ConfigError(#[from] figment::Error);

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration for one runtime instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraftConfig {
    /// Command prefix stripped from chat messages.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Per-invocation time budget for handler bodies, in seconds.
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,

    /// Outbound HTTP limits for plugin sandboxes.
    #[serde(default)]
    pub http: HttpLimits,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for GraftConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            handler_timeout_secs: default_handler_timeout_secs(),
            http: HttpLimits::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl GraftConfig {
    /// Loads configuration from `graft.toml` in the working directory plus
    /// environment overrides.
    pub fn load() -> ConfigResult<Self> {
        Self::load_from("graft.toml")
    }

    /// Loads configuration from a specific file plus environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let config = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("GRAFT_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// The handler time budget as a [`Duration`].
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }
}

fn default_prefix() -> String {
    "!".to_string()
}

fn default_handler_timeout_secs() -> u64 {
    10
}

/// Outbound HTTP limits applied per (guild, plugin).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpLimits {
    /// Requests allowed per sliding minute.
    #[serde(default = "default_per_minute")]
    pub per_minute: u32,

    /// Requests allowed per sliding hour.
    #[serde(default = "default_per_hour")]
    pub per_hour: u32,

    /// Maximum accepted response body size in bytes.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for HttpLimits {
    fn default() -> Self {
        Self {
            per_minute: default_per_minute(),
            per_hour: default_per_hour(),
            max_response_bytes: default_max_response_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl HttpLimits {
    /// The per-request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_per_minute() -> u32 {
    30
}

fn default_per_hour() -> u32 {
    300
}

fn default_max_response_bytes() -> usize {
    1024 * 1024
}

fn default_request_timeout_secs() -> u64 {
    10
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Full fmt output.
    #[default]
    Full,
    /// Single-line compact output.
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `graft=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = GraftConfig::default();
        assert_eq!(config.prefix, "!");
        assert_eq!(config.handler_timeout(), Duration::from_secs(10));
        assert_eq!(config.http.per_minute, 30);
        assert_eq!(config.http.per_hour, 300);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = GraftConfig::load_from("definitely-not-present.toml").unwrap();
        assert_eq!(config.prefix, "!");
    }
}
