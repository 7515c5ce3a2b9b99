//! Configuration for the exporter.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Commented starting point written on first run (see
/// [`ExporterConfig::write_template`]).
const CONFIG_TEMPLATE: &str = include_str!("../config.example.json5");

/// Configuration errors. All of them are startup-fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Management address of the modem. Usually 192.168.0.1.
    pub ip_address: String,

    /// Password for the modem's web interface.
    pub password: String,

    /// Port the /metrics endpoint listens on (default: 9705).
    #[serde(default = "default_exporter_port")]
    pub exporter_port: u16,

    /// Timeout for each HTTP call against the modem, in seconds
    /// (default: 9, one below Prometheus' default scrape timeout).
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Metric groups to query per scrape (default: all).
    #[serde(default = "MetricGroup::all")]
    pub metrics: BTreeSet<MetricGroup>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_exporter_port() -> u16 {
    9705
}

fn default_timeout_seconds() -> u64 {
    9
}

/// One family of metrics, matching a set of status documents on the device.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MetricGroup {
    DeviceStatus,
    Downstream,
    Upstream,
    LanUsers,
    Temperature,
}

impl MetricGroup {
    /// Every group, the default scrape selection.
    pub fn all() -> BTreeSet<MetricGroup> {
        BTreeSet::from([
            MetricGroup::DeviceStatus,
            MetricGroup::Downstream,
            MetricGroup::Upstream,
            MetricGroup::LanUsers,
            MetricGroup::Temperature,
        ])
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ip_address.trim().is_empty() {
            return Err(ConfigError::Validation(
                "ip_address must not be empty".to_string(),
            ));
        }

        if self.password.is_empty() {
            return Err(ConfigError::Validation(
                "password must not be empty".to_string(),
            ));
        }

        if self.exporter_port == 0 {
            return Err(ConfigError::Validation(
                "exporter_port must be non-zero".to_string(),
            ));
        }

        if self.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "timeout_seconds must be positive".to_string(),
            ));
        }

        if self.metrics.is_empty() {
            return Err(ConfigError::Validation(
                "at least one metric group must be selected".to_string(),
            ));
        }

        Ok(())
    }

    /// Write the commented config template to `path`, for the operator to
    /// edit. Used on first run in a container with a freshly mounted volume.
    pub fn write_template<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        std::fs::write(path, CONFIG_TEMPLATE)?;
        Ok(())
    }
}
