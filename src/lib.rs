//! Prometheus exporter for Compal CH7465LG ("Connect Box") cable modems.
//!
//! Every request to `/metrics` runs one full cycle against the modem's web
//! management interface: log in, query the raw status documents, log out,
//! map the readings to metric observations, and render them in the text
//! exposition format. Nothing is cached between scrapes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   Connect Box   │<───>│  DeviceClient   │────>│ ScrapeCollector │
//! │  (getter.xml)   │     │ (login/logout)  │     │  (map + render) │
//! └─────────────────┘     └─────────────────┘     └────────┬────────┘
//!                                                          │
//!                                                 ┌────────▼────────┐
//!                                                 │   HTTP Server   │
//!                                                 │   (/metrics)    │
//!                                                 └─────────────────┘
//! ```
//!
//! # Usage
//!
//! Run the exporter binary with a configuration file:
//!
//! ```bash
//! connectbox-exporter config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod client;
pub mod collector;
pub mod config;
pub mod http;
pub mod mapping;
pub mod snapshot;

pub use client::{ClientError, DeviceClient};
pub use collector::{ScrapeCollector, SharedCollector};
pub use config::{ConfigError, ExporterConfig, LogFormat, LoggingConfig, MetricGroup};
pub use http::HttpServer;
pub use snapshot::DeviceSnapshot;

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - [`LogFormat::Text`] (default): Human-readable text format
/// - [`LogFormat::Json`]: Structured JSON format for log aggregation systems
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}
