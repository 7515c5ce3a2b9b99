//! Prometheus exporter for Compal CH7465LG ("Connect Box") cable modems.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use connectbox_exporter::{
    DeviceClient, ExporterConfig, HttpServer, ScrapeCollector, init_tracing,
};

/// Prometheus exporter for Compal CH7465LG ("Connect Box") cable modems.
#[derive(Parser, Debug)]
#[command(name = "connectbox-exporter")]
#[command(about = "Export Connect Box cable modem status as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to the configuration file (JSON5 format).
    config_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // First run in a container with a freshly mounted volume: hand the
    // operator a template to edit and bail out.
    if !args.config_file.exists() {
        ExporterConfig::write_template(&args.config_file).with_context(|| {
            format!("Failed to write config template to {:?}", args.config_file)
        })?;
        anyhow::bail!(
            "No configuration found; wrote a template to {:?}. Edit it and restart.",
            args.config_file
        );
    }

    let config = ExporterConfig::load_from_file(&args.config_file)
        .with_context(|| format!("Failed to load config from {:?}", args.config_file))?;

    init_tracing(&config.logging)?;

    info!(
        source = %config.ip_address,
        port = config.exporter_port,
        "Starting Connect Box exporter"
    );

    let client = DeviceClient::new(
        &config.ip_address,
        &config.password,
        Duration::from_secs(config.timeout_seconds),
    )
    .context("Failed to build device client")?;
    let collector = Arc::new(ScrapeCollector::new(client, &config));

    let listen_addr = SocketAddr::from(([0, 0, 0, 0], config.exporter_port));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = HttpServer::new(collector, listen_addr);
    let mut server_task = tokio::spawn(server.run(shutdown_rx));

    // Wait for shutdown signal; a server task that returns early means the
    // bind failed or the server died, and the exit code reflects that.
    tokio::select! {
        result = &mut server_task => {
            result??;
            anyhow::bail!("HTTP server exited unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate()
                ).unwrap();
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    shutdown_tx.send(true)?;
    let _ = tokio::time::timeout(Duration::from_secs(5), server_task).await;

    info!("Exporter stopped");
    Ok(())
}
