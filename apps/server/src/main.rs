//! Icewire Server - Standalone Icecast/SHOUTcast-compatible streaming server.
//!
//! Serves the configured mounts to ICY/HTTP listeners, accepts live source
//! uploads and exposes the Icecast status document and admin endpoints, all
//! on one port.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use icewire_core::{bootstrap_services, start_server, Mount, MountEvent, NetworkContext};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;

use crate::config::ServerConfig;

/// Icewire Server - Icecast-compatible audio streaming server.
#[derive(Parser, Debug)]
#[command(name = "icewire-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "ICEWIRE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Host name or IP used in listen URLs (overrides config file).
    #[arg(short = 'a', long)]
    advertise_host: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Icewire Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(host) = args.advertise_host {
        config.advertise_host = Some(host);
    }

    log::info!(
        "Configuration: bind_port={}, advertise_host={}, mounts={}",
        config.bind_port,
        config.advertise_host.as_deref().unwrap_or("auto"),
        config.core.mounts.len()
    );
    let network = NetworkContext::resolve(config.bind_port, config.advertise_host.as_deref());

    let services = bootstrap_services(config.to_core_config(), network)
        .context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    for mount in services.manager.mounts() {
        tokio::spawn(log_mount_events(mount));
    }

    let app_state = services.app_state();
    let cancel = services.cancel_token.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state, cancel).await {
            log::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown: stops sources and listeners, then the accept loop
    services.shutdown();

    if server_handle.await.is_err() {
        log::warn!("Server task ended abnormally");
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Logs a configured mount's lifecycle events until it closes.
async fn log_mount_events(mount: Arc<Mount>) {
    let mut events = mount.subscribe_events();
    loop {
        match events.recv().await {
            Ok(MountEvent::Closed { .. }) | Err(RecvError::Closed) => break,
            Ok(event) => log::debug!("[Event] {:?}", event),
            Err(RecvError::Lagged(n)) => {
                log::debug!("[Event] {} skipped {} events", mount.path(), n);
            }
        }
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
