mod config;
mod cache;
mod cache_manager;
mod mdns;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::cache_manager::BrowserHandle;
use crate::config::Config;
use crate::mdns::advertise::PublisherHandle;
use crate::mdns::browser::BrowserHandler;
use crate::mdns::traffic::TrafficLogger;
use crate::mdns::transport::Transport;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("zeroconf_watcherd=info"))
        )
        .init();

    tracing::info!("Starting zeroconf-watcherd");

    // Load config; no argument means defaults
    let config = match std::env::args().nth(1) {
        Some(config_path) => {
            let config = Config::load(&config_path)
                .with_context(|| format!("Failed to load config from {}", config_path))?;
            tracing::info!("Loaded config from {}", config_path);
            config
        }
        None => Config::default(),
    };

    let cancel = CancellationToken::new();

    // Wire packet handlers before the transport starts
    let (event_tx, event_rx) = mpsc::channel(256);
    let mut transport = Transport::new(config.transport.clone());
    transport.subscribe(Arc::new(BrowserHandler::new(
        event_tx,
        config.browser.track_srv_authorities,
    )))?;
    if config.browser.log_traffic {
        transport.subscribe(Arc::new(TrafficLogger::new()))?;
    }

    transport.start().context("Failed to start mDNS transport")?;
    let transport = Arc::new(transport);
    for adapter in transport.adapters() {
        tracing::info!("Listening on {} ({}) index {}", adapter.name, adapter.address, adapter.index);
    }

    // Spawn browser task
    let (browser, browser_task) = BrowserHandle::spawn(event_rx, &config.browser, cancel.clone());

    // Spawn periodic browse report
    let report_cancel = cancel.clone();
    let report_browser = browser.clone();
    let watch = config.browser.watch.clone();
    let report_interval = config.browser.report_interval();
    let report_task = tokio::spawn(async move {
        if let Err(e) = cache_manager::run_report(report_browser, watch, report_interval, report_cancel).await {
            tracing::error!("Browse report error: {}", e);
        }
    });

    // Spawn publisher task
    let address = config
        .publisher
        .address
        .or_else(|| transport.adapters().first().map(|adapter| adapter.address))
        .context("No IPv4 address to publish")?;
    let publisher = PublisherHandle::spawn(transport.clone(), address, &config.publisher, cancel.clone());

    for entry in &config.publish {
        let service = entry.to_service()?;
        if let Err(e) = publisher.publish(service).await {
            tracing::error!("Failed to publish {}: {}", entry.long_name, e);
        }
    }

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    // Goodbyes must go out while the transport is still open
    if let Err(e) = publisher.shutdown().await {
        tracing::error!("Failed to shutdown publisher: {}", e);
    }

    if let Err(e) = browser.shutdown().await {
        tracing::error!("Failed to shutdown browser: {}", e);
    }

    cancel.cancel();
    let _ = tokio::join!(browser_task, report_task);

    transport.close();

    tracing::info!("Shutdown complete");
    Ok(())
}
