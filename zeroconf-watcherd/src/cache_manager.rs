use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use anyhow::Result;
use shared::types::{PublishedService, ServiceBrowseResult};
use crate::cache::table::ServiceTable;
use crate::config::BrowserConfig;
pub use crate::mdns::browser::BrowserEvent;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("resolve is not implemented")]
    ResolveNotImplemented,
}

/// Commands sent to the browser task
pub enum BrowserCommand {
    Browse(String, oneshot::Sender<Vec<ServiceBrowseResult>>),
    Shutdown,
}

/// Handle to query the service cache
#[derive(Clone)]
pub struct BrowserHandle {
    tx: mpsc::Sender<BrowserCommand>,
}

impl BrowserHandle {
    /// Spawn the browser task. It owns the service table, applies events
    /// from the packet handler, and sweeps expired instances.
    pub fn spawn(
        events: mpsc::Receiver<BrowserEvent>,
        config: &BrowserConfig,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel::<BrowserCommand>(64);
        let sweep_interval = config.sweep_interval();
        let task = tokio::spawn(async move {
            run(events, rx, sweep_interval, cancel).await;
        });
        (Self { tx }, task)
    }

    /// Instances of `service_type` currently in the cache. Never touches
    /// the network.
    pub async fn browse(&self, service_type: &str) -> Result<Vec<ServiceBrowseResult>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BrowserCommand::Browse(service_type.to_string(), reply))
            .await?;
        Ok(rx.await?)
    }

    /// Look up host, port and TXT data for a browse result. There is no
    /// resolve handshake, so this always fails.
    pub async fn resolve(
        &self,
        result: &ServiceBrowseResult,
        timeout: Duration,
    ) -> Result<PublishedService, BrowserError> {
        tracing::debug!("Resolve of {} ({:?} timeout) requested", result, timeout);
        Err(BrowserError::ResolveNotImplemented)
    }

    /// Stop the browser task
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(BrowserCommand::Shutdown).await?;
        Ok(())
    }
}

async fn run(
    mut events: mpsc::Receiver<BrowserEvent>,
    mut commands: mpsc::Receiver<BrowserCommand>,
    sweep_interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!("Starting mDNS browser");

    let mut table = ServiceTable::new();
    let mut sweep = tokio::time::interval_at(Instant::now() + sweep_interval, sweep_interval);

    loop {
        // Queued events are applied before any browse is answered
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("mDNS browser shutting down");
                break;
            }
            Some(event) = events.recv() => {
                apply(&mut table, event, Instant::now());
            }
            Some(command) = commands.recv() => {
                match command {
                    BrowserCommand::Browse(service_type, reply) => {
                        let _ = reply.send(table.browse(&service_type));
                    }
                    BrowserCommand::Shutdown => {
                        tracing::info!("mDNS browser shutting down");
                        break;
                    }
                }
            }
            _ = sweep.tick() => {
                let removed = table.sweep(Instant::now());
                if removed > 0 {
                    tracing::debug!("Swept {} expired instance(s)", removed);
                }
            }
        }
    }
}

fn apply(table: &mut ServiceTable, event: BrowserEvent, now: Instant) {
    match event {
        BrowserEvent::Ptr { service_type, instance, ttl } => {
            tracing::trace!("PTR {} in {} ttl {}", instance, service_type, ttl);
            table.record_ptr(&service_type, &instance, ttl, now);
        }
        BrowserEvent::Srv { service_type, instance, srv, ttl } => {
            if table.record_srv(&service_type, &instance, srv, ttl, now) {
                tracing::trace!("SRV updated for {} in {}", instance, service_type);
            }
        }
    }
}

/// Periodically log the instances of each watched service type
pub async fn run_report(
    browser: BrowserHandle,
    watch: Vec<String>,
    every: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    if watch.is_empty() {
        return Ok(());
    }

    let mut report = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = report.tick() => {
                for service_type in &watch {
                    match browser.browse(service_type).await {
                        Ok(found) if found.is_empty() => {
                            tracing::info!("No instances of {}", service_type);
                        }
                        Ok(found) => {
                            for result in found {
                                tracing::info!("{}", result);
                            }
                        }
                        Err(e) => {
                            tracing::error!("Failed to browse {}: {}", service_type, e);
                        }
                    }
                }
            }
            _ = cancel.cancelled() => {
                break;
            }
        }
    }

    Ok(())
}
