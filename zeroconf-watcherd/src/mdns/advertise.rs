use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use anyhow::Result;
use shared::dns::Message;
use shared::types::PublishedService;
use crate::config::PublisherConfig;
use crate::mdns::packets;
use crate::mdns::transport::Broadcaster;

#[derive(Error, Debug)]
pub enum PublisherError {
    #[error("publisher is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AnnounceState {
    Announce1,
    Announce2,
    Announce3,
    Ready,
}

/// Runtime state of one registration.
struct PublishContext {
    state: AnnounceState,
    countdown: u32,
    announce: Message,
}

impl PublishContext {
    fn new(announce: Message) -> Self {
        Self {
            state: AnnounceState::Announce1,
            countdown: 2,
            announce,
        }
    }

    /// Count down one tick. Returns true when the announcement is due, after
    /// moving to the next state.
    fn tick(&mut self) -> bool {
        if self.state == AnnounceState::Ready {
            return false;
        }
        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown > 0 {
            return false;
        }
        (self.state, self.countdown) = match self.state {
            AnnounceState::Announce1 => (AnnounceState::Announce2, 1),
            AnnounceState::Announce2 => (AnnounceState::Announce3, 4),
            // No 8-tick wait before Ready: Ready sends nothing, so it is unobservable
            AnnounceState::Announce3 | AnnounceState::Ready => (AnnounceState::Ready, 0),
        };
        true
    }
}

/// Commands sent to the publisher task
pub enum PublisherCommand {
    Publish(PublishedService, oneshot::Sender<Result<()>>),
    Unpublish(String, oneshot::Sender<bool>),
    UnpublishAll(oneshot::Sender<usize>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to register local services
#[derive(Clone)]
pub struct PublisherHandle {
    tx: mpsc::Sender<PublisherCommand>,
    closed: Arc<AtomicBool>,
}

impl PublisherHandle {
    /// Spawn the publisher task. A/PTR records point at `address`.
    pub fn spawn(
        broadcaster: Arc<dyn Broadcaster>,
        address: Ipv4Addr,
        config: &PublisherConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<PublisherCommand>(64);
        let publisher = Publisher {
            broadcaster,
            address,
            contexts: HashMap::new(),
        };
        let tick = config.tick_interval();
        tokio::spawn(async move {
            publisher.run(rx, tick, cancel).await;
        });

        Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claim the service's names now and announce it three times over the
    /// following ticks. Replaces any registration with the same long name.
    pub async fn publish(&self, service: PublishedService) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PublisherError::ShuttingDown.into());
        }
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PublisherCommand::Publish(service, reply))
            .await
            .map_err(|_| PublisherError::ShuttingDown)?;
        rx.await.map_err(|_| PublisherError::ShuttingDown)?
    }

    /// Withdraw one registration by long name, sending a goodbye. Returns
    /// false if nothing was registered under that name.
    pub async fn unpublish(&self, long_name: &str) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PublisherCommand::Unpublish(long_name.to_string(), reply))
            .await?;
        Ok(rx.await?)
    }

    /// Withdraw every registration. Returns how many there were.
    pub async fn unpublish_all(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(PublisherCommand::UnpublishAll(reply)).await?;
        Ok(rx.await?)
    }

    /// Reject further publishes, send goodbyes for everything registered,
    /// and stop the task.
    pub async fn shutdown(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let (reply, rx) = oneshot::channel();
        self.tx.send(PublisherCommand::Shutdown(reply)).await?;
        rx.await?;
        Ok(())
    }
}

struct Publisher {
    broadcaster: Arc<dyn Broadcaster>,
    address: Ipv4Addr,
    contexts: HashMap<String, PublishContext>,
}

impl Publisher {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<PublisherCommand>,
        tick: Duration,
        cancel: CancellationToken,
    ) {
        tracing::info!("Starting mDNS publisher");
        let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);

        loop {
            tokio::select! {
                Some(command) = rx.recv() => {
                    match command {
                        PublisherCommand::Publish(service, reply) => {
                            let _ = reply.send(self.publish(service));
                        }
                        PublisherCommand::Unpublish(long_name, reply) => {
                            let _ = reply.send(self.unpublish(&long_name));
                        }
                        PublisherCommand::UnpublishAll(reply) => {
                            let _ = reply.send(self.unpublish_all());
                        }
                        PublisherCommand::Shutdown(reply) => {
                            self.unpublish_all();
                            let _ = reply.send(());
                            tracing::info!("mDNS publisher shutting down");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.tick();
                }
                _ = cancel.cancelled() => {
                    tracing::info!("mDNS publisher shutting down");
                    break;
                }
            }
        }
    }

    fn publish(&mut self, service: PublishedService) -> Result<()> {
        let claim = packets::claim(&service, self.address);
        let announce = packets::announce(&service, self.address);
        // Refuse names that cannot be encoded before touching any state
        claim.encode()?;
        announce.encode()?;

        if self.contexts.remove(&service.long_name).is_some() {
            tracing::debug!("Replacing registration for {}", service.long_name);
        }
        self.send(&claim);
        self.contexts
            .insert(service.long_name.clone(), PublishContext::new(announce));

        tracing::info!(
            "Publishing {} on {}:{}",
            service.instance_name(),
            self.address,
            service.port
        );
        Ok(())
    }

    fn unpublish(&mut self, long_name: &str) -> bool {
        match self.contexts.remove(long_name) {
            Some(context) => {
                self.send(&packets::goodbye(&context.announce));
                tracing::info!("Unpublished {}", long_name);
                true
            }
            None => false,
        }
    }

    fn unpublish_all(&mut self) -> usize {
        let contexts: Vec<_> = self.contexts.drain().collect();
        for (long_name, context) in &contexts {
            self.send(&packets::goodbye(&context.announce));
            tracing::info!("Unpublished {}", long_name);
        }
        contexts.len()
    }

    fn tick(&mut self) {
        for (long_name, context) in self.contexts.iter_mut() {
            if context.tick() {
                tracing::debug!("Announcing {} ({:?} next)", long_name, context.state);
                if let Err(e) = self.broadcaster.broadcast(&context.announce) {
                    tracing::warn!("Failed to announce {}: {}", long_name, e);
                }
            }
        }
    }

    fn send(&self, message: &Message) {
        if let Err(e) = self.broadcaster.broadcast(message) {
            tracing::warn!("Broadcast failed: {}", e);
        }
    }
}
