use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use shared::dns::{Message, WireError};
use shared::protocol::MAX_DATAGRAM;
use crate::config::TransportConfig;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport already started")]
    AlreadyStarted,
    #[error("transport is closed")]
    Closed,
    #[error("no usable IPv4 multicast adapter")]
    NoUsableAdapter,
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[from] WireError),
}

/// One datagram as received.
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Vec<u8>,
    pub remote: SocketAddr,
    pub arrival: DateTime<Utc>,
}

/// Consumer of inbound datagrams. Called on the dispatch thread, one packet
/// at a time, in arrival order. A slow handler holds up every later packet.
pub trait PacketHandler: Send + Sync {
    fn on_packet(&self, packet: &Packet);
}

/// Anything that can put a message on the wire.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, message: &Message) -> anyhow::Result<()>;
}

/// A local network adapter with a socket bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adapter {
    pub name: String,
    pub index: u32,
    pub address: Ipv4Addr,
}

/// Pause after the first failed receive; grows by this much per retry.
const RECEIVE_RETRY: Duration = Duration::from_millis(100);
/// Consecutive receive failures after which an adapter is given up.
const MAX_RECEIVE_ERRORS: u32 = 10;

enum WorkerMessage {
    Packet(Packet),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Closed,
}

struct Bound {
    adapter: Adapter,
    socket: Arc<UdpSocket>,
}

struct State {
    phase: Phase,
    sockets: Vec<Bound>,
    queue: Option<flume::Sender<WorkerMessage>>,
    worker: Option<thread::JoinHandle<()>>,
}

/// Multicast transport: one socket per usable adapter, a single dispatch
/// worker, and fan-out broadcast.
pub struct Transport {
    config: TransportConfig,
    handlers: Vec<Arc<dyn PacketHandler>>,
    state: Mutex<State>,
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            handlers: Vec::new(),
            state: Mutex::new(State {
                phase: Phase::Idle,
                sockets: Vec::new(),
                queue: None,
                worker: None,
            }),
            closed: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    /// Register a handler. Only allowed before `start`.
    pub fn subscribe(&mut self, handler: Arc<dyn PacketHandler>) -> Result<(), TransportError> {
        match self.state.get_mut().phase {
            Phase::Idle => {
                self.handlers.push(handler);
                Ok(())
            }
            Phase::Running => Err(TransportError::AlreadyStarted),
            Phase::Closed => Err(TransportError::Closed),
        }
    }

    /// Bind every usable adapter and begin receiving. Must run inside a
    /// Tokio runtime.
    pub fn start(&self) -> Result<(), TransportError> {
        self.check_idle()?;

        let adapters = usable_adapters(&self.config.interfaces)?;
        let mut sockets = Vec::new();
        for adapter in adapters {
            match bind_adapter(&adapter, &self.config) {
                Ok(socket) => {
                    tracing::debug!("Bound {} ({}) index {}", adapter.name, adapter.address, adapter.index);
                    sockets.push((adapter, socket));
                }
                Err(e) => {
                    tracing::warn!("Skipping adapter {} ({}): {}", adapter.name, adapter.address, e);
                }
            }
        }

        self.start_with_sockets(sockets)
    }

    /// Start over already bound sockets.
    pub(crate) fn start_with_sockets(
        &self,
        sockets: Vec<(Adapter, std::net::UdpSocket)>,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        match state.phase {
            Phase::Idle => {}
            Phase::Running => return Err(TransportError::AlreadyStarted),
            Phase::Closed => return Err(TransportError::Closed),
        }
        if sockets.is_empty() {
            return Err(TransportError::NoUsableAdapter);
        }

        let mut bound = Vec::with_capacity(sockets.len());
        for (adapter, socket) in sockets {
            socket.set_nonblocking(true)?;
            bound.push(Bound {
                adapter,
                socket: Arc::new(UdpSocket::from_std(socket)?),
            });
        }

        let (tx, rx) = flume::unbounded::<WorkerMessage>();

        let handlers = self.handlers.clone();
        let closed = self.closed.clone();
        let worker = thread::Builder::new()
            .name("mdns-dispatch".to_string())
            .spawn(move || dispatch(rx, handlers, closed))?;

        for entry in &bound {
            let socket = entry.socket.clone();
            let name = entry.adapter.name.clone();
            let queue = tx.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move { receive(socket, name, queue, cancel).await });
        }

        tracing::info!("Transport started on {} adapter(s)", bound.len());

        state.phase = Phase::Running;
        state.sockets = bound;
        state.queue = Some(tx);
        state.worker = Some(worker);
        Ok(())
    }

    /// Adapters with a bound socket.
    pub fn adapters(&self) -> Vec<Adapter> {
        self.state
            .lock()
            .sockets
            .iter()
            .map(|bound| bound.adapter.clone())
            .collect()
    }

    /// Stop receiving, drop every socket and join the dispatch worker.
    /// Safe to call more than once.
    pub fn close(&self) {
        let worker = {
            let mut state = self.state.lock();
            if state.phase == Phase::Closed {
                return;
            }
            state.phase = Phase::Closed;
            self.closed.store(true, Ordering::SeqCst);
            self.cancel.cancel();
            state.sockets.clear();
            if let Some(queue) = state.queue.take() {
                let _ = queue.send(WorkerMessage::Shutdown);
            }
            state.worker.take()
        };

        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!("mDNS dispatch worker panicked");
            }
        }
        tracing::info!("Transport closed");
    }

    fn check_idle(&self) -> Result<(), TransportError> {
        match self.state.lock().phase {
            Phase::Idle => Ok(()),
            Phase::Running => Err(TransportError::AlreadyStarted),
            Phase::Closed => Err(TransportError::Closed),
        }
    }

    fn destination(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.config.group, self.config.port))
    }

    /// Encode once and send on every bound socket. A failing adapter is
    /// logged and skipped.
    pub fn send(&self, message: &Message) -> Result<(), TransportError> {
        let data = message.encode()?;
        let destination = SockAddr::from(self.destination());

        let state = self.state.lock();
        if state.phase != Phase::Running {
            return Err(TransportError::Closed);
        }
        for bound in &state.sockets {
            // Straight to the syscall: the reactor may not have seen the
            // socket writable yet right after start.
            if let Err(e) = SockRef::from(&*bound.socket).send_to(&data, &destination) {
                tracing::warn!("Send on {} failed: {}", bound.adapter.name, e);
            }
        }
        tracing::trace!("Broadcast {} bytes on {} adapter(s)", data.len(), state.sockets.len());
        Ok(())
    }
}

impl Broadcaster for Transport {
    fn broadcast(&self, message: &Message) -> anyhow::Result<()> {
        Ok(self.send(message)?)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Receive loop for one socket. The next receive is issued as soon as a
/// datagram is queued, so handler latency never stalls the socket.
async fn receive(
    socket: Arc<UdpSocket>,
    name: String,
    queue: flume::Sender<WorkerMessage>,
    cancel: CancellationToken,
) {
    let mut buffer = vec![0u8; MAX_DATAGRAM];
    let mut errors = 0;
    loop {
        tokio::select! {
            result = socket.recv_from(&mut buffer) => {
                match result {
                    Ok((len, remote)) => {
                        errors = 0;
                        let packet = Packet {
                            data: buffer[..len].to_vec(),
                            remote,
                            arrival: Utc::now(),
                        };
                        if queue.send(WorkerMessage::Packet(packet)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        if cancel.is_cancelled() {
                            break;
                        }
                        errors += 1;
                        let Some(delay) = receive_backoff(errors) else {
                            tracing::error!("Receive on {} keeps failing, giving up: {}", name, e);
                            break;
                        };
                        tracing::warn!("Receive on {} failed: {}", name, e);
                        let cancelled = tokio::select! {
                            _ = tokio::time::sleep(delay) => false,
                            _ = cancel.cancelled() => true,
                        };
                        if cancelled {
                            break;
                        }
                    }
                }
            }
            _ = cancel.cancelled() => {
                break;
            }
        }
    }
    tracing::debug!("Receiver for {} stopped", name);
}

/// Delay before the next receive after `errors` failures in a row, or
/// `None` once the adapter should be abandoned.
fn receive_backoff(errors: u32) -> Option<Duration> {
    (errors < MAX_RECEIVE_ERRORS).then(|| RECEIVE_RETRY * errors)
}

fn dispatch(
    rx: flume::Receiver<WorkerMessage>,
    handlers: Vec<Arc<dyn PacketHandler>>,
    closed: Arc<AtomicBool>,
) {
    while let Ok(message) = rx.recv() {
        match message {
            WorkerMessage::Packet(packet) => {
                if closed.load(Ordering::SeqCst) {
                    break;
                }
                for handler in &handlers {
                    handler.on_packet(&packet);
                }
            }
            WorkerMessage::Shutdown => break,
        }
    }
    tracing::debug!("mDNS dispatch worker exiting");
}

/// IPv4, non-loopback adapters that have an interface index, optionally
/// restricted to the named ones.
pub fn usable_adapters(allow: &[String]) -> io::Result<Vec<Adapter>> {
    let adapters = if_addrs::get_if_addrs()?
        .into_iter()
        .filter(|intf| !intf.is_loopback())
        .filter(|intf| allow.is_empty() || allow.contains(&intf.name))
        .filter_map(|intf| {
            let IpAddr::V4(address) = intf.ip() else {
                return None;
            };
            let index = intf.index?;
            Some(Adapter {
                name: intf.name,
                index,
                address,
            })
        })
        .collect();
    Ok(adapters)
}

/// Open a socket on the mDNS port, joined to the group on one adapter and
/// sending through it.
fn bind_adapter(adapter: &Adapter, config: &TransportConfig) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);
    socket.bind(&bind_addr.into())?;

    socket.join_multicast_v4(&config.group, &adapter.address)?;
    socket.set_multicast_if_v4(&adapter.address)?;
    socket.set_multicast_loop_v4(true)?;
    socket.set_multicast_ttl_v4(255)?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;
    use shared::dns::{RData, ResourceRecord};

    struct Forward(flume::Sender<Packet>);

    impl PacketHandler for Forward {
        fn on_packet(&self, packet: &Packet) {
            let _ = self.0.send(packet.clone());
        }
    }

    fn loopback(name: &str) -> (Adapter, std::net::UdpSocket) {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let adapter = Adapter {
            name: name.to_string(),
            index: 1,
            address: Ipv4Addr::LOCALHOST,
        };
        (adapter, socket)
    }

    fn loopback_config(port: u16) -> TransportConfig {
        TransportConfig {
            group: Ipv4Addr::LOCALHOST,
            port,
            interfaces: Vec::new(),
        }
    }

    /// An IPv6-only socket: every send to the IPv4 group fails.
    fn unroutable(name: &str) -> Option<(Adapter, std::net::UdpSocket)> {
        let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).ok()?;
        socket.set_only_v6(true).ok()?;
        socket
            .bind(&SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)).into())
            .ok()?;
        let adapter = Adapter {
            name: name.to_string(),
            index: 2,
            address: Ipv4Addr::LOCALHOST,
        };
        Some((adapter, socket.into()))
    }

    async fn next(rx: &flume::Receiver<Packet>) -> Packet {
        tokio::time::timeout(Duration::from_secs(5), rx.recv_async())
            .await
            .expect("timed out waiting for packet")
            .unwrap()
    }

    #[tokio::test]
    async fn test_dispatches_in_arrival_order() {
        let (tx, rx) = flume::unbounded();
        let mut transport = Transport::new(TransportConfig::default());
        transport.subscribe(Arc::new(Forward(tx))).unwrap();

        let (adapter, socket) = loopback("lo-a");
        let target = socket.local_addr().unwrap();
        transport.start_with_sockets(vec![(adapter, socket)]).unwrap();

        let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        for i in 0..5u8 {
            sender.send_to(&[i, i, i], target).unwrap();
        }

        for i in 0..5u8 {
            let packet = next(&rx).await;
            assert_eq!(packet.data, vec![i, i, i]);
            assert_eq!(packet.remote, sender.local_addr().unwrap());
        }
        transport.close();
    }

    #[tokio::test]
    async fn test_every_adapter_is_received_and_handlers_all_called() {
        let (tx_a, rx_a) = flume::unbounded();
        let (tx_b, rx_b) = flume::unbounded();
        let mut transport = Transport::new(TransportConfig::default());
        transport.subscribe(Arc::new(Forward(tx_a))).unwrap();
        transport.subscribe(Arc::new(Forward(tx_b))).unwrap();

        let first = loopback("lo-a");
        let second = loopback("lo-b");
        let targets = [first.1.local_addr().unwrap(), second.1.local_addr().unwrap()];
        transport.start_with_sockets(vec![first, second]).unwrap();
        assert_eq!(transport.adapters().len(), 2);

        let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"one", targets[0]).unwrap();
        let _ = next(&rx_a).await;
        sender.send_to(b"two", targets[1]).unwrap();
        let _ = next(&rx_a).await;

        let mut seen = vec![next(&rx_b).await.data, next(&rx_b).await.data];
        seen.sort();
        assert_eq!(seen, vec![b"one".to_vec(), b"two".to_vec()]);
        transport.close();
    }

    #[tokio::test]
    async fn test_broadcast_sends_on_every_socket() {
        let receiver = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let port = receiver.local_addr().unwrap().port();

        let transport = Transport::new(loopback_config(port));
        transport
            .start_with_sockets(vec![loopback("lo-a"), loopback("lo-b")])
            .unwrap();

        let mut message = Message::response();
        message.answers.push(ResourceRecord::new(
            "Office.local.",
            120,
            RData::A(Ipv4Addr::new(192, 168, 1, 23)),
        ));
        // no yield between start and send
        transport.broadcast(&message).unwrap();

        let mut buffer = [0u8; 512];
        for _ in 0..2 {
            let (len, _) = receiver.recv_from(&mut buffer).unwrap();
            let copy = Message::parse(&buffer[..len]);
            assert_eq!(copy.answers, message.answers);
        }
        transport.close();
    }

    #[tokio::test]
    async fn test_failing_adapter_does_not_block_others() {
        let Some(broken) = unroutable("v6-only") else {
            // host without IPv6
            return;
        };
        assert!(broken.1.send_to(b"x", "127.0.0.1:9").is_err());

        let receiver = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let port = receiver.local_addr().unwrap().port();

        let (tx, rx) = flume::unbounded();
        let mut transport = Transport::new(loopback_config(port));
        transport.subscribe(Arc::new(Forward(tx))).unwrap();
        let healthy = loopback("lo-a");
        let target = healthy.1.local_addr().unwrap();
        transport.start_with_sockets(vec![broken, healthy]).unwrap();

        transport.send(&Message::query()).unwrap();
        let mut buffer = [0u8; 512];
        let (len, from) = receiver.recv_from(&mut buffer).unwrap();
        assert_eq!(from, target);
        assert!(!Message::parse(&buffer[..len]).is_response());

        receiver.send_to(b"still listening", target).unwrap();
        assert_eq!(next(&rx).await.data, b"still listening".to_vec());
        transport.close();
    }

    #[test]
    fn test_receive_backoff_grows_then_gives_up() {
        assert_eq!(receive_backoff(1), Some(Duration::from_millis(100)));
        assert_eq!(receive_backoff(3), Some(Duration::from_millis(300)));
        assert_eq!(receive_backoff(MAX_RECEIVE_ERRORS - 1), Some(Duration::from_millis(900)));
        assert_eq!(receive_backoff(MAX_RECEIVE_ERRORS), None);
    }

    #[tokio::test]
    async fn test_lifecycle_misuse_fails_fast() {
        let transport = Transport::new(TransportConfig::default());
        assert!(matches!(
            transport.start_with_sockets(Vec::new()),
            Err(TransportError::NoUsableAdapter)
        ));

        transport.start_with_sockets(vec![loopback("lo-a")]).unwrap();
        assert!(matches!(
            transport.start_with_sockets(vec![loopback("lo-b")]),
            Err(TransportError::AlreadyStarted)
        ));
        assert!(matches!(transport.start(), Err(TransportError::AlreadyStarted)));

        transport.close();
        transport.close();
        assert!(matches!(
            transport.start_with_sockets(vec![loopback("lo-c")]),
            Err(TransportError::Closed)
        ));
        assert!(matches!(transport.send(&Message::query()), Err(TransportError::Closed)));
        assert!(transport.adapters().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_after_start_rejected() {
        let (tx, _rx) = flume::unbounded();
        let mut transport = Transport::new(TransportConfig::default());
        transport.start_with_sockets(vec![loopback("lo-a")]).unwrap();
        assert!(matches!(
            transport.subscribe(Arc::new(Forward(tx))),
            Err(TransportError::AlreadyStarted)
        ));
    }
}
