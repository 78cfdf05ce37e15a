use tokio::sync::mpsc;
use shared::dns::{Message, RData, Srv};
use crate::mdns::transport::{Packet, PacketHandler};

/// Cache updates derived from one inbound response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserEvent {
    Ptr {
        service_type: String,
        instance: String,
        ttl: u32,
    },
    Srv {
        service_type: String,
        instance: String,
        srv: Srv,
        ttl: u32,
    },
}

/// Packet-side half of the browser. Runs on the transport's dispatch thread
/// and forwards cache events to the browser actor, waiting for room when
/// the actor falls behind. Must not be called from inside the runtime.
pub struct BrowserHandler {
    tx: mpsc::Sender<BrowserEvent>,
    track_srv_authorities: bool,
}

impl BrowserHandler {
    pub fn new(tx: mpsc::Sender<BrowserEvent>, track_srv_authorities: bool) -> Self {
        Self {
            tx,
            track_srv_authorities,
        }
    }
}

impl PacketHandler for BrowserHandler {
    fn on_packet(&self, packet: &Packet) {
        let message = Message::parse(&packet.data);
        if !message.is_response() {
            return;
        }

        for event in events_from(&message, self.track_srv_authorities) {
            if self.tx.blocking_send(event).is_err() {
                tracing::debug!("Browser stopped, ignoring response from {}", packet.remote);
                return;
            }
        }
    }
}

/// PTR answers always produce events; SRV records in the authority section
/// only when `track_srv_authorities` is set.
pub fn events_from(message: &Message, track_srv_authorities: bool) -> Vec<BrowserEvent> {
    let mut events = Vec::new();

    for record in &message.answers {
        if let RData::Ptr(target) = &record.data {
            let (instance, _) = split_instance(target);
            events.push(BrowserEvent::Ptr {
                service_type: record.name.clone(),
                instance: instance.to_string(),
                ttl: record.ttl,
            });
        }
    }

    if track_srv_authorities {
        for record in &message.authorities {
            if let RData::Srv(srv) = &record.data {
                let (instance, service_type) = split_instance(&record.name);
                events.push(BrowserEvent::Srv {
                    service_type: service_type.to_string(),
                    instance: instance.to_string(),
                    srv: srv.clone(),
                    ttl: record.ttl,
                });
            }
        }
    }

    events
}

/// Split "Office._raop._tcp.local." into ("Office", "_raop._tcp.local.").
fn split_instance(name: &str) -> (&str, &str) {
    name.split_once('.').unwrap_or((name, ""))
}
