use std::sync::atomic::{AtomicU64, Ordering};
use shared::dns::Message;
use crate::mdns::transport::{Packet, PacketHandler};

/// Logs every datagram the transport receives: a summary line at info,
/// each decoded record at debug, raw bytes at trace.
#[derive(Default)]
pub struct TrafficLogger {
    count: AtomicU64,
}

impl TrafficLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packets seen so far
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl PacketHandler for TrafficLogger {
    fn on_packet(&self, packet: &Packet) {
        let seq = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        let message = Message::parse(&packet.data);

        tracing::info!(
            "#{} {} from {} at {}: {} bytes, {} question(s), {} answer(s), {} authorit(ies), {} additional(s)",
            seq,
            if message.is_response() { "response" } else { "query" },
            packet.remote,
            packet.arrival.format("%H:%M:%S%.3f"),
            packet.data.len(),
            message.questions.len(),
            message.answers.len(),
            message.authorities.len(),
            message.additionals.len()
        );
        tracing::trace!("#{} {}", seq, hex::encode(&packet.data));

        for question in &message.questions {
            tracing::debug!("#{} QD {}", seq, question);
        }
        for record in &message.answers {
            tracing::debug!("#{} AN {}", seq, record);
        }
        for record in &message.authorities {
            tracing::debug!("#{} NS {}", seq, record);
        }
        for record in &message.additionals {
            tracing::debug!("#{} AR {}", seq, record);
        }
    }
}
