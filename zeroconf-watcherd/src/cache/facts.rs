use std::time::Duration;
use tokio::time::Instant;
use shared::dns::Srv;

/// A record value plus the moment it was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFact<T> {
    pub value: T,
    pub ttl: Duration,
    pub recorded: Instant,
}

impl<T> ServiceFact<T> {
    pub fn new(value: T, ttl_secs: u32, recorded: Instant) -> Self {
        Self {
            value,
            ttl: Duration::from_secs(ttl_secs as u64),
            recorded,
        }
    }

    /// TTL minus elapsed time, or `None` once that has gone negative.
    pub fn remaining_life_at(&self, now: Instant) -> Option<Duration> {
        self.ttl.checked_sub(now.saturating_duration_since(self.recorded))
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.remaining_life_at(now).is_none()
    }
}

/// Latest PTR and SRV sightings for one service instance.
#[derive(Debug, Clone, Default)]
pub struct ServiceInfo {
    pub ptr: Option<ServiceFact<String>>,
    pub srv: Option<ServiceFact<Srv>>,
}

impl ServiceInfo {
    /// Expiry follows the PTR fact. An entry only ever fed by SRV sightings
    /// follows its SRV fact instead.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match (&self.ptr, &self.srv) {
            (Some(ptr), _) => ptr.is_expired_at(now),
            (None, Some(srv)) => srv.is_expired_at(now),
            (None, None) => true,
        }
    }
}
