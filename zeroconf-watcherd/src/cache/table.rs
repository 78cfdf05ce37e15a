use std::collections::{BTreeMap, HashMap};
use tokio::time::Instant;
use shared::dns::Srv;
use shared::types::{canonical_service_type, ServiceBrowseResult};
use crate::cache::facts::{ServiceFact, ServiceInfo};

/// Instances seen for one service type, keyed by instance label.
#[derive(Debug, Default)]
pub struct ServiceCollection {
    instances: BTreeMap<String, ServiceInfo>,
}

impl ServiceCollection {
    pub fn get(&self, instance: &str) -> Option<&ServiceInfo> {
        self.instances.get(instance)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Service type -> instances, the browser's whole cache.
#[derive(Debug, Default)]
pub struct ServiceTable {
    types: HashMap<String, ServiceCollection>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection(&self, service_type: &str) -> Option<&ServiceCollection> {
        self.types.get(&canonical_service_type(service_type))
    }

    fn entry(&mut self, service_type: &str, instance: &str) -> &mut ServiceInfo {
        self.types
            .entry(canonical_service_type(service_type))
            .or_default()
            .instances
            .entry(instance.to_string())
            .or_default()
    }

    /// Replace the instance's PTR fact. The newest sighting always wins.
    pub fn record_ptr(&mut self, service_type: &str, instance: &str, ttl: u32, now: Instant) {
        let info = self.entry(service_type, instance);
        info.ptr = Some(ServiceFact::new(instance.to_string(), ttl, now));
    }

    /// Keep the SRV with the numerically lowest priority. Returns whether the
    /// stored fact changed.
    pub fn record_srv(
        &mut self,
        service_type: &str,
        instance: &str,
        srv: Srv,
        ttl: u32,
        now: Instant,
    ) -> bool {
        let info = self.entry(service_type, instance);
        let replace = match &info.srv {
            None => true,
            Some(current) => srv.priority < current.value.priority,
        };
        if replace {
            info.srv = Some(ServiceFact::new(srv, ttl, now));
        }
        replace
    }

    /// Drop expired instances, and types left with none. Returns how many
    /// instances were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        for (service_type, collection) in self.types.iter_mut() {
            let before = collection.len();
            collection.instances.retain(|instance, info| {
                let expired = info.is_expired_at(now);
                if expired {
                    tracing::debug!("Expired {}.{}", instance, service_type);
                }
                !expired
            });
            if collection.len() < before {
                removed += before - collection.len();
                tracing::debug!("{} instance(s) of {} left", collection.len(), service_type);
            }
        }
        self.types.retain(|_, collection| !collection.is_empty());
        removed
    }

    /// Instances of `service_type` that have a PTR fact. The type may omit
    /// the trailing ".local.".
    pub fn browse(&self, service_type: &str) -> Vec<ServiceBrowseResult> {
        let service_type = canonical_service_type(service_type);
        let Some(collection) = self.types.get(&service_type) else {
            return Vec::new();
        };
        collection
            .instances
            .iter()
            .filter(|(_, info)| info.ptr.is_some())
            .map(|(instance, _)| ServiceBrowseResult {
                name: instance.clone(),
                service_type: service_type.clone(),
            })
            .collect()
    }
}
