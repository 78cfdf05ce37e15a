use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::LOCAL_DOMAIN;

/// A service offered by this host.
/// Built by the caller (or loaded from config) and handed to the publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedService {
    /// Instance label, e.g. "745E1C22FAFD@Living Room"
    pub long_name: String,

    /// Host label without domain, e.g. "Living-Room"
    pub short_name: String,

    /// Service type, e.g. "_raop._tcp" or "_raop._tcp.local."
    pub service_type: String,

    /// Service port
    pub port: u16,

    /// TXT record key-value pairs
    #[serde(default)]
    pub txt: BTreeMap<String, String>,
}

impl PublishedService {
    /// Fully qualified service type, e.g. "_raop._tcp.local."
    pub fn qualified_type(&self) -> String {
        canonical_service_type(&self.service_type)
    }

    /// Fully qualified instance name, e.g. "Office._raop._tcp.local."
    pub fn instance_name(&self) -> String {
        format!("{}.{}", self.long_name, self.qualified_type())
    }

    /// Fully qualified host name, e.g. "Office.local."
    pub fn host_name(&self) -> String {
        format!("{}.{}", self.short_name, LOCAL_DOMAIN)
    }
}

/// One instance listed by a browse.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceBrowseResult {
    /// Instance label, e.g. "745E1C22FAFD@Living Room"
    pub name: String,

    /// Fully qualified service type, e.g. "_raop._tcp.local."
    pub service_type: String,
}

impl fmt::Display for ServiceBrowseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.name, self.service_type)
    }
}

/// Append ".local." to a service type unless it is already qualified.
pub fn canonical_service_type(service_type: &str) -> String {
    let trimmed = service_type.trim_end_matches('.');
    if trimmed.ends_with(".local") || trimmed == "local" {
        format!("{}.", trimmed)
    } else {
        format!("{}.{}", trimmed, LOCAL_DOMAIN)
    }
}
