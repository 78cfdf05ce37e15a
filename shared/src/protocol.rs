use std::net::Ipv4Addr;

/// UDP port used by multicast DNS
pub const MDNS_PORT: u16 = 5353;

/// IPv4 multicast group for mDNS
pub const MDNS_GROUP_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// DNS-SD meta-query name used to enumerate service types
pub const SERVICES_META_QUERY: &str = "_services._dns-sd._udp.local.";

/// Domain every mDNS name lives under
pub const LOCAL_DOMAIN: &str = "local.";

/// Internet class
pub const CLASS_IN: u16 = 0x0001;

/// mDNS cache-flush bit, overlaid on the RR class field
pub const CACHE_FLUSH_BIT: u16 = 0x8000;

/// mDNS unicast-response bit, overlaid on the question class field
pub const UNICAST_RESPONSE_BIT: u16 = 0x8000;

/// TTL for records that are not bound to a host (PTR, TXT, service NSEC)
pub const TTL_SHARED: u32 = 4500;

/// TTL for records bound to a host name (SRV, A, host NSEC, reverse PTR)
pub const TTL_HOST: u32 = 120;

/// Header flag: message is a response
pub const FLAG_RESPONSE: u16 = 0x8000;

/// Header flag: authoritative answer
pub const FLAG_AUTHORITATIVE: u16 = 0x0400;

/// Largest datagram accepted on the receive path
pub const MAX_DATAGRAM: usize = 9000;
