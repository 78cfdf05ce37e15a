//! Messages a publisher puts on the wire for one service.

use std::net::Ipv4Addr;
use shared::dns::{Message, Nsec, Question, RData, RecordType, ResourceRecord, Srv};
use shared::protocol::{SERVICES_META_QUERY, TTL_HOST, TTL_SHARED};
use shared::types::PublishedService;

fn srv_data(service: &PublishedService) -> RData {
    RData::Srv(Srv {
        priority: 0,
        weight: 0,
        port: service.port,
        target: service.host_name(),
    })
}

/// "192.168.1.23" -> "23.1.168.192.in-addr.arpa."
pub fn reverse_name(address: Ipv4Addr) -> String {
    let [a, b, c, d] = address.octets();
    format!("{}.{}.{}.{}.in-addr.arpa.", d, c, b, a)
}

/// Query asking whether anyone else owns the instance or host name, with
/// the records we intend to use in the authority section.
pub fn claim(service: &PublishedService, address: Ipv4Addr) -> Message {
    let instance = service.instance_name();
    let host = service.host_name();

    let mut message = Message::query();
    message
        .questions
        .push(Question::new(instance.clone(), RecordType::Any).with_unicast_response());
    message
        .questions
        .push(Question::new(host.clone(), RecordType::Any).with_unicast_response());

    message
        .authorities
        .push(ResourceRecord::new(instance, TTL_HOST, srv_data(service)));
    message
        .authorities
        .push(ResourceRecord::new(host, TTL_HOST, RData::A(address)));
    message
}

/// Unsolicited response advertising the service. Shared PTRs go out
/// without the cache-flush bit; everything unique to this host carries it.
pub fn announce(service: &PublishedService, address: Ipv4Addr) -> Message {
    let service_type = service.qualified_type();
    let instance = service.instance_name();
    let host = service.host_name();

    let mut message = Message::response();
    message.answers.push(ResourceRecord::new(
        SERVICES_META_QUERY,
        TTL_SHARED,
        RData::Ptr(service_type.clone()),
    ));
    message.answers.push(ResourceRecord::new(
        service_type,
        TTL_SHARED,
        RData::Ptr(instance.clone()),
    ));
    message
        .answers
        .push(ResourceRecord::new(instance.clone(), TTL_HOST, srv_data(service)).with_cache_flush());
    message.answers.push(
        ResourceRecord::new(instance.clone(), TTL_SHARED, RData::txt(&service.txt)).with_cache_flush(),
    );
    message
        .answers
        .push(ResourceRecord::new(host.clone(), TTL_HOST, RData::A(address)).with_cache_flush());
    message.answers.push(
        ResourceRecord::new(reverse_name(address), TTL_HOST, RData::Ptr(host.clone())).with_cache_flush(),
    );

    message.additionals.push(
        ResourceRecord::new(
            instance.clone(),
            TTL_SHARED,
            RData::Nsec(Nsec::new(instance, [RecordType::Txt, RecordType::Srv])),
        )
        .with_cache_flush(),
    );
    message.additionals.push(
        ResourceRecord::new(host.clone(), TTL_HOST, RData::Nsec(Nsec::new(host, [RecordType::A])))
            .with_cache_flush(),
    );
    message
}

/// The announcement with every TTL set to zero, telling caches to forget it.
pub fn goodbye(announce: &Message) -> Message {
    announce.with_ttl(0)
}
