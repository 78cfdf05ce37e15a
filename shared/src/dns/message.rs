use std::fmt;

use chrono::{DateTime, Utc};

use super::{RData, Reader, RecordType, WireError, Writer};
use crate::protocol::{CACHE_FLUSH_BIT, CLASS_IN, FLAG_AUTHORITATIVE, FLAG_RESPONSE, UNICAST_RESPONSE_BIT};

/// Fixed 12-byte message header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    pub flags: u16,
    pub question_count: u16,
    pub answer_count: u16,
    pub authority_count: u16,
    pub additional_count: u16,
}

impl Header {
    pub fn read(reader: &mut Reader<'_>) -> Self {
        Self {
            id: reader.read_u16(),
            flags: reader.read_u16(),
            question_count: reader.read_u16(),
            answer_count: reader.read_u16(),
            authority_count: reader.read_u16(),
            additional_count: reader.read_u16(),
        }
    }

    pub fn write(&self, writer: &mut Writer) {
        writer.write_u16(self.id);
        writer.write_u16(self.flags);
        writer.write_u16(self.question_count);
        writer.write_u16(self.answer_count);
        writer.write_u16(self.authority_count);
        writer.write_u16(self.additional_count);
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAG_RESPONSE != 0
    }

    pub fn is_authoritative(&self) -> bool {
        self.flags & FLAG_AUTHORITATIVE != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub qtype: RecordType,
    /// Raw class, including the mDNS unicast-response bit
    pub qclass: u16,
}

impl Question {
    pub fn new(name: impl Into<String>, qtype: RecordType) -> Self {
        Self {
            name: name.into(),
            qtype,
            qclass: CLASS_IN,
        }
    }

    /// Ask responders to reply by unicast (claims set this).
    pub fn with_unicast_response(mut self) -> Self {
        self.qclass |= UNICAST_RESPONSE_BIT;
        self
    }

    pub fn unicast_response(&self) -> bool {
        self.qclass & UNICAST_RESPONSE_BIT != 0
    }

    pub fn read(reader: &mut Reader<'_>) -> Self {
        Self {
            name: reader.read_domain_name(),
            qtype: RecordType::from_code(reader.read_u16()),
            qclass: reader.read_u16(),
        }
    }

    pub fn write(&self, writer: &mut Writer) -> Result<(), WireError> {
        writer.write_domain_name_compressed(&self.name)?;
        writer.write_u16(self.qtype.code());
        writer.write_u16(self.qclass);
        Ok(())
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} class={:#06x}", self.name, self.qtype, self.qclass)
    }
}

/// One resource record. The type code always comes from the payload, so a
/// record can never claim a type its data does not have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: String,
    /// Class without the cache-flush bit
    pub class: u16,
    pub cache_flush: bool,
    pub ttl: u32,
    pub data: RData,
}

impl ResourceRecord {
    pub fn new(name: impl Into<String>, ttl: u32, data: RData) -> Self {
        Self {
            name: name.into(),
            class: CLASS_IN,
            cache_flush: false,
            ttl,
            data,
        }
    }

    pub fn with_cache_flush(mut self) -> Self {
        self.cache_flush = true;
        self
    }

    pub fn record_type(&self) -> RecordType {
        self.data.record_type()
    }

    /// Parse one record. The cursor always ends exactly `rdlength` bytes past
    /// the start of the payload, whatever the payload decoder consumed.
    pub fn read(reader: &mut Reader<'_>) -> Self {
        let name = reader.read_domain_name();
        let rtype = RecordType::from_code(reader.read_u16());
        let raw_class = reader.read_u16();
        let ttl = reader.read_u32();
        let rdlength = reader.read_u16();

        let start = reader.position();
        let data = RData::read(reader, rtype, rdlength);
        reader.set_position(start + rdlength as usize);

        Self {
            name,
            class: raw_class & !CACHE_FLUSH_BIT,
            cache_flush: raw_class & CACHE_FLUSH_BIT != 0,
            ttl,
            data,
        }
    }

    pub fn write(&self, writer: &mut Writer) -> Result<(), WireError> {
        writer.write_domain_name_compressed(&self.name)?;
        writer.write_u16(self.record_type().code());
        let flush = if self.cache_flush { CACHE_FLUSH_BIT } else { 0 };
        writer.write_u16(self.class | flush);
        writer.write_u32(self.ttl);
        writer.write_length_prefixed(|w| self.data.write(w))
    }
}

impl fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ttl={}", self.name, self.record_type(), self.ttl)?;
        if self.cache_flush {
            f.write_str(" flush")?;
        }
        write!(f, " {}", self.data)
    }
}

/// A complete DNS message, either a request or a response.
///
/// Section counts in `header` reflect what was parsed; when writing, the
/// counts are always taken from the section lengths instead.
#[derive(Debug, Clone)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    pub additionals: Vec<ResourceRecord>,
    pub timestamp: DateTime<Utc>,
    /// Byte length of the datagram this was parsed from, 0 if built locally
    pub size: usize,
}

impl Message {
    fn with_flags(flags: u16) -> Self {
        Self {
            header: Header {
                flags,
                ..Header::default()
            },
            questions: Vec::new(),
            answers: Vec::new(),
            authorities: Vec::new(),
            additionals: Vec::new(),
            timestamp: Utc::now(),
            size: 0,
        }
    }

    pub fn query() -> Self {
        Self::with_flags(0)
    }

    /// Authoritative response, the only kind mDNS responders send.
    pub fn response() -> Self {
        Self::with_flags(FLAG_RESPONSE | FLAG_AUTHORITATIVE)
    }

    /// Parse a datagram. Never fails: truncated input yields zero-filled
    /// fields, and a section stops early once the buffer is exhausted.
    pub fn parse(data: &[u8]) -> Self {
        let mut reader = Reader::new(data);
        let header = Header::read(&mut reader);

        let mut questions = Vec::new();
        for _ in 0..header.question_count {
            if reader.remaining() == 0 {
                break;
            }
            questions.push(Question::read(&mut reader));
        }

        let mut read_section = |count: u16| {
            let mut records = Vec::new();
            for _ in 0..count {
                if reader.remaining() == 0 {
                    break;
                }
                records.push(ResourceRecord::read(&mut reader));
            }
            records
        };
        let answers = read_section(header.answer_count);
        let authorities = read_section(header.authority_count);
        let additionals = read_section(header.additional_count);

        Self {
            header,
            questions,
            answers,
            authorities,
            additionals,
            timestamp: Utc::now(),
            size: data.len(),
        }
    }

    pub fn is_response(&self) -> bool {
        self.header.is_response()
    }

    pub fn is_authoritative(&self) -> bool {
        self.header.is_authoritative()
    }

    /// Every record across the answer, authority and additional sections.
    pub fn records(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.answers
            .iter()
            .chain(self.authorities.iter())
            .chain(self.additionals.iter())
    }

    pub fn write(&self, writer: &mut Writer) -> Result<(), WireError> {
        let header = Header {
            question_count: self.questions.len() as u16,
            answer_count: self.answers.len() as u16,
            authority_count: self.authorities.len() as u16,
            additional_count: self.additionals.len() as u16,
            ..self.header.clone()
        };
        header.write(writer);

        for question in &self.questions {
            question.write(writer)?;
        }
        for record in self.records() {
            record.write(writer)?;
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut writer = Writer::new();
        self.write(&mut writer)?;
        Ok(writer.into_bytes())
    }

    /// Copy of this message with every record's TTL replaced.
    pub fn with_ttl(&self, ttl: u32) -> Self {
        let mut copy = self.clone();
        for record in copy
            .answers
            .iter_mut()
            .chain(copy.authorities.iter_mut())
            .chain(copy.additionals.iter_mut())
        {
            record.ttl = ttl;
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Nsec, Srv};
    use std::net::Ipv4Addr;

    /// Response captured from an AirPlay speaker named "Living Room".
    const LIVING_ROOM: &[u8] = &[
        0x00, 0x00, 0x84, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x05, 0x5f, 0x72, 0x61,
        0x6f, 0x70, 0x04, 0x5f, 0x74, 0x63, 0x70, 0x05, 0x6c, 0x6f, 0x63, 0x61, 0x6c, 0x00, 0x00, 0x0c,
        0x00, 0x01, 0x00, 0x00, 0x11, 0x94, 0x00, 0x1b, 0x18, 0x37, 0x34, 0x35, 0x45, 0x31, 0x43, 0x32,
        0x32, 0x46, 0x41, 0x46, 0x44, 0x40, 0x4c, 0x69, 0x76, 0x69, 0x6e, 0x67, 0x20, 0x52, 0x6f, 0x6f,
        0x6d, 0xc0, 0x0c, 0xc0, 0x28, 0x00, 0x21, 0x80, 0x01, 0x00, 0x00, 0x00, 0x78, 0x00, 0x14, 0x00,
        0x00, 0x00, 0x00, 0x04, 0x00, 0x0b, 0x4c, 0x69, 0x76, 0x69, 0x6e, 0x67, 0x2d, 0x52, 0x6f, 0x6f,
        0x6d, 0xc0, 0x17, 0xc0, 0x28, 0x00, 0x10, 0x80, 0x01, 0x00, 0x00, 0x11, 0x94, 0x00, 0x7a, 0x09,
        0x74, 0x78, 0x74, 0x76, 0x65, 0x72, 0x73, 0x3d, 0x31, 0x04, 0x63, 0x68, 0x3d, 0x32, 0x06, 0x63,
        0x6e, 0x3d, 0x30, 0x2c, 0x31, 0x06, 0x65, 0x74, 0x3d, 0x30, 0x2c, 0x34, 0x08, 0x73, 0x76, 0x3d,
        0x66, 0x61, 0x6c, 0x73, 0x65, 0x07, 0x64, 0x61, 0x3d, 0x74, 0x72, 0x75, 0x65, 0x08, 0x73, 0x72,
        0x3d, 0x34, 0x34, 0x31, 0x30, 0x30, 0x05, 0x73, 0x73, 0x3d, 0x31, 0x36, 0x08, 0x70, 0x77, 0x3d,
        0x66, 0x61, 0x6c, 0x73, 0x65, 0x08, 0x76, 0x6e, 0x3d, 0x36, 0x35, 0x35, 0x33, 0x37, 0x06, 0x74,
        0x70, 0x3d, 0x55, 0x44, 0x50, 0x08, 0x76, 0x73, 0x3d, 0x31, 0x30, 0x33, 0x2e, 0x32, 0x0a, 0x61,
        0x6d, 0x3d, 0x58, 0x57, 0x2d, 0x53, 0x4d, 0x41, 0x34, 0x0f, 0x66, 0x76, 0x3d, 0x73, 0x31, 0x30,
        0x31, 0x30, 0x2e, 0x31, 0x30, 0x30, 0x30, 0x2e, 0x30, 0xc0, 0x55, 0x00, 0x01, 0x80, 0x01, 0x00,
        0x00, 0x00, 0x78, 0x00, 0x04, 0xc0, 0xa8, 0x01, 0x02, 0xc0, 0x28, 0x00, 0x2f, 0x80, 0x01, 0x00,
        0x00, 0x00, 0x78, 0x00, 0x09, 0xc0, 0x28, 0x00, 0x05, 0x00, 0x00, 0x80, 0x00, 0x40, 0xc0, 0x55,
        0x00, 0x2f, 0x80, 0x01, 0x00, 0x00, 0x00, 0x78, 0x00, 0x05, 0xc0, 0x55, 0x00, 0x01, 0x40,
    ];

    const FULL_NAME: &str = "745E1C22FAFD@Living Room._raop._tcp.local.";
    const HOST_NAME: &str = "Living-Room.local.";

    fn check_living_room(message: &Message) {
        assert!(message.is_response());
        assert!(message.is_authoritative());
        assert_eq!(message.questions.len(), 0);
        assert_eq!(message.answers.len(), 1);
        assert_eq!(message.authorities.len(), 0);
        assert_eq!(message.additionals.len(), 5);

        let ptr = &message.answers[0];
        assert_eq!(ptr.name, "_raop._tcp.local.");
        assert_eq!(ptr.ttl, 4500);
        assert!(!ptr.cache_flush);
        assert_eq!(ptr.data, RData::Ptr(FULL_NAME.to_string()));

        let srv = &message.additionals[0];
        assert_eq!(srv.name, FULL_NAME);
        assert!(srv.cache_flush);
        assert_eq!(srv.class, CLASS_IN);
        assert_eq!(srv.data.to_string(), "0 0 1024 Living-Room.local.");

        let txt = &message.additionals[1];
        assert_eq!(txt.name, FULL_NAME);
        let expected = [
            "txtvers=1", "ch=2", "cn=0,1", "et=0,4", "sv=false", "da=true", "sr=44100", "ss=16",
            "pw=false", "vn=65537", "tp=UDP", "vs=103.2", "am=XW-SMA4", "fv=s1010.1000.0",
        ];
        match &txt.data {
            RData::Txt(entries) => assert_eq!(entries, &expected),
            other => panic!("expected TXT, found {:?}", other),
        }

        let a = &message.additionals[2];
        assert_eq!(a.name, HOST_NAME);
        assert_eq!(a.data, RData::A(Ipv4Addr::new(192, 168, 1, 2)));

        let nsec = &message.additionals[3];
        assert_eq!(nsec.name, FULL_NAME);
        assert_eq!(nsec.data, RData::Nsec(Nsec::new(FULL_NAME, [RecordType::Txt, RecordType::Srv])));

        let host_nsec = &message.additionals[4];
        assert_eq!(host_nsec.name, HOST_NAME);
        assert_eq!(host_nsec.data.to_string(), "Living-Room.local. [A]");
    }

    #[test]
    fn test_parse_captured_response() {
        let message = Message::parse(LIVING_ROOM);
        assert_eq!(message.size, LIVING_ROOM.len());
        check_living_room(&message);
    }

    #[test]
    fn test_captured_response_survives_reencoding() {
        let original = Message::parse(LIVING_ROOM);
        let data = original.encode().unwrap();
        let copy = Message::parse(&data);
        check_living_room(&copy);
    }

    #[test]
    fn test_truncated_packets_never_panic() {
        for len in 0..LIVING_ROOM.len() {
            let message = Message::parse(&LIVING_ROOM[..len]);
            assert!(message.answers.len() <= 1);
            assert!(message.additionals.len() <= 5);
        }
    }

    #[test]
    fn test_garbage_counts_stop_at_end_of_buffer() {
        let data = [0x00, 0x00, 0x84, 0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff];
        let message = Message::parse(&data);
        assert!(message.questions.is_empty());
        assert!(message.answers.is_empty());
    }

    #[test]
    fn test_parse_lutron_response() {
        let data: &[u8] = &[
            0x00, 0x00, 0x84, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x0f, 0x6c, 0x75, 0x74,
            0x72, 0x6f, 0x6e, 0x2d, 0x30, 0x33, 0x32, 0x65, 0x64, 0x33, 0x38, 0x63, 0x05, 0x6c, 0x6f, 0x63,
            0x61, 0x6c, 0x00, 0x00, 0x01, 0x80, 0x01, 0x00, 0x00, 0x00, 0x78, 0x00, 0x04, 0xc0, 0xa8, 0x04,
            0x47, 0x0d, 0x4c, 0x75, 0x74, 0x72, 0x6f, 0x6e, 0x20, 0x53, 0x74, 0x61, 0x74, 0x75, 0x73, 0x07,
            0x5f, 0x6c, 0x75, 0x74, 0x72, 0x6f, 0x6e, 0x04, 0x5f, 0x74, 0x63, 0x70, 0xc0, 0x1c, 0x00, 0x2f,
            0x80, 0x01, 0x00, 0x00, 0x11, 0x94, 0x00, 0x09, 0xc0, 0x2a, 0x00, 0x05, 0x00, 0x00, 0x80, 0x00,
            0x40,
        ];
        let message = Message::parse(data);
        assert_eq!(message.answers.len(), 2, "two complete records before the capture was cut");
        assert_eq!(message.answers[0].name, "lutron-032ed38c.local.");
        assert_eq!(message.answers[0].data, RData::A(Ipv4Addr::new(192, 168, 4, 71)));
        assert_eq!(message.answers[1].name, "Lutron Status._lutron._tcp.local.");
        assert_eq!(message.answers[1].record_type(), RecordType::Nsec);
    }

    #[test]
    fn test_counts_recomputed_on_write() {
        let mut message = Message::response();
        message.header.answer_count = 42;
        message.answers.push(ResourceRecord::new(
            "_http._tcp.local.",
            4500,
            RData::Ptr("web._http._tcp.local.".to_string()),
        ));
        message.additionals.push(
            ResourceRecord::new(
                "web._http._tcp.local.",
                120,
                RData::Srv(Srv {
                    priority: 0,
                    weight: 0,
                    port: 80,
                    target: "web.local.".to_string(),
                }),
            )
            .with_cache_flush(),
        );

        let copy = Message::parse(&message.encode().unwrap());
        assert_eq!(copy.header.answer_count, 1);
        assert_eq!(copy.header.additional_count, 1);
        assert_eq!(copy.answers, message.answers);
        assert_eq!(copy.additionals, message.additionals);
    }

    #[test]
    fn test_question_round_trip() {
        let mut message = Message::query();
        message
            .questions
            .push(Question::new("Office._raop._tcp.local.", RecordType::Any).with_unicast_response());
        let copy = Message::parse(&message.encode().unwrap());
        assert!(!copy.is_response());
        assert_eq!(copy.questions, message.questions);
        assert!(copy.questions[0].unicast_response());
    }

    #[test]
    fn test_with_ttl_rewrites_every_section() {
        let mut message = Message::response();
        let record = ResourceRecord::new("h.local.", 120, RData::A(Ipv4Addr::new(10, 0, 0, 1)));
        message.answers.push(record.clone());
        message.authorities.push(record.clone());
        message.additionals.push(record);

        let goodbye = message.with_ttl(0);
        assert!(goodbye.records().all(|r| r.ttl == 0));
        assert!(message.records().all(|r| r.ttl == 120));
    }
}
