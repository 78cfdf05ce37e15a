use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use super::{Reader, WireError, Writer};

/// Resource record type codes that mDNS traffic commonly carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Ns,
    Cname,
    Soa,
    Ptr,
    Hinfo,
    Mx,
    Txt,
    Aaaa,
    Srv,
    Opt,
    Nsec,
    Any,
    Other(u16),
}

impl RecordType {
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => Self::A,
            2 => Self::Ns,
            5 => Self::Cname,
            6 => Self::Soa,
            12 => Self::Ptr,
            13 => Self::Hinfo,
            15 => Self::Mx,
            16 => Self::Txt,
            28 => Self::Aaaa,
            33 => Self::Srv,
            41 => Self::Opt,
            47 => Self::Nsec,
            255 => Self::Any,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Self::A => 1,
            Self::Ns => 2,
            Self::Cname => 5,
            Self::Soa => 6,
            Self::Ptr => 12,
            Self::Hinfo => 13,
            Self::Mx => 15,
            Self::Txt => 16,
            Self::Aaaa => 28,
            Self::Srv => 33,
            Self::Opt => 41,
            Self::Nsec => 47,
            Self::Any => 255,
            Self::Other(code) => code,
        }
    }
}

impl PartialOrd for RecordType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RecordType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.code().cmp(&other.code())
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => f.write_str("A"),
            Self::Ns => f.write_str("NS"),
            Self::Cname => f.write_str("CNAME"),
            Self::Soa => f.write_str("SOA"),
            Self::Ptr => f.write_str("PTR"),
            Self::Hinfo => f.write_str("HINFO"),
            Self::Mx => f.write_str("MX"),
            Self::Txt => f.write_str("TXT"),
            Self::Aaaa => f.write_str("AAAA"),
            Self::Srv => f.write_str("SRV"),
            Self::Opt => f.write_str("OPT"),
            Self::Nsec => f.write_str("NSEC"),
            Self::Any => f.write_str("ANY"),
            Self::Other(code) => write!(f, "TYPE{}", code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Srv {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nsec {
    pub next_domain: String,
    pub types: BTreeSet<RecordType>,
}

impl Nsec {
    pub fn new(next_domain: impl Into<String>, types: impl IntoIterator<Item = RecordType>) -> Self {
        Self {
            next_domain: next_domain.into(),
            types: types.into_iter().collect(),
        }
    }

    /// Decode the RFC 4034 type bitmap that follows the next domain name.
    fn read_bitmaps(reader: &mut Reader<'_>, end: usize) -> BTreeSet<RecordType> {
        let mut types = BTreeSet::new();
        while reader.position() < end {
            let window = reader.read_u8() as u16;
            let len = reader.read_u8() as usize;
            for index in 0..len.min(32) {
                let byte = reader.read_u8();
                for bit in 0..8u16 {
                    if byte & (0x80 >> bit) != 0 {
                        let code = (window << 8) | (index as u16 * 8 + bit);
                        types.insert(RecordType::from_code(code));
                    }
                }
            }
        }
        types
    }

    fn write_bitmaps(&self, writer: &mut Writer) {
        let mut windows: Vec<(u8, Vec<u8>)> = Vec::new();
        for rtype in &self.types {
            let code = rtype.code();
            let window = (code >> 8) as u8;
            let low = (code & 0xff) as usize;
            if windows.last().map(|(w, _)| *w) != Some(window) {
                windows.push((window, Vec::new()));
            }
            if let Some((_, bitmap)) = windows.last_mut() {
                if bitmap.len() <= low / 8 {
                    bitmap.resize(low / 8 + 1, 0);
                }
                bitmap[low / 8] |= 0x80 >> (low % 8);
            }
        }
        for (window, bitmap) in windows {
            writer.write_u8(window);
            writer.write_u8(bitmap.len() as u8);
            writer.write_bytes(&bitmap);
        }
    }
}

/// Type-specific payload of a resource record.
///
/// `Unknown` keeps the undecoded bytes of any type not listed here, so
/// nothing received is ever dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ptr(String),
    Srv(Srv),
    Txt(Vec<String>),
    Nsec(Nsec),
    Unknown { rtype: u16, data: Vec<u8> },
}

impl RData {
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::A(_) => RecordType::A,
            Self::Aaaa(_) => RecordType::Aaaa,
            Self::Ptr(_) => RecordType::Ptr,
            Self::Srv(_) => RecordType::Srv,
            Self::Txt(_) => RecordType::Txt,
            Self::Nsec(_) => RecordType::Nsec,
            Self::Unknown { rtype, .. } => RecordType::from_code(*rtype),
        }
    }

    /// Build a TXT payload of `key=value` strings, preserving iteration order.
    pub fn txt<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::Txt(
            pairs
                .into_iter()
                .map(|(k, v)| format!("{}={}", k.as_ref(), v.as_ref()))
                .collect(),
        )
    }

    /// Decode `rdlength` bytes of payload for `rtype` starting at the cursor.
    pub fn read(reader: &mut Reader<'_>, rtype: RecordType, rdlength: u16) -> Self {
        let end = reader.position() + rdlength as usize;
        match rtype {
            RecordType::A => {
                let octets = [reader.read_u8(), reader.read_u8(), reader.read_u8(), reader.read_u8()];
                Self::A(Ipv4Addr::from(octets))
            }
            RecordType::Aaaa => {
                let mut groups = [0u16; 8];
                for group in groups.iter_mut() {
                    *group = reader.read_u16();
                }
                Self::Aaaa(Ipv6Addr::from(groups))
            }
            RecordType::Ptr => Self::Ptr(reader.read_domain_name()),
            RecordType::Srv => Self::Srv(Srv {
                priority: reader.read_u16(),
                weight: reader.read_u16(),
                port: reader.read_u16(),
                target: reader.read_domain_name(),
            }),
            RecordType::Txt => {
                let mut entries = Vec::new();
                while reader.position() < end {
                    entries.push(reader.read_string());
                }
                // A lone empty string is how an empty TXT goes on the wire
                if entries.len() == 1 && entries[0].is_empty() {
                    entries.clear();
                }
                Self::Txt(entries)
            }
            RecordType::Nsec => {
                let next_domain = reader.read_domain_name();
                let types = Nsec::read_bitmaps(reader, end);
                Self::Nsec(Nsec { next_domain, types })
            }
            other => Self::Unknown {
                rtype: other.code(),
                data: reader.read_bytes(rdlength as usize),
            },
        }
    }

    /// Encode the payload only; the enclosing record supplies the length.
    pub fn write(&self, writer: &mut Writer) -> Result<(), WireError> {
        match self {
            Self::A(addr) => writer.write_bytes(&addr.octets()),
            Self::Aaaa(addr) => {
                for group in addr.segments() {
                    writer.write_u16(group);
                }
            }
            Self::Ptr(target) => writer.write_domain_name_compressed(target)?,
            Self::Srv(srv) => {
                writer.write_u16(srv.priority);
                writer.write_u16(srv.weight);
                writer.write_u16(srv.port);
                writer.write_domain_name_compressed(&srv.target)?;
            }
            Self::Txt(entries) if entries.is_empty() => writer.write_u8(0),
            Self::Txt(entries) => {
                for entry in entries {
                    writer.write_string(entry)?;
                }
            }
            Self::Nsec(nsec) => {
                writer.write_domain_name_compressed(&nsec.next_domain)?;
                nsec.write_bitmaps(writer);
            }
            Self::Unknown { data, .. } => writer.write_bytes(data),
        }
        Ok(())
    }
}

impl fmt::Display for RData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A(addr) => write!(f, "{}", addr),
            Self::Aaaa(addr) => {
                let groups: Vec<String> = addr.segments().iter().map(|g| format!("{:x}", g)).collect();
                f.write_str(&groups.join(":"))
            }
            Self::Ptr(target) => f.write_str(target),
            Self::Srv(srv) => write!(f, "{} {} {} {}", srv.priority, srv.weight, srv.port, srv.target),
            Self::Txt(entries) => write!(f, "[{}]", entries.join(", ")),
            Self::Nsec(nsec) => {
                let types: Vec<String> = nsec.types.iter().map(|t| t.to_string()).collect();
                write!(f, "{} [{}]", nsec.next_domain, types.join(", "))
            }
            Self::Unknown { data, .. } => {
                let bytes: Vec<String> = data.iter().map(|b| format!("{:02x}", b)).collect();
                write!(f, "[{}]", bytes.join(" "))
            }
        }
    }
}
