//! DNS wire format as used by multicast DNS: a bounds-safe reader, a
//! compressing writer, the closed set of record payloads, and messages.

pub mod message;
pub mod reader;
pub mod record;
pub mod writer;

use thiserror::Error;

pub use message::{Header, Message, Question, ResourceRecord};
pub use reader::Reader;
pub use record::{Nsec, RData, RecordType, Srv};
pub use writer::Writer;

/// Encode-time failures. Decoding never fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("label [{label}] is {len} bytes, longer than 63")]
    LabelTooLong { label: String, len: usize },
    #[error("character-string of {0} bytes is too long")]
    StringTooLong(usize),
    #[error("record data of {0} bytes does not fit a 16-bit length")]
    RecordTooLong(usize),
}
