use super::WireError;

/// Compression pointers carry 14 bits of offset.
const MAX_POINTER_OFFSET: usize = 0x3fff;

const MAX_LABEL_LEN: usize = 63;

/// Character-strings whose length byte would collide with the pointer escape
/// are refused.
const MAX_STRING_LEN: usize = 0xbf;

/// Append-only accumulator for one outgoing DNS message.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buffer: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Write one length-prefixed character-string.
    pub fn write_string(&mut self, text: &str) -> Result<(), WireError> {
        let data = text.as_bytes();
        if data.len() > MAX_STRING_LEN {
            return Err(WireError::StringTooLong(data.len()));
        }
        self.buffer.push(data.len() as u8);
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Write a domain name as a literal label sequence.
    pub fn write_domain_name_uncompressed(&mut self, name: &str) -> Result<(), WireError> {
        for label in split_labels(name)? {
            self.buffer.push(label.len() as u8);
            self.buffer.extend_from_slice(label);
        }
        self.buffer.push(0);
        Ok(())
    }

    /// Write a domain name, replacing the longest already-written tail with a
    /// compression pointer.
    ///
    /// Labels are emitted one at a time; before each one the buffer is
    /// scanned from the start for the earliest offset whose bytes decode to
    /// exactly the remaining labels. Only bytes already written are
    /// candidates, so a pointer never refers forward.
    pub fn write_domain_name_compressed(&mut self, name: &str) -> Result<(), WireError> {
        let labels = split_labels(name)?;

        for index in 0..labels.len() {
            if let Some(offset) = self.find_tail(&labels[index..]) {
                self.buffer.push(0xc0 | (offset >> 8) as u8);
                self.buffer.push(offset as u8);
                return Ok(());
            }
            let label = labels[index];
            self.buffer.push(label.len() as u8);
            self.buffer.extend_from_slice(label);
        }

        self.buffer.push(0);
        Ok(())
    }

    /// Reserve a two-byte length, let `body` write the payload, then backpatch
    /// the length with the number of bytes actually written.
    pub fn write_length_prefixed<F>(&mut self, body: F) -> Result<(), WireError>
    where
        F: FnOnce(&mut Self) -> Result<(), WireError>,
    {
        let front = self.buffer.len();
        self.buffer.extend_from_slice(&[0, 0]);

        body(self)?;

        let len = self.buffer.len() - front - 2;
        if len > u16::MAX as usize {
            self.buffer.truncate(front);
            return Err(WireError::RecordTooLong(len));
        }
        self.buffer[front..front + 2].copy_from_slice(&(len as u16).to_be_bytes());
        Ok(())
    }

    fn find_tail(&self, labels: &[&[u8]]) -> Option<usize> {
        let limit = self.buffer.len().min(MAX_POINTER_OFFSET + 1);
        (0..limit).find(|&position| self.tail_matches(position, labels))
    }

    /// Does the name encoded at `position` consist of exactly `labels`?
    /// A reader arrives here through a pointer to `position`, so every jump
    /// inside must land before it.
    fn tail_matches(&self, mut position: usize, labels: &[&[u8]]) -> bool {
        let mut floor = position;
        let mut remaining = labels.iter();
        loop {
            let Some(&len) = self.buffer.get(position) else {
                return false;
            };
            if len & 0xc0 == 0xc0 {
                let Some(&lo) = self.buffer.get(position + 1) else {
                    return false;
                };
                let target = ((len as usize & 0x3f) << 8) | lo as usize;
                if target >= floor.min(position) {
                    return false;
                }
                floor = target;
                position = target;
                continue;
            }
            if len & 0xc0 != 0 {
                return false;
            }
            match remaining.next() {
                None => return len == 0,
                Some(label) => {
                    let start = position + 1;
                    let end = start + len as usize;
                    if len as usize != label.len() || self.buffer.get(start..end) != Some(*label) {
                        return false;
                    }
                    position = end;
                }
            }
        }
    }
}

fn split_labels(name: &str) -> Result<Vec<&[u8]>, WireError> {
    name.split('.')
        .filter(|label| !label.is_empty())
        .map(|label| {
            if label.len() > MAX_LABEL_LEN {
                Err(WireError::LabelTooLong {
                    label: label.to_string(),
                    len: label.len(),
                })
            } else {
                Ok(label.as_bytes())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::reader::Reader;

    #[test]
    fn test_compresses_common_tail() {
        let mut writer = Writer::new();
        writer.write_u16(0x1234);
        let first = writer.len();
        assert_eq!(first, 2);

        writer.write_domain_name_compressed("bunny.example.com.").unwrap();
        let second = writer.len();
        assert_eq!(second - first, 19, "1+5 bunny, 1+7 example, 1+3 com, terminator");

        writer.write_domain_name_compressed("fluffy.bunny.example.com.").unwrap();
        let expected = [6, b'f', b'l', b'u', b'f', b'f', b'y', 0xc0, first as u8];
        assert_eq!(&writer.as_bytes()[second..], &expected);
    }

    #[test]
    fn test_compresses_through_earlier_pointer() {
        let mut writer = Writer::new();
        writer.write_domain_name_compressed("a.example.com.").unwrap();
        writer.write_domain_name_compressed("b.example.com.").unwrap();
        let third = writer.len();
        // "b.example.com." is only present as "b" + pointer; it must still match
        writer.write_domain_name_compressed("x.b.example.com.").unwrap();

        assert_eq!(writer.len() - third, 4);
        let mut reader = Reader::at(writer.as_bytes(), third);
        assert_eq!(reader.read_domain_name(), "x.b.example.com.");
    }

    #[test]
    fn test_skips_tail_the_reader_would_not_follow() {
        // At 0: label "\x01b\x00" then a pointer back to offset 1, where
        // "b." is hidden inside that label
        let mut writer = Writer::new();
        writer.write_bytes(&[3, 1, b'b', 0, 0xc0, 0x01]);
        let start = writer.len();

        let name = "\u{1}b\u{0}.b.";
        writer.write_domain_name_compressed(name).unwrap();
        assert_ne!(&writer.as_bytes()[start..], &[0xc0, 0x00]);

        let mut reader = Reader::at(writer.as_bytes(), start);
        assert_eq!(reader.read_domain_name(), name);
    }

    #[test]
    fn test_identical_name_becomes_single_pointer() {
        let mut writer = Writer::new();
        writer.write_domain_name_compressed("_raop._tcp.local.").unwrap();
        let second = writer.len();
        writer.write_domain_name_compressed("_raop._tcp.local").unwrap();
        assert_eq!(&writer.as_bytes()[second..], &[0xc0, 0x00]);
    }

    #[test]
    fn test_root_name_is_single_zero() {
        let mut writer = Writer::new();
        writer.write_domain_name_compressed(".").unwrap();
        assert_eq!(writer.as_bytes(), &[0]);
    }

    #[test]
    fn test_label_length_limit() {
        let ok = format!("{}.local.", "a".repeat(63));
        let too_long = format!("{}.local.", "a".repeat(64));

        let mut writer = Writer::new();
        assert!(writer.write_domain_name_compressed(&ok).is_ok());
        assert!(matches!(
            writer.write_domain_name_compressed(&too_long),
            Err(WireError::LabelTooLong { len: 64, .. })
        ));
        assert!(writer.write_domain_name_uncompressed(&too_long).is_err());
    }

    #[test]
    fn test_string_length_limit() {
        let mut writer = Writer::new();
        assert!(writer.write_string(&"x".repeat(0xbf)).is_ok());
        assert!(matches!(
            writer.write_string(&"x".repeat(0xc0)),
            Err(WireError::StringTooLong(0xc0))
        ));
    }

    #[test]
    fn test_length_prefix_backpatch() {
        let mut writer = Writer::new();
        writer.write_u8(0xff);
        writer
            .write_length_prefixed(|w| {
                w.write_u32(7);
                w.write_string("abc")
            })
            .unwrap();
        assert_eq!(writer.as_bytes(), &[0xff, 0, 8, 0, 0, 0, 7, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_oversized_record_fails() {
        let mut writer = Writer::new();
        let result = writer.write_length_prefixed(|w| {
            w.write_bytes(&vec![0u8; 0x10000]);
            Ok(())
        });
        assert!(matches!(result, Err(WireError::RecordTooLong(0x10000))));
        assert!(writer.is_empty());
    }
}
