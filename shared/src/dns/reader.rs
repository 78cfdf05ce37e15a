/// Sequential big-endian reader over one received datagram.
///
/// Every read is bounds-safe: reading past the end of the buffer yields zero
/// instead of failing, so a truncated or malformed packet never aborts
/// decoding. Callers must treat everything decoded here as untrusted.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn at(data: &'a [u8], position: usize) -> Self {
        Self { data, position }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn set_position(&mut self, position: usize) {
        self.position = position;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left between the cursor and the end of the buffer
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    pub fn read_u8(&mut self) -> u8 {
        let value = self.data.get(self.position).copied().unwrap_or(0);
        self.position += 1;
        value
    }

    pub fn read_u16(&mut self) -> u16 {
        let hi = self.read_u8() as u16;
        let lo = self.read_u8() as u16;
        (hi << 8) | lo
    }

    pub fn read_u32(&mut self) -> u32 {
        let hi = self.read_u16() as u32;
        let lo = self.read_u16() as u32;
        (hi << 16) | lo
    }

    pub fn read_bytes(&mut self, count: usize) -> Vec<u8> {
        (0..count).map(|_| self.read_u8()).collect()
    }

    /// Read one length-prefixed character-string.
    pub fn read_string(&mut self) -> String {
        let len = self.read_u8() as usize;
        let bytes = self.read_bytes(len);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Read a domain name, following RFC1035 compression pointers.
    ///
    /// Labels are joined with `.` and every name ends with a trailing `.`,
    /// so the root name reads as `"."`. A pointer is only followed when it
    /// targets an offset before the pointer itself and before every offset
    /// already jumped to; any other pointer ends the name, so jump targets
    /// strictly decrease and decoding always terminates.
    pub fn read_domain_name(&mut self) -> String {
        let mut name: Vec<u8> = Vec::new();
        let mut cursor = self.position;
        let mut resume: Option<usize> = None;
        let mut floor = usize::MAX;

        loop {
            let len = self.data.get(cursor).copied().unwrap_or(0);
            if len & 0xc0 == 0xc0 {
                let lo = self.data.get(cursor + 1).copied().unwrap_or(0) as usize;
                let target = ((len as usize & 0x3f) << 8) | lo;
                if resume.is_none() {
                    resume = Some(cursor + 2);
                }
                if target >= floor.min(cursor) {
                    break;
                }
                floor = target;
                cursor = target;
                continue;
            }

            cursor += 1;
            if len == 0 {
                break;
            }
            for offset in 0..len as usize {
                name.push(self.data.get(cursor + offset).copied().unwrap_or(0));
            }
            name.push(b'.');
            cursor += len as usize;
        }

        self.position = resume.unwrap_or(cursor);

        if name.is_empty() {
            return ".".to_string();
        }
        String::from_utf8_lossy(&name).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_past_end_yield_zero() {
        let data = [0x12];
        let mut reader = Reader::new(&data);

        assert_eq!(reader.read_u16(), 0x1200);
        assert_eq!(reader.read_u32(), 0);
        assert_eq!(reader.read_bytes(3), vec![0, 0, 0]);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_big_endian_integers() {
        let data = [0x01, 0x02, 0xde, 0xad, 0xbe, 0xef];
        let mut reader = Reader::new(&data);

        assert_eq!(reader.read_u16(), 0x0102);
        assert_eq!(reader.read_u32(), 0xdeadbeef);
    }

    #[test]
    fn test_root_name() {
        let data = [0u8];
        let mut reader = Reader::new(&data);
        assert_eq!(reader.read_domain_name(), ".");
        assert_eq!(reader.position(), 1);
    }

    #[test]
    fn test_follows_backward_pointer() {
        // "example.com." at 0, then "www" + pointer to 0
        let mut data = vec![7];
        data.extend_from_slice(b"example");
        data.push(3);
        data.extend_from_slice(b"com");
        data.push(0);
        let second = data.len();
        data.push(3);
        data.extend_from_slice(b"www");
        data.extend_from_slice(&[0xc0, 0x00]);
        data.push(0xaa);

        let mut reader = Reader::at(&data, second);
        assert_eq!(reader.read_domain_name(), "www.example.com.");
        // cursor lands just after the pointer, not inside the target
        assert_eq!(reader.read_u8(), 0xaa);
    }

    #[test]
    fn test_self_pointer_terminates() {
        let data = [3, b'a', b'b', b'c', 0xc0, 0x04];
        let mut reader = Reader::new(&data);
        assert_eq!(reader.read_domain_name(), "abc.");
        assert_eq!(reader.position(), 6);
    }

    #[test]
    fn test_backward_pointer_loop_terminates() {
        // label "a" at 0, then a pointer at 2 back to 0, which reaches itself again
        let data = [1, b'a', 0xc0, 0x00];
        let mut reader = Reader::at(&data, 2);
        assert_eq!(reader.read_domain_name(), "a.");
        assert_eq!(reader.position(), 4);
    }

    #[test]
    fn test_forward_pointer_terminates() {
        let data = [0xc0, 0x02, 1, b'x', 0];
        let mut reader = Reader::new(&data);
        assert_eq!(reader.read_domain_name(), ".");
        assert_eq!(reader.position(), 2);
    }

    #[test]
    fn test_truncated_label_reads_zero_bytes() {
        let data = [5, b'a', b'b'];
        let mut reader = Reader::new(&data);
        assert_eq!(reader.read_domain_name(), "ab\0\0\0.");
    }

    #[test]
    fn test_read_string() {
        let data = [4, b's', b'r', b'=', b'1', 0];
        let mut reader = Reader::new(&data);
        assert_eq!(reader.read_string(), "sr=1");
        assert_eq!(reader.read_string(), "");
    }
}
