//! Line framing for the inbound byte stream.
//!
//! The transport hands over arbitrary chunks; only complete `\n`-terminated
//! lines leave this buffer, with the `\r` removed and invalid UTF-8
//! replaced rather than rejected.

/// Largest partial line kept while waiting for its terminator.
pub const MAX_PENDING: usize = 64 * 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("partial line exceeded {MAX_PENDING} bytes without a terminator")]
pub struct Overflow;

/// Accumulates bytes and yields complete lines in arrival order.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    ///
    /// Blank lines are skipped. Fails when the unterminated remainder grows
    /// past [`MAX_PENDING`]; the buffer is cleared in that case.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, Overflow> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let raw = &self.pending[start..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = String::from_utf8_lossy(raw);
            if !line.trim().is_empty() {
                lines.push(line.into_owned());
            }
            start = end + 1;
        }
        self.pending.drain(..start);

        if self.pending.len() > MAX_PENDING {
            self.pending.clear();
            return Err(Overflow);
        }
        Ok(lines)
    }

    /// Bytes waiting for a line terminator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_and_strips_cr() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"PING :a\r\nPING :b\n").unwrap();
        assert_eq!(lines, vec!["PING :a", "PING :b"]);
        assert_eq!(buf.pending_len(), 0);
    }

    #[test]
    fn keeps_partial_lines_until_complete() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b":srv 001 me :Wel").unwrap().is_empty());
        assert!(buf.push(b"come\r").unwrap().is_empty());
        assert_eq!(buf.push(b"\n:srv 002").unwrap(), vec![":srv 001 me :Welcome"]);
        assert_eq!(buf.pending_len(), 8);
    }

    #[test]
    fn skips_blank_lines() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push(b"\r\n  \r\nPING x\r\n").unwrap(), vec!["PING x"]);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"PRIVMSG #c :caf\xe9 ok\r\n").unwrap();
        assert_eq!(lines, vec!["PRIVMSG #c :caf\u{FFFD} ok"]);
    }

    #[test]
    fn multibyte_char_split_across_chunks() {
        let mut buf = LineBuffer::new();
        let bytes = "PRIVMSG #c :é\r\n".as_bytes();
        let split = bytes.len() - 3;
        assert!(buf.push(&bytes[..split]).unwrap().is_empty());
        assert_eq!(buf.push(&bytes[split..]).unwrap(), vec!["PRIVMSG #c :é"]);
    }

    #[test]
    fn oversized_partial_line_overflows() {
        let mut buf = LineBuffer::new();
        let junk = vec![b'a'; MAX_PENDING + 1];
        assert_eq!(buf.push(&junk), Err(Overflow));
        assert_eq!(buf.pending_len(), 0);
    }
}
