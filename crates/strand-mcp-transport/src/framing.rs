//! Newline-delimited framing.
//!
//! One message per line, UTF-8, `\n` terminated. The reader side keeps an
//! append-only byte buffer: partial reads accumulate until a `\n` arrives,
//! a trailing `\r` is stripped, and empty lines are skipped. Bytes left
//! unterminated at end-of-input are discarded by dropping the buffer.

use bytes::Bytes;

/// Incremental line splitter for the stdio reader
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk read from the input
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Split out the next complete, non-empty line, if any
    pub fn next_line(&mut self) -> Option<Bytes> {
        loop {
            let newline = self.buf.iter().position(|&b| b == b'\n')?;
            let mut line: Vec<u8> = self.buf.drain(..=newline).collect();
            line.pop(); // the \n itself
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.is_empty() {
                continue;
            }
            return Some(Bytes::from(line));
        }
    }

    /// Bytes still waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(buffer: &mut LineBuffer) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = buffer.next_line() {
            lines.push(String::from_utf8(line.to_vec()).unwrap());
        }
        lines
    }

    #[test]
    fn test_two_messages() {
        let mut buffer = LineBuffer::new();
        buffer.extend(b"{\"id\":1}\n{\"id\":2}\n");
        assert_eq!(drain(&mut buffer), vec!["{\"id\":1}", "{\"id\":2}"]);
    }

    #[test]
    fn test_empty_lines_skipped() {
        let mut buffer = LineBuffer::new();
        buffer.extend(b"\n\n{\"id\":1}\n\n\n{\"id\":2}\n\n");
        assert_eq!(drain(&mut buffer), vec!["{\"id\":1}", "{\"id\":2}"]);
    }

    #[test]
    fn test_partial_message_held_back() {
        let mut buffer = LineBuffer::new();
        buffer.extend(b"{\"id\":1}\n{\"id\":2");
        assert_eq!(drain(&mut buffer), vec!["{\"id\":1}"]);
        // trailing partial stays pending; dropped at end-of-input
        assert_eq!(buffer.pending(), 7);

        buffer.extend(b"}\n");
        assert_eq!(drain(&mut buffer), vec!["{\"id\":2}"]);
    }

    #[test]
    fn test_crlf_stripped() {
        let mut buffer = LineBuffer::new();
        buffer.extend(b"{\"id\":1}\r\n");
        assert_eq!(drain(&mut buffer), vec!["{\"id\":1}"]);
    }

    #[test]
    fn test_split_across_chunks() {
        let mut buffer = LineBuffer::new();
        buffer.extend(b"{\"id\"");
        assert!(buffer.next_line().is_none());
        buffer.extend(b":1}\n");
        assert_eq!(drain(&mut buffer), vec!["{\"id\":1}"]);
    }
}
