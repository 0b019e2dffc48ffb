//! Server-Sent Events framing.
//!
//! The server writes events as `id: <event-id>\ndata: <json>\n\n`, with an
//! optional `retry: <ms>\n` line advising the client's reconnection delay.
//! The parser accumulates lines until a blank line, joins repeated `data:`
//! fields with `\n`, tolerates a single leading space after the colon, and
//! accepts CRLF endings. An event whose data is empty is a *priming*
//! event: its id anchors resumption but no message is yielded.

/// One SSE event, parsed or ready to serialize
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SseEvent {
    /// Event id for resumability (`Last-Event-ID`)
    pub id: Option<String>,
    /// Joined data payload; `None` when the event carried no data field
    pub data: Option<String>,
    /// Suggested client reconnection delay in milliseconds
    pub retry: Option<u64>,
}

impl SseEvent {
    /// An event carrying one JSON message
    pub fn message(id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            data: Some(data.into()),
            retry: None,
        }
    }

    /// A priming event: id only, empty data, never replayed as a message
    pub fn priming(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            data: Some(String::new()),
            retry: None,
        }
    }

    pub fn with_retry(mut self, retry_ms: u64) -> Self {
        self.retry = Some(retry_ms);
        self
    }

    /// Whether this event carries a deliverable message
    pub fn is_message(&self) -> bool {
        self.data.as_deref().map(|d| !d.is_empty()).unwrap_or(false)
    }

    /// Serialize to the wire format, terminated by the blank line
    pub fn format(&self) -> String {
        let mut out = String::new();
        if let Some(retry) = self.retry {
            out.push_str(&format!("retry: {}\n", retry));
        }
        if let Some(id) = &self.id {
            out.push_str(&format!("id: {}\n", id));
        }
        match &self.data {
            Some(data) if !data.is_empty() => {
                for line in data.split('\n') {
                    out.push_str(&format!("data: {}\n", line));
                }
            }
            _ => out.push_str("data: \n"),
        }
        out.push('\n');
        out
    }
}

/// SSE comment line used as a keep-alive; carries no fields at all
pub fn keepalive_comment() -> &'static str {
    ": keepalive\n\n"
}

/// Incremental SSE parser.
///
/// Feed it raw body chunks; it yields complete events as blank lines
/// arrive. Field lines it does not know (`event:`, comments) are ignored.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    current_id: Option<String>,
    current_data: Vec<String>,
    current_retry: Option<u64>,
    saw_field: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk and collect any events completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let mut line: String = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                if let Some(event) = self.finish_event() {
                    events.push(event);
                }
                continue;
            }
            self.parse_line(&line);
        }
        events
    }

    fn parse_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return; // comment / keep-alive
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                self.current_data.push(value.to_string());
                self.saw_field = true;
            }
            "id" => {
                self.current_id = Some(value.to_string());
                self.saw_field = true;
            }
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.current_retry = Some(ms);
                }
                self.saw_field = true;
            }
            _ => {
                // `event:` and unknown fields are tolerated and dropped
                self.saw_field = true;
            }
        }
    }

    fn finish_event(&mut self) -> Option<SseEvent> {
        if !self.saw_field {
            return None;
        }
        let data = if self.current_data.is_empty() {
            None
        } else {
            Some(self.current_data.join("\n"))
        };
        let event = SseEvent {
            id: self.current_id.take(),
            data,
            retry: self.current_retry.take(),
        };
        self.current_data.clear();
        self.saw_field = false;
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_message_event() {
        let event = SseEvent::message("7", "{\"jsonrpc\":\"2.0\"}");
        assert_eq!(event.format(), "id: 7\ndata: {\"jsonrpc\":\"2.0\"}\n\n");
    }

    #[test]
    fn test_format_priming_event_with_retry() {
        let event = SseEvent::priming("1").with_retry(1500);
        assert_eq!(event.format(), "retry: 1500\nid: 1\ndata: \n\n");
        assert!(!event.is_message());
    }

    #[test]
    fn test_parse_single_event() {
        let mut parser = SseParser::new();
        let events = parser.push(b"id: 3\ndata: {\"x\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id.as_deref(), Some("3"));
        assert_eq!(events[0].data.as_deref(), Some("{\"x\":1}"));
        assert!(events[0].is_message());
    }

    #[test]
    fn test_parse_multiple_data_lines_joined() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: {\ndata:   \"x\": 1\ndata: }\n\n");
        assert_eq!(events[0].data.as_deref(), Some("{\n  \"x\": 1\n}"));
    }

    #[test]
    fn test_parse_crlf_and_leading_space() {
        let mut parser = SseParser::new();
        let events = parser.push(b"id: 9\r\ndata: hello\r\n\r\n");
        assert_eq!(events[0].id.as_deref(), Some("9"));
        assert_eq!(events[0].data.as_deref(), Some("hello"));

        // no space after colon is also fine
        let events = parser.push(b"data:tight\n\n");
        assert_eq!(events[0].data.as_deref(), Some("tight"));
    }

    #[test]
    fn test_parse_priming_event() {
        let mut parser = SseParser::new();
        let events = parser.push(b"id: 42\ndata: \n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id.as_deref(), Some("42"));
        assert!(!events[0].is_message());
    }

    #[test]
    fn test_parse_across_chunk_boundaries() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"id: 1\nda").is_empty());
        assert!(parser.push(b"ta: part").is_empty());
        let events = parser.push(b"ial\n\n");
        assert_eq!(events[0].data.as_deref(), Some("partial"));
    }

    #[test]
    fn test_retry_parsed_and_comments_ignored() {
        let mut parser = SseParser::new();
        let events = parser.push(b": keepalive\n\nretry: 2500\nid: 5\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].retry, Some(2500));
    }

    #[test]
    fn test_roundtrip() {
        let original = SseEvent::message("11", "{\"a\":\"b\"}");
        let mut parser = SseParser::new();
        let events = parser.push(original.format().as_bytes());
        assert_eq!(events, vec![original]);
    }
}
