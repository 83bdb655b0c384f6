//! Incremental Server-Sent Events parser for chat completion streams.
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Bon"}}]}
//!
//! data: {"choices":[{"delta":{"content":"jour"}}]}
//!
//! data: [DONE]
//! ```
//!
//! Bytes are buffered until a full line is available, so multi-byte UTF-8
//! characters split across network chunks decode correctly.

/// A parsed Server-Sent Event.
///
/// Chat completion streams only use unnamed events, so `event:` fields are
/// not kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `data:` payload. Multiple data lines are joined with `\n`.
    pub data: String,
}

impl SseEvent {
    /// Whether this event is the `[DONE]` sentinel.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Feeds raw bytes in, yields complete events out.
#[derive(Debug, Default)]
pub struct SseLineParser {
    pending: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseLineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes, returning every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line_bytes[..newline]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Emit whatever is left once the byte stream has ended.
    pub fn flush(&mut self) -> Option<SseEvent> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.process_line(line) {
                return Some(event);
            }
        }
        self.take_event()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.take_event();
        }
        // Comment line
        if line.starts_with(':') {
            return None;
        }
        if let Some(("data", value)) = parse_field(line) {
            self.data_lines.push(value.to_owned());
        }
        None
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        if self.data_lines.is_empty() {
            return None;
        }
        let data = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(SseEvent { data })
    }
}

/// Split `field:value`, dropping one leading space from the value.
fn parse_field(line: &str) -> Option<(&str, &str)> {
    let (field, value) = line.split_once(':')?;
    Some((field, value.strip_prefix(' ').unwrap_or(value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_field_strips_single_space() {
        assert_eq!(parse_field("data: hello"), Some(("data", "hello")));
        assert_eq!(parse_field("data:hello"), Some(("data", "hello")));
        assert_eq!(parse_field("data:  two"), Some(("data", " two")));
        assert_eq!(parse_field("nodatahere"), None);
    }

    #[test]
    fn events_split_across_chunks() {
        let mut parser = SseLineParser::new();
        assert!(parser.push(b"data: {\"a\"").is_empty());
        assert!(parser.push(b":1}\n").is_empty());
        let events = parser.push(b"\ndata: second\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[1].data, "second");
    }

    #[test]
    fn multibyte_char_split_across_chunks() {
        let mut parser = SseLineParser::new();
        let bytes = "data: é\n\n".as_bytes();
        // 'é' is two bytes; split between them.
        let split = "data: ".len() + 1;
        assert!(parser.push(&bytes[..split]).is_empty());
        let events = parser.push(&bytes[split..]);
        assert_eq!(events[0].data, "é");
    }

    #[test]
    fn comments_event_names_and_crlf_are_handled() {
        let mut parser = SseLineParser::new();
        let events = parser.push(b": keep-alive\r\nevent: message\r\ndata: x\r\n\r\n");
        assert_eq!(events, vec![SseEvent { data: "x".to_owned() }]);
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut parser = SseLineParser::new();
        let events = parser.push(b"data: one\ndata: two\n\n");
        assert_eq!(events[0].data, "one\ntwo");
    }

    #[test]
    fn flush_emits_trailing_event() {
        let mut parser = SseLineParser::new();
        assert!(parser.push(b"data: [DONE]").is_empty());
        let event = parser.flush();
        assert!(event.is_some_and(|e| e.is_done()));
        assert!(parser.flush().is_none());
    }
}
