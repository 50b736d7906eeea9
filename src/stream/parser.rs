//! Incremental decoder for the `data: {json}` line protocol.
//!
//! Bytes arrive in arbitrary chunks. [`EventParser::feed`] keeps a single text
//! buffer, decodes UTF-8 across chunk boundaries, and only ever parses complete
//! lines; the unterminated tail stays buffered until the next chunk or
//! [`EventParser::finish`].

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use encoding_rs::{Decoder, UTF_8};
use std::sync::OnceLock;
use thiserror::Error;

use super::events::StreamEvent;

const DATA_PREFIX: &str = "data:";

static AUTH_SIGNATURES: OnceLock<AhoCorasick> = OnceLock::new();

fn auth_signatures() -> &'static AhoCorasick {
    AUTH_SIGNATURES.get_or_init(|| {
        AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .build(["authentication", "unauthorized", "401"])
            .expect("static patterns compile")
    })
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("record is not JSON: {0}")]
    NotJson(#[source] serde_json::Error),
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("record does not match any stream event: {0}")]
    Decode(#[source] serde_json::Error),
}

/// What a single complete line turned into.
#[derive(Debug)]
pub enum LineOutcome {
    Event(StreamEvent),
    /// Plain-text failure carrying an authentication signature.
    AuthFailure(String),
    /// Unusable line, skipped.
    Noise { line: String, reason: String },
}

pub struct EventParser {
    decoder: Decoder,
    buffer: String,
}

impl Default for EventParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EventParser {
    pub fn new() -> Self {
        Self {
            decoder: UTF_8.new_decoder_without_bom_handling(),
            buffer: String::new(),
        }
    }

    /// Decode one chunk and return outcomes for every line it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<LineOutcome> {
        self.decode(chunk, false);
        self.drain_complete_lines()
    }

    /// Flush the decoder at end of stream and parse the unterminated tail, if any.
    pub fn finish(&mut self) -> Vec<LineOutcome> {
        self.decode(&[], true);
        let mut outcomes = self.drain_complete_lines();
        let tail = std::mem::take(&mut self.buffer);
        if let Some(outcome) = parse_line(&tail) {
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Bytes-worth of text still waiting for a newline.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn decode(&mut self, chunk: &[u8], last: bool) {
        let needed = self
            .decoder
            .max_utf8_buffer_length(chunk.len())
            .unwrap_or(chunk.len() * 3 + 4);
        self.buffer.reserve(needed);
        let (_, read, _) = self.decoder.decode_to_string(chunk, &mut self.buffer, last);
        debug_assert_eq!(read, chunk.len());
    }

    fn drain_complete_lines(&mut self) -> Vec<LineOutcome> {
        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };
        let tail = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, tail);
        complete.split('\n').filter_map(parse_line).collect()
    }
}

/// Parse one physical line. `None` for blank lines and empty payloads.
pub fn parse_line(raw: &str) -> Option<LineOutcome> {
    let line = raw.trim();
    if line.is_empty() {
        return None;
    }
    let payload = strip_data_prefix(line);
    if payload.is_empty() {
        return None;
    }

    let first_error = match decode_record(payload) {
        Ok(event) => return Some(LineOutcome::Event(event)),
        Err(e) => e,
    };

    // Proxies sometimes double the prefix or glue records together.
    let cleaned = payload.replace("data: ", "").replace(DATA_PREFIX, "");
    let cleaned = cleaned.trim();
    if cleaned.starts_with('{') {
        match decode_record(cleaned) {
            Ok(event) => return Some(LineOutcome::Event(event)),
            Err(e) => {
                log::debug!("Recovery pass failed: {}", e);
            }
        }
    }

    if auth_signatures().is_match(line) {
        return Some(LineOutcome::AuthFailure(line.to_string()));
    }

    Some(LineOutcome::Noise {
        line: line.to_string(),
        reason: first_error.to_string(),
    })
}

fn strip_data_prefix(line: &str) -> &str {
    line.strip_prefix("data: ")
        .or_else(|| line.strip_prefix(DATA_PREFIX))
        .unwrap_or(line)
        .trim()
}

fn decode_record(candidate: &str) -> Result<StreamEvent, ProtocolError> {
    if !(candidate.starts_with('{') && candidate.ends_with('}')) {
        return Err(ProtocolError::NotAnObject);
    }
    let value: serde_json::Value =
        serde_json::from_str(candidate).map_err(ProtocolError::NotJson)?;
    if !value.is_object() {
        return Err(ProtocolError::NotAnObject);
    }
    serde_json::from_value(value).map_err(ProtocolError::Decode)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = concat!(
        "data: {\"type\":\"initialization\",\"total_items\":2,\"message\":\"Starting\"}\n",
        "\n",
        "data: {\"type\":\"item_completed\",\"item_number\":1,\"terms\":[{\"source_term\":\"conscience\",\"translated_term\":\"consciousness\"}]}\n",
        "data:{\"type\":\"raw_content\",\"content\":\"café – naïve ✓ 意識\"}\n",
        "data: {\"type\":\"completion\",\"message\":\"Done\"}\n",
    );

    fn events(outcomes: Vec<LineOutcome>) -> Vec<StreamEvent> {
        outcomes
            .into_iter()
            .filter_map(|o| match o {
                LineOutcome::Event(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn feed_in_chunks(bytes: &[u8], size: usize) -> Vec<StreamEvent> {
        let mut parser = EventParser::new();
        let mut out = Vec::new();
        for chunk in bytes.chunks(size) {
            out.extend(events(parser.feed(chunk)));
        }
        out.extend(events(parser.finish()));
        out
    }

    #[test]
    fn test_whole_stream() {
        let decoded = feed_in_chunks(STREAM.as_bytes(), STREAM.len());
        let kinds: Vec<_> = decoded.iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec!["initialization", "item_completed", "raw_content", "completion"]
        );
    }

    #[test]
    fn test_chunk_boundary_invariance() {
        let expected = feed_in_chunks(STREAM.as_bytes(), STREAM.len());
        // Small sizes split inside multi-byte characters and inside JSON objects.
        for size in 1..=17 {
            assert_eq!(feed_in_chunks(STREAM.as_bytes(), size), expected, "chunk size {}", size);
        }
    }

    #[test]
    fn test_split_at_newline() {
        let mut parser = EventParser::new();
        let first = parser.feed(b"data: {\"type\":\"initialization\",\"total_items\":2}\n");
        let second = parser.feed(b"data: {\"type\":\"item_completed\",\"item_number\":1}\n");
        assert_eq!(events(first).len(), 1);
        let second = events(second);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].kind(), "item_completed");
        assert!(parser.pending().is_empty());
    }

    #[test]
    fn test_partial_record_stays_buffered() {
        let mut parser = EventParser::new();
        assert!(parser.feed(b"data: {\"type\":\"compl").is_empty());
        assert_eq!(parser.pending(), "data: {\"type\":\"compl");
        let done = events(parser.feed(b"etion\"}\n"));
        assert_eq!(done[0].kind(), "completion");
    }

    #[test]
    fn test_unterminated_tail_parsed_on_finish() {
        let mut parser = EventParser::new();
        assert!(parser.feed(b"data: {\"type\":\"completion\"}").is_empty());
        let done = events(parser.finish());
        assert_eq!(done.len(), 1);
    }

    #[test]
    fn test_duplicated_prefix_recovered() {
        match parse_line("data: data: {\"type\":\"completion\",\"message\":\"ok\"}") {
            Some(LineOutcome::Event(event)) => assert_eq!(event.kind(), "completion"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_noise() {
        match parse_line("data: <html>502 Bad Gateway</html>") {
            Some(LineOutcome::Noise { line, .. }) => assert!(line.contains("Bad Gateway")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_line("   ").is_none());
        assert!(parse_line("data:").is_none());
    }

    #[test]
    fn test_plain_text_auth_failure() {
        for line in [
            "data: Unauthorized",
            "AUTHENTICATION required",
            "data: error 401 token expired",
        ] {
            assert!(
                matches!(parse_line(line), Some(LineOutcome::AuthFailure(_))),
                "line {:?}",
                line
            );
        }
    }

    #[test]
    fn test_non_object_json_is_noise() {
        assert!(matches!(
            parse_line("data: [1,2,3]"),
            Some(LineOutcome::Noise { .. })
        ));
        assert!(matches!(
            parse_line("data: {\"no_type\":true}"),
            Some(LineOutcome::Noise { .. })
        ));
    }

    #[test]
    fn test_crlf_lines() {
        let mut parser = EventParser::new();
        let decoded = events(parser.feed(b"data: {\"type\":\"planning\",\"total_batches\":3}\r\n\r\n"));
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].kind(), "planning");
    }
}
