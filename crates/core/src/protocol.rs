//! Defines the simplified Server-Sent-Events protocol spoken between the relay
//! and its callers.
//!
//! Every frame is `data: <payload>\n\n` where the payload is `{"text": ...}`,
//! `{"error": ...}`, or the literal `[DONE]` terminator.

use serde::{Deserialize, Serialize};

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";
pub const FRAME_DELIMITER: &[u8] = b"\n\n";
pub const LINE_DELIMITER: &[u8] = b"\n";

/// Request body accepted by the relay.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChatRequest {
    #[cfg_attr(
        feature = "openapi",
        schema(example = "Explain what this code does in 3 bullet points:\n\nprint(1)")
    )]
    pub prompt: String,
}

/// JSON body of every pre-stream error response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ErrorBody {
    pub error: String,
}

/// One simplified frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Text(String),
    Error(String),
    Done,
}

#[derive(Serialize, Deserialize, Default)]
struct FramePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl StreamFrame {
    /// Serializes the frame to its exact wire form.
    pub fn encode(&self) -> String {
        let payload = match self {
            StreamFrame::Done => return format!("{DATA_PREFIX}{DONE_SENTINEL}\n\n"),
            StreamFrame::Text(text) => FramePayload {
                text: Some(text.clone()),
                ..Default::default()
            },
            StreamFrame::Error(error) => FramePayload {
                error: Some(error.clone()),
                ..Default::default()
            },
        };
        // Serializing a struct of strings cannot fail.
        let json = serde_json::to_string(&payload).unwrap_or_default();
        format!("{DATA_PREFIX}{json}\n\n")
    }

    /// Parses one frame with the delimiter already removed.
    ///
    /// Returns `None` for anything that is not a usable frame: non-`data:`
    /// records, empty text, and payloads that fail to parse as JSON. A parse
    /// failure is assumed to be a frame split across reads; truly malformed
    /// frames are dropped the same way instead of being surfaced.
    pub fn decode(record: &str) -> Option<StreamFrame> {
        let payload = data_payload(record)?;
        if payload == DONE_SENTINEL {
            return Some(StreamFrame::Done);
        }
        let parsed: FramePayload = match serde_json::from_str(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unparseable frame");
                return None;
            }
        };
        if let Some(error) = parsed.error.filter(|e| !e.is_empty()) {
            return Some(StreamFrame::Error(error));
        }
        parsed
            .text
            .filter(|t| !t.is_empty())
            .map(StreamFrame::Text)
    }
}

/// Strips the `data: ` prefix from a trimmed SSE record. Comment and
/// keep-alive lines return `None`.
pub fn data_payload(record: &str) -> Option<&str> {
    record.trim().strip_prefix(DATA_PREFIX)
}

/// Accumulates raw bytes and yields complete records split on a delimiter.
///
/// Splitting happens on bytes, so a multi-byte UTF-8 character that straddles
/// two reads is reassembled before it is decoded. The incomplete tail stays
/// buffered until more bytes arrive; whatever is left when the stream ends is
/// discarded.
#[derive(Debug)]
pub struct RecordBuffer {
    delimiter: &'static [u8],
    buf: Vec<u8>,
}

impl RecordBuffer {
    pub fn new(delimiter: &'static [u8]) -> Self {
        Self {
            delimiter,
            buf: Vec::new(),
        }
    }

    /// Buffer for simplified frames (`\n\n`-terminated).
    pub fn frames() -> Self {
        Self::new(FRAME_DELIMITER)
    }

    /// Buffer for upstream SSE lines (`\n`-terminated).
    pub fn lines() -> Self {
        Self::new(LINE_DELIMITER)
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut records = Vec::new();
        let mut start = 0;
        while let Some(pos) = find(&self.buf[start..], self.delimiter) {
            let end = start + pos;
            records.push(String::from_utf8_lossy(&self.buf[start..end]).into_owned());
            start = end + self.delimiter.len();
        }
        self.buf.drain(..start);
        records
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
