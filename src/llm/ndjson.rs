//! Newline-delimited JSON framing for the generate endpoint.

use serde::{Deserialize, Serialize};

/// Request body for `/api/generate`.
#[derive(Debug, Serialize)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub stream: bool,
}

/// One upstream record. Both fields are optional on the wire.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct GenerateChunk {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub done: bool,
}

impl GenerateChunk {
    /// The text fragment, if this record carries a non-empty one.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.response.as_deref().filter(|s| !s.is_empty())
    }
}

/// Accumulates raw body bytes and hands out complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete line without its terminator (`\n` or `\r\n`).
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    /// Whatever is left once the body has ended, if it is not blank.
    pub fn take_remainder(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.buf);
        (!rest.trim_ascii().is_empty()).then_some(rest)
    }
}

/// Decode a single record. Blank and malformed lines yield `None`.
pub fn decode_record(line: &[u8]) -> Option<GenerateChunk> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_slice(line) {
        Ok(chunk) => Some(chunk),
        Err(e) => {
            tracing::debug!(
                error = %e,
                line = %String::from_utf8_lossy(line),
                "Skipping malformed upstream record"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_split_across_chunks() {
        let mut buf = LineBuffer::default();
        buf.extend(br#"{"response":"Hi"}"#);
        assert!(buf.next_line().is_none());

        buf.extend(b"\n{\"resp");
        assert_eq!(buf.next_line().unwrap(), br#"{"response":"Hi"}"#);
        assert!(buf.next_line().is_none());

        buf.extend(b"onse\":\" there\"}\r\n");
        assert_eq!(buf.next_line().unwrap(), br#"{"response":" there"}"#);
        assert!(buf.take_remainder().is_none());
    }

    #[test]
    fn test_remainder_without_newline() {
        let mut buf = LineBuffer::default();
        buf.extend(br#"{"done":true}"#);
        assert!(buf.next_line().is_none());
        assert_eq!(buf.take_remainder().unwrap(), br#"{"done":true}"#);
    }

    #[test]
    fn test_decode_record() {
        let chunk = decode_record(br#"{"response":"Hi","done":false}"#).unwrap();
        assert_eq!(chunk.text(), Some("Hi"));
        assert!(!chunk.done);

        let done = decode_record(br#"{"done":true}"#).unwrap();
        assert_eq!(done.text(), None);
        assert!(done.done);

        let empty = decode_record(br#"{"response":""}"#).unwrap();
        assert_eq!(empty.text(), None);
    }

    #[test]
    fn test_decode_skips_garbage() {
        assert!(decode_record(b"").is_none());
        assert!(decode_record(b"   ").is_none());
        assert!(decode_record(b"{not json").is_none());
        assert!(decode_record(br#"{"response": 5}"#).is_none());
    }

    #[test]
    fn test_request_body() {
        let body = GenerateRequest {
            model: "llama3",
            prompt: "hi",
            stream: true,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({ "model": "llama3", "prompt": "hi", "stream": true })
        );
    }
}
