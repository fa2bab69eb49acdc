//! Normalized streaming events and their client wire framing.
//!
//! Generation clients emit [`NormalizedEvent`]s; the relay forwards them to
//! the HTTP client as event-stream lines:
//!
//! ```text
//! data: Hi
//!
//! data:  there
//!
//! data: [DONE]
//!
//! ```
//!
//! # Example
//!
//! ```rust
//! use therabot::normalized::{NormalizedEvent, sse_event};
//!
//! let event = NormalizedEvent::MessageDelta {
//!     text: "Hello".to_string(),
//! };
//! assert_eq!(sse_event(&event), "data: Hello\n\n");
//! assert_eq!(sse_event(&NormalizedEvent::Done), "data: [DONE]\n\n");
//! ```

/// Completion marker written as the final data line of every stream.
pub const DONE_MARKER: &str = "[DONE]";

/// Events produced while a reply is being generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedEvent {
    /// Incremental text of the assistant's reply.
    MessageDelta {
        /// The text fragment to append.
        text: String,
    },
    /// The reply is complete. Emitted exactly once, last.
    Done,
}

impl NormalizedEvent {
    /// Shorthand for a [`NormalizedEvent::MessageDelta`].
    #[must_use]
    pub fn delta(text: impl Into<String>) -> Self {
        Self::MessageDelta { text: text.into() }
    }
}

/// Frame a [`NormalizedEvent`] for the client.
///
/// A fragment spanning several lines is written as one `data:` line per line,
/// which event-stream readers join back with `\n`.
pub fn sse_event(evt: &NormalizedEvent) -> String {
    match evt {
        NormalizedEvent::MessageDelta { text } => {
            let mut out = String::with_capacity(text.len() + 8);
            for line in text.split('\n') {
                out.push_str("data: ");
                out.push_str(line.strip_suffix('\r').unwrap_or(line));
                out.push('\n');
            }
            out.push('\n');
            out
        }
        NormalizedEvent::Done => format!("data: {DONE_MARKER}\n\n"),
    }
}
