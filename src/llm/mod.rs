//! Language model client abstraction.
//!
//! The relay talks to the model through [`GenerationClient`], which has a
//! blocking mode (one trimmed reply) and a streaming mode (a lazy sequence of
//! [`NormalizedEvent`]s that always ends with exactly one
//! [`NormalizedEvent::Done`]). Neither mode surfaces upstream failures: they
//! are replaced by fixed fallback replies.
//!
//! # Drivers
//!
//! - [`OllamaClient`]: Ollama-style `/api/generate` endpoint (NDJSON streaming)

pub mod ndjson;
pub mod ollama;

pub use ollama::OllamaClient;

use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use thiserror::Error;

use crate::normalized::NormalizedEvent;

/// Reply used when the backend answered but produced no usable text.
pub const EMPTY_REPLY_FALLBACK: &str = "Hmm, I didn't quite catch that. Can you say more?";

/// Reply used when a blocking generation call fails outright.
pub const UNAVAILABLE_FALLBACK: &str = "Sorry, I had trouble processing that.";

/// Fragment emitted when a streaming generation call fails.
pub const STREAM_FALLBACK: &str =
    "I'm having trouble right now, but I'm here to listen. Can you tell me more?";

/// Boxed event stream returned by [`GenerationClient::generate_stream`].
pub type EventStream = Pin<Box<dyn Stream<Item = NormalizedEvent> + Send>>;

/// LLM connection and model settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// Full URL of the generate endpoint.
    pub endpoint: String,
    /// Model identifier (e.g., `llama3`).
    pub model: String,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Upper bound for a blocking call, and for the first byte of a stream.
    pub request_timeout: Duration,
    /// Longest silence tolerated between two streamed chunks.
    pub stream_idle_timeout: Duration,
}

/// Why an upstream call produced no reply.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// A text generation backend.
#[async_trait::async_trait]
pub trait GenerationClient: Send + Sync + std::fmt::Debug {
    /// Generate a complete reply. Never empty.
    async fn generate(&self, prompt: &str) -> String;

    /// Generate a reply incrementally.
    ///
    /// Nothing is sent upstream until the stream is first polled. The stream
    /// is finite, not restartable, and always terminates with one
    /// [`NormalizedEvent::Done`].
    fn generate_stream(&self, prompt: String) -> EventStream;
}
