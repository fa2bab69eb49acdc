//! Ollama `/api/generate` driver.
//!
//! Blocking calls post `stream: false` and read one JSON object. Streaming
//! calls post `stream: true` and decode the newline-delimited JSON body
//! record by record as bytes arrive.

use futures::StreamExt;

use super::ndjson::{GenerateRequest, LineBuffer, decode_record};
use super::{
    EMPTY_REPLY_FALLBACK, EventStream, GenerationClient, LlmSettings, STREAM_FALLBACK,
    UNAVAILABLE_FALLBACK, UpstreamError,
};
use crate::normalized::NormalizedEvent;

/// Driver for an Ollama-compatible generate endpoint.
#[derive(Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("settings", &self.settings)
            .finish()
    }
}

impl OllamaClient {
    /// Create a new client with the given settings.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self { http, settings }
    }

    #[must_use]
    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    async fn request_reply(&self, prompt: &str) -> Result<Option<String>, UpstreamError> {
        let body = GenerateRequest {
            model: &self.settings.model,
            prompt,
            stream: false,
        };

        let resp = self
            .http
            .post(&self.settings.endpoint)
            .timeout(self.settings.request_timeout)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let bytes = resp.bytes().await?;

        Ok(decode_record(&bytes)
            .and_then(|chunk| chunk.response)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty()))
    }

    async fn open_stream(&self, prompt: &str) -> Result<reqwest::Response, UpstreamError> {
        let body = GenerateRequest {
            model: &self.settings.model,
            prompt,
            stream: true,
        };
        let send = self.http.post(&self.settings.endpoint).json(&body).send();

        let resp = tokio::time::timeout(self.settings.request_timeout, send)
            .await
            .map_err(|_| UpstreamError::Timeout(self.settings.request_timeout))??;
        Ok(resp.error_for_status()?)
    }
}

#[async_trait::async_trait]
impl GenerationClient for OllamaClient {
    async fn generate(&self, prompt: &str) -> String {
        match self.request_reply(prompt).await {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                tracing::warn!(
                    name: "llm.reply.empty",
                    endpoint = %self.settings.endpoint,
                    "Empty or malformed reply from model"
                );
                EMPTY_REPLY_FALLBACK.to_string()
            }
            Err(e) => {
                tracing::warn!(
                    name: "llm.upstream.failed",
                    endpoint = %self.settings.endpoint,
                    error = %e,
                    "Generation request failed"
                );
                UNAVAILABLE_FALLBACK.to_string()
            }
        }
    }

    fn generate_stream(&self, prompt: String) -> EventStream {
        let client = self.clone();
        let idle = self.settings.stream_idle_timeout;

        let out = async_stream::stream! {
            let resp = match client.open_stream(&prompt).await {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::warn!(
                        name: "llm.upstream.failed",
                        endpoint = %client.settings.endpoint,
                        error = %e,
                        "Streaming request failed"
                    );
                    yield NormalizedEvent::delta(STREAM_FALLBACK);
                    yield NormalizedEvent::Done;
                    return;
                }
            };

            let byte_stream = resp.bytes_stream();
            futures::pin_mut!(byte_stream);

            let mut lines = LineBuffer::default();
            let mut emitted = false;
            let mut finished = false;
            let mut failed = false;

            'read: loop {
                let chunk = match tokio::time::timeout(idle, byte_stream.next()).await {
                    Ok(Some(Ok(chunk))) => chunk,
                    Ok(None) => break 'read,
                    Ok(Some(Err(e))) => {
                        tracing::warn!(error = %e, "Upstream stream broke off");
                        failed = true;
                        break 'read;
                    }
                    Err(_) => {
                        tracing::warn!(idle_timeout = ?idle, "Upstream stream went silent");
                        failed = true;
                        break 'read;
                    }
                };

                lines.extend(&chunk);
                while let Some(line) = lines.next_line() {
                    let Some(record) = decode_record(&line) else {
                        continue;
                    };
                    if let Some(text) = record.text() {
                        emitted |= !text.trim().is_empty();
                        yield NormalizedEvent::delta(text);
                    }
                    if record.done {
                        finished = true;
                        break 'read;
                    }
                }
            }

            // A final record may arrive without its trailing newline.
            if !finished && !failed {
                if let Some(record) = lines.take_remainder().as_deref().and_then(decode_record) {
                    if let Some(text) = record.text() {
                        emitted |= !text.trim().is_empty();
                        yield NormalizedEvent::delta(text);
                    }
                }
            }

            if failed && emitted {
                // Keep the apology apart from the partial reply.
                yield NormalizedEvent::delta(format!("\n\n{STREAM_FALLBACK}"));
            } else if failed {
                yield NormalizedEvent::delta(STREAM_FALLBACK);
            } else if !emitted {
                tracing::warn!(name: "llm.reply.empty", "Stream completed without text");
                yield NormalizedEvent::delta(EMPTY_REPLY_FALLBACK);
            }
            yield NormalizedEvent::Done;
        };

        Box::pin(out)
    }
}
