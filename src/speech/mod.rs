//! Text-to-speech capability.
//!
//! - [`HttpSpeechSynthesizer`]: posts `{text, voice, rate}` to a synthesis
//!   service and returns its audio bytes
//! - [`SilentSpeechSynthesizer`]: returns a short silent WAV clip

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::SpeechConfig;

/// Synthesized audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Audio {
    pub bytes: Vec<u8>,
    /// MIME type of `bytes`, e.g. `audio/mpeg`.
    pub content_type: String,
}

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("nothing to synthesize")]
    EmptyText,

    #[error("synthesis request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("synthesis service returned no audio")]
    EmptyAudio,
}

/// Converts text to audio.
#[async_trait::async_trait]
pub trait SpeechSynthesizer: Send + Sync + std::fmt::Debug {
    async fn synthesize(&self, text: &str) -> Result<Audio, SpeechError>;
}

/// Build the synthesizer selected in the configuration.
pub fn from_config(config: &SpeechConfig) -> Arc<dyn SpeechSynthesizer> {
    match (config.provider.as_str(), config.endpoint.as_deref()) {
        ("http", Some(endpoint)) => Arc::new(HttpSpeechSynthesizer::new(
            endpoint,
            &config.voice,
            &config.rate,
            Duration::from_secs(config.timeout_secs),
        )),
        ("http", None) => {
            tracing::warn!("speech.provider=http without speech.endpoint; using silent stub");
            Arc::new(SilentSpeechSynthesizer::default())
        }
        _ => Arc::new(SilentSpeechSynthesizer::default()),
    }
}

/// Synthesis service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSpeechSynthesizer {
    http: reqwest::Client,
    endpoint: String,
    voice: String,
    rate: String,
    timeout: Duration,
}

impl HttpSpeechSynthesizer {
    #[must_use]
    pub fn new(endpoint: &str, voice: &str, rate: &str, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            voice: voice.to_string(),
            rate: rate.to_string(),
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Audio, SpeechError> {
        if text.trim().is_empty() {
            return Err(SpeechError::EmptyText);
        }

        let resp = self
            .http
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&serde_json::json!({
                "text": text,
                "voice": self.voice,
                "rate": self.rate,
            }))
            .send()
            .await?
            .error_for_status()?;

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();
        let bytes = resp.bytes().await?.to_vec();
        if bytes.is_empty() {
            return Err(SpeechError::EmptyAudio);
        }

        Ok(Audio {
            bytes,
            content_type,
        })
    }
}

/// Produces silence, sized roughly to the text.
#[derive(Debug, Clone)]
pub struct SilentSpeechSynthesizer {
    sample_rate: u32,
}

impl Default for SilentSpeechSynthesizer {
    fn default() -> Self {
        Self { sample_rate: 8_000 }
    }
}

impl SilentSpeechSynthesizer {
    /// Mono 8-bit PCM WAV of `samples` silent samples.
    fn wav(&self, samples: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(44 + samples as usize);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + samples).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // PCM
        out.extend_from_slice(&1u16.to_le_bytes()); // mono
        out.extend_from_slice(&self.sample_rate.to_le_bytes());
        out.extend_from_slice(&self.sample_rate.to_le_bytes()); // byte rate
        out.extend_from_slice(&1u16.to_le_bytes()); // block align
        out.extend_from_slice(&8u16.to_le_bytes()); // bits per sample
        out.extend_from_slice(b"data");
        out.extend_from_slice(&samples.to_le_bytes());
        // 8-bit PCM is unsigned; 128 is the zero line.
        out.resize(44 + samples as usize, 128);
        out
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for SilentSpeechSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Audio, SpeechError> {
        if text.trim().is_empty() {
            return Err(SpeechError::EmptyText);
        }
        // About a twentieth of a second per word, capped at five seconds.
        let words = u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX);
        let samples = (self.sample_rate / 20)
            .saturating_mul(words)
            .min(self.sample_rate * 5);

        Ok(Audio {
            bytes: self.wav(samples),
            content_type: "audio/wav".to_string(),
        })
    }
}
