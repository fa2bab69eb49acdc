//! Sentiment scoring capability.
//!
//! A scorer maps text to a value in `[-1, 1]` and never fails: any internal
//! problem yields the neutral score `0.0`. The concrete scorer is chosen once
//! at startup from [`SentimentConfig`].

mod http;
mod stub;

pub use http::HttpSentimentScorer;
pub use stub::{FixedSentimentScorer, RandomSentimentScorer};

use std::sync::Arc;
use std::time::Duration;

use crate::config::SentimentConfig;

/// Neutral score used whenever scoring is impossible.
pub const NEUTRAL: f32 = 0.0;

/// Scores the emotional tone of user text.
#[async_trait::async_trait]
pub trait SentimentScorer: Send + Sync + std::fmt::Debug {
    /// Score `text` in `[-1, 1]`. Must not fail; return [`NEUTRAL`] instead.
    async fn score(&self, text: &str) -> f32;
}

/// Build the scorer selected in the configuration.
///
/// Unknown provider names fall back to the randomized stub with a warning.
pub fn from_config(config: &SentimentConfig) -> Arc<dyn SentimentScorer> {
    match config.provider.as_str() {
        "http" => match config.endpoint.as_deref() {
            Some(endpoint) => Arc::new(HttpSentimentScorer::new(
                endpoint,
                Duration::from_millis(config.timeout_ms),
            )),
            None => {
                tracing::warn!("sentiment.provider=http without sentiment.endpoint; using stub");
                Arc::new(RandomSentimentScorer)
            }
        },
        "fixed" => Arc::new(FixedSentimentScorer::new(config.fixed_score)),
        "stub" | "random" => Arc::new(RandomSentimentScorer),
        other => {
            tracing::warn!(provider = %other, "Unknown sentiment provider; using stub");
            Arc::new(RandomSentimentScorer)
        }
    }
}

/// Clamp into `[-1, 1]`, mapping NaN to neutral.
pub(crate) fn clamp_score(score: f32) -> f32 {
    if score.is_nan() {
        NEUTRAL
    } else {
        score.clamp(-1.0, 1.0)
    }
}
