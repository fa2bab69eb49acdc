//! Stub scorers used when no classifier is configured.

use rand::Rng;

use super::{SentimentScorer, clamp_score};

/// Returns the same score for every input.
#[derive(Debug, Clone, Copy)]
pub struct FixedSentimentScorer {
    score: f32,
}

impl FixedSentimentScorer {
    #[must_use]
    pub fn new(score: f32) -> Self {
        Self {
            score: clamp_score(score),
        }
    }
}

#[async_trait::async_trait]
impl SentimentScorer for FixedSentimentScorer {
    async fn score(&self, _text: &str) -> f32 {
        self.score
    }
}

/// Uniformly random scores, for demos without a classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSentimentScorer;

#[async_trait::async_trait]
impl SentimentScorer for RandomSentimentScorer {
    async fn score(&self, _text: &str) -> f32 {
        rand::thread_rng().gen_range(-1.0..=1.0)
    }
}
