//! Classifier reached over HTTP.
//!
//! Speaks the common text-classification inference shape: the request is
//! `{"inputs": "<text>"}` and the response is a list of `{label, score}`
//! candidates, possibly nested one level (`[[...]]`).

use std::time::Duration;

use serde::Deserialize;

use super::{NEUTRAL, SentimentScorer, clamp_score};

/// Sentiment classifier behind an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpSentimentScorer {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct LabelScore {
    pub label: String,
    pub score: f32,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassifierResponse {
    Nested(Vec<Vec<LabelScore>>),
    Flat(Vec<LabelScore>),
}

impl HttpSentimentScorer {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout,
        }
    }

    async fn classify(&self, text: &str) -> Result<Vec<LabelScore>, reqwest::Error> {
        let resp = self
            .http
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&serde_json::json!({ "inputs": text }))
            .send()
            .await?
            .error_for_status()?;

        Ok(match resp.json::<ClassifierResponse>().await? {
            ClassifierResponse::Nested(outer) => outer.into_iter().flatten().collect(),
            ClassifierResponse::Flat(flat) => flat,
        })
    }
}

#[async_trait::async_trait]
impl SentimentScorer for HttpSentimentScorer {
    async fn score(&self, text: &str) -> f32 {
        match self.classify(text).await {
            Ok(candidates) => score_from_labels(&candidates),
            Err(e) => {
                tracing::warn!(
                    name: "sentiment.failed",
                    endpoint = %self.endpoint,
                    error = %e,
                    "Sentiment analysis failed; using neutral score"
                );
                NEUTRAL
            }
        }
    }
}

/// Collapse classifier output to a signed score.
///
/// The highest-scoring label wins: positive keeps its confidence, negative
/// negates it, anything else is neutral.
pub(crate) fn score_from_labels(candidates: &[LabelScore]) -> f32 {
    let Some(best) = candidates
        .iter()
        .filter(|c| !c.score.is_nan())
        .max_by(|a, b| a.score.total_cmp(&b.score))
    else {
        return NEUTRAL;
    };

    match best.label.to_ascii_lowercase().as_str() {
        "label_2" | "positive" | "pos" => clamp_score(best.score),
        "label_0" | "negative" | "neg" => clamp_score(-best.score),
        _ => NEUTRAL,
    }
}
