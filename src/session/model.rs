//! Persisted session and message records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One continuous interaction episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier (UUID v4).
    pub id: String,
    /// Optional contact address captured at session start.
    pub user_email: Option<String>,
    /// Session creation time.
    pub created_at: DateTime<Utc>,
    /// Set once the session has been explicitly ended.
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Whether the session has been ended.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The person chatting.
    User,
    /// The language model.
    Assistant,
}

impl Speaker {
    /// Stable storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Speaker {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            // "bot" is what older databases used for the assistant.
            "assistant" | "bot" => Ok(Self::Assistant),
            other => Err(format!("unknown speaker: {other}")),
        }
    }
}

/// A single persisted chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned sequence number, strictly increasing per store.
    pub seq: i64,
    /// Owning session.
    pub session_id: String,
    /// Author of the message.
    pub speaker: Speaker,
    /// Message text.
    pub content: String,
    /// Sentiment in `[-1, 1]`; assistant messages are stored as `0.0`.
    pub sentiment: Option<f32>,
    /// When the message was recorded.
    pub timestamp: DateTime<Utc>,
}
