//! Client-held session token.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use super::ConversationWindow;

/// State the client carries between requests.
///
/// Relay operations take a token in and hand an updated token back; the HTTP
/// layer stores it in a signed cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionToken {
    /// Session this client is attached to, if any.
    pub session_id: Option<String>,
    /// Recent conversation lines used to build the next prompt.
    pub window: ConversationWindow,
    /// A streamed reply was started but had not completed when this token was
    /// issued. The next request pulls it from the store if it was persisted.
    pub pending_reply: bool,
}

impl SessionToken {
    /// Token attached to `session_id` with an empty window.
    #[must_use]
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    /// Whether this token references no session and carries no history.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.window.is_empty()
    }

    /// Cookie-safe representation (base64url JSON).
    #[must_use]
    pub fn encode(&self) -> String {
        // Serializing plain strings and bools cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Parse a value produced by [`SessionToken::encode`].
    ///
    /// Returns `None` for anything undecodable; callers treat that the same
    /// as an absent token.
    #[must_use]
    pub fn decode(value: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(value).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}
