//! Therabot
//!
//! Conversational backend for a supportive chat assistant: persists sessions
//! and messages, relays conversation windows to an Ollama-style language
//! model (blocking or streaming), scores user sentiment, renders session
//! transcripts and synthesizes speech.
//!
//! # Architecture
//!
//! - **Server**: Axum HTTP API with event-stream replies and signed session cookies
//! - **Relay**: one conversational turn across store, scorer and model
//! - **Store**: sqlx/SQLite (or in-memory) session and message log
//!
//! # Modules
//!
//! - [`config`]: layered configuration (defaults, file, env, CLI)
//! - [`llm`]: generation client trait and the Ollama driver
//! - [`normalized`]: streaming event model and wire framing
//! - [`relay`]: conversation orchestration
//! - [`sentiment`]: sentiment scoring capability
//! - [`session`]: session model, conversation window, client token
//! - [`speech`]: text-to-speech capability
//! - [`store`]: durable storage
//! - [`transcript`]: end-of-session documents

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::default_trait_access)]
#![allow(clippy::unused_async)]
#![allow(clippy::needless_pass_by_value)]

pub mod config;
pub mod error;
pub mod llm;
pub mod normalized;
pub mod relay;
pub mod sentiment;
pub mod server;
pub mod session;
pub mod speech;
pub mod store;
pub mod telemetry;
pub mod transcript;

use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use relay::ConversationRelay;
use speech::SpeechSynthesizer;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Conversation orchestration.
    pub relay: ConversationRelay,
    /// Text-to-speech backend.
    pub speech: Arc<dyn SpeechSynthesizer>,
    /// Signing key for the session cookie.
    pub cookie_key: Key,
    /// Name of the session cookie.
    pub cookie_name: Arc<str>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("relay", &self.relay)
            .field("speech", &self.speech)
            .field("cookie_name", &self.cookie_name)
            .finish()
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}
