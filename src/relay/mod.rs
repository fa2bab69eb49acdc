//! Conversation relay.
//!
//! Every operation takes the client's [`SessionToken`] and hands back the
//! token the client should hold next. The relay is the only component that
//! touches the store, the scorer and the model together.
//!
//! # Streamed replies
//!
//! The token for a streamed turn is issued before the reply exists, so it
//! carries the user line and `pending_reply = true`. The assistant message is
//! persisted once the model signals completion; the next operation pulls it
//! from the store into the window. An interrupted stream leaves nothing
//! behind, so the window simply skips that reply.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;

use crate::llm::{EMPTY_REPLY_FALLBACK, EventStream, GenerationClient};
use crate::normalized::NormalizedEvent;
use crate::sentiment::{self, SentimentScorer};
use crate::session::{ConversationWindow, Message, PromptSettings, SessionToken, Speaker};
use crate::store::{SessionStore, StoreError};
use crate::transcript::{self, TranscriptOutcome};

/// Sentiment recorded for assistant messages.
pub const ASSISTANT_SENTIMENT: f32 = 0.0;

/// Default upper bound for one sentiment call.
pub const DEFAULT_SCORING_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("message is empty")]
    EmptyMessage,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Summary returned when a client re-attaches to an earlier session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoredSession {
    pub session_id: String,
    pub returning_user: bool,
    /// Creation date, e.g. `March 05, 2024`.
    pub previous_session_date: String,
    pub message_count: usize,
}

/// Coordinates store, scorer and model for each conversational turn.
#[derive(Debug, Clone)]
pub struct ConversationRelay {
    store: SessionStore,
    client: Arc<dyn GenerationClient>,
    scorer: Arc<dyn SentimentScorer>,
    prompt: PromptSettings,
    scoring_timeout: Duration,
}

impl ConversationRelay {
    #[must_use]
    pub fn new(
        store: SessionStore,
        client: Arc<dyn GenerationClient>,
        scorer: Arc<dyn SentimentScorer>,
        prompt: PromptSettings,
    ) -> Self {
        Self {
            store,
            client,
            scorer,
            prompt,
            scoring_timeout: DEFAULT_SCORING_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_scoring_timeout(mut self, timeout: Duration) -> Self {
        self.scoring_timeout = timeout;
        self
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Answer one user message with a complete reply.
    pub async fn handle_message(
        &self,
        token: SessionToken,
        text: &str,
    ) -> Result<(String, SessionToken), RelayError> {
        let (session_id, prompt, mut token) = self.begin_turn(token, text).await?;

        let reply = self.client.generate(&prompt).await;
        self.store
            .append(
                &session_id,
                Speaker::Assistant,
                &reply,
                Some(ASSISTANT_SENTIMENT),
            )
            .await?;

        token.window.push_assistant(&reply);
        token.window.fit(&self.prompt);
        Ok((reply, token))
    }

    /// Answer one user message incrementally.
    ///
    /// The user message is persisted before this returns. The stream forwards
    /// fragments as they arrive, stores the full reply once the model
    /// completes, and then yields exactly one [`NormalizedEvent::Done`].
    /// Dropping the stream early abandons the upstream call and stores no
    /// reply.
    pub async fn handle_message_stream(
        &self,
        token: SessionToken,
        text: &str,
    ) -> Result<(EventStream, SessionToken), RelayError> {
        let (session_id, prompt, mut token) = self.begin_turn(token, text).await?;
        token.pending_reply = true;

        let upstream = self.client.generate_stream(prompt);
        let store = self.store.clone();

        let out = async_stream::stream! {
            let mut upstream = upstream;
            let mut reply = String::new();

            while let Some(event) = upstream.next().await {
                match event {
                    NormalizedEvent::MessageDelta { text } => {
                        reply.push_str(&text);
                        yield NormalizedEvent::MessageDelta { text };
                    }
                    NormalizedEvent::Done => {
                        let mut reply = reply.trim();
                        if reply.is_empty() {
                            yield NormalizedEvent::delta(EMPTY_REPLY_FALLBACK);
                            reply = EMPTY_REPLY_FALLBACK;
                        }
                        if let Err(e) = store
                            .append(&session_id, Speaker::Assistant, reply, Some(ASSISTANT_SENTIMENT))
                            .await
                        {
                            tracing::error!(
                                name: "relay.persist.failed",
                                session_id = %session_id,
                                error = %e,
                                "Could not store streamed reply"
                            );
                        }
                        break;
                    }
                }
            }
            yield NormalizedEvent::Done;
        };

        Ok((Box::pin(out), token))
    }

    /// Attach the client to a session, recording a contact address if given.
    pub async fn start_session(
        &self,
        token: SessionToken,
        email: Option<&str>,
    ) -> Result<(String, SessionToken), RelayError> {
        let token = self.reconcile(token).await?;
        let (session, token) = self.store.get_or_create(token).await?;

        if let Some(email) = email.map(str::trim).filter(|e| !e.is_empty()) {
            self.store.set_contact(&session.id, email).await?;
            tracing::info!(name: "session.contact.recorded", session_id = %session.id, "Contact recorded");
        }
        Ok((session.id, token))
    }

    /// End the client's session and produce the closing document.
    ///
    /// Never fails: store or rendering problems degrade the outcome instead.
    /// The returned token is empty.
    pub async fn end_session(&self, token: SessionToken) -> (TranscriptOutcome, SessionToken) {
        let now = Utc::now();
        let outcome = match token.session_id.as_deref() {
            None => TranscriptOutcome::select(transcript::render_visit(now), || {
                transcript::render_minimal(now)
            }),
            Some(id) => {
                let full = self.full_transcript(id, now).await;
                TranscriptOutcome::select(full, || transcript::render_minimal(now))
            }
        };

        tracing::info!(
            name: "session.ended",
            session_id = ?token.session_id,
            tier = ?outcome.tier(),
            "Session ended"
        );
        (outcome, SessionToken::default())
    }

    /// Forget the client's session reference and window. The store is untouched.
    #[must_use]
    pub fn reset(&self, token: SessionToken) -> SessionToken {
        tracing::info!(
            name: "session.reset",
            session_id = ?token.session_id,
            window_lines = token.window.len(),
            "Client session forgotten"
        );
        SessionToken::default()
    }

    /// Re-attach to an existing session, rebuilding the window from its history.
    pub async fn restore(
        &self,
        session_id: &str,
    ) -> Result<(RestoredSession, SessionToken), RelayError> {
        let (session, messages) = self.store.restore(session_id).await?;

        let token = SessionToken {
            session_id: Some(session.id.clone()),
            window: ConversationWindow::from_messages(&messages, &self.prompt),
            pending_reply: false,
        };
        let restored = RestoredSession {
            session_id: session.id,
            returning_user: true,
            previous_session_date: session.created_at.format("%B %d, %Y").to_string(),
            message_count: messages.len(),
        };
        Ok((restored, token))
    }

    /// Ordered message log of a known session.
    pub async fn messages(&self, session_id: &str) -> Result<Vec<Message>, RelayError> {
        Ok(self.store.restore(session_id).await?.1)
    }

    /// Shared prefix of both turn kinds: resolve the session, score and store
    /// the user message, extend the window and build the prompt.
    async fn begin_turn(
        &self,
        token: SessionToken,
        text: &str,
    ) -> Result<(String, String, SessionToken), RelayError> {
        if text.trim().is_empty() {
            return Err(RelayError::EmptyMessage);
        }

        let token = self.reconcile(token).await?;
        let (session, mut token) = self.store.get_or_create(token).await?;

        let score = self.score(text).await;
        self.store
            .append(&session.id, Speaker::User, text, Some(score))
            .await?;

        token.window.push_user(text);
        token.window.fit(&self.prompt);
        let prompt = token.window.build_prompt(&self.prompt);

        tracing::debug!(
            name: "relay.turn.started",
            session_id = %session.id,
            window_lines = token.window.len(),
            sentiment = score,
            "Relaying user message"
        );
        Ok((session.id, prompt, token))
    }

    /// Fold a streamed reply that completed after the token was issued.
    async fn reconcile(&self, mut token: SessionToken) -> Result<SessionToken, StoreError> {
        if !token.pending_reply {
            return Ok(token);
        }
        token.pending_reply = false;

        let Some(id) = token.session_id.as_deref() else {
            return Ok(token);
        };
        if let Some(last) = self.store.last_message(id).await? {
            if last.speaker == Speaker::Assistant {
                token.window.push_assistant(&last.content);
                token.window.fit(&self.prompt);
            }
        }
        Ok(token)
    }

    async fn score(&self, text: &str) -> f32 {
        match tokio::time::timeout(self.scoring_timeout, self.scorer.score(text)).await {
            Ok(score) => sentiment::clamp_score(score),
            Err(_) => {
                tracing::warn!(
                    name: "sentiment.timeout",
                    timeout = ?self.scoring_timeout,
                    "Sentiment scoring timed out; using neutral score"
                );
                sentiment::NEUTRAL
            }
        }
    }

    async fn full_transcript(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<transcript::TranscriptDocument, TranscriptError> {
        let Some(session) = self.store.end(session_id, now).await? else {
            tracing::debug!(session_id = %session_id, "Ending unknown session");
            return Ok(transcript::render_visit(now)?);
        };
        let messages = self.store.messages(session_id).await?;
        Ok(transcript::render_full(&session, &messages, now)?)
    }
}

#[derive(Debug, Error)]
enum TranscriptError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("render failed")]
    Render(#[from] std::fmt::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sentiment::FixedSentimentScorer;
    use std::sync::Mutex;

    /// Replies with a fixed text and records the prompts it saw.
    #[derive(Debug, Default)]
    struct EchoClient {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl GenerationClient for EchoClient {
        async fn generate(&self, prompt: &str) -> String {
            self.prompts.lock().unwrap().push(prompt.to_string());
            "I hear you.".to_string()
        }

        fn generate_stream(&self, prompt: String) -> EventStream {
            self.prompts.lock().unwrap().push(prompt);
            Box::pin(futures::stream::iter([
                NormalizedEvent::delta("I "),
                NormalizedEvent::delta("hear you. "),
                NormalizedEvent::Done,
            ]))
        }
    }

    /// Streams fixed fragments and answers blocking calls with `reply`.
    #[derive(Debug)]
    struct ScriptClient {
        reply: String,
        fragments: Vec<&'static str>,
    }

    #[async_trait::async_trait]
    impl GenerationClient for ScriptClient {
        async fn generate(&self, _prompt: &str) -> String {
            self.reply.clone()
        }

        fn generate_stream(&self, _prompt: String) -> EventStream {
            let events: Vec<_> = self
                .fragments
                .iter()
                .map(|f| NormalizedEvent::delta(*f))
                .chain(std::iter::once(NormalizedEvent::Done))
                .collect();
            Box::pin(futures::stream::iter(events))
        }
    }

    fn relay(client: Arc<dyn GenerationClient>) -> ConversationRelay {
        ConversationRelay::new(
            SessionStore::in_memory(),
            client,
            Arc::new(FixedSentimentScorer::new(-0.5)),
            PromptSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_blocking_turn_persists_both_messages() {
        let relay = relay(Arc::new(EchoClient::default()));

        let (reply, token) = relay
            .handle_message(SessionToken::default(), "I feel low")
            .await
            .unwrap();
        assert_eq!(reply, "I hear you.");
        assert_eq!(
            token.window.lines(),
            ["[USER]: I feel low", "[THERABOT]: I hear you."]
        );

        let id = token.session_id.unwrap();
        let messages = relay.messages(&id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sentiment, Some(-0.5));
        assert_eq!(messages[1].speaker, Speaker::Assistant);
        assert_eq!(messages[1].sentiment, Some(ASSISTANT_SENTIMENT));
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let relay = relay(Arc::new(EchoClient::default()));
        let err = relay
            .handle_message(SessionToken::default(), "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::EmptyMessage));
    }

    #[tokio::test]
    async fn test_stream_reply_reconciled_on_next_turn() {
        let client = Arc::new(EchoClient::default());
        let relay = relay(Arc::clone(&client) as Arc<dyn GenerationClient>);

        let (stream, token) = relay
            .handle_message_stream(SessionToken::default(), "hello")
            .await
            .unwrap();
        assert!(token.pending_reply);
        assert_eq!(token.window.lines(), ["[USER]: hello"]);

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.last(), Some(&NormalizedEvent::Done));
        assert_eq!(events.len(), 3);

        let (_, token) = relay.handle_message(token, "again").await.unwrap();
        assert!(!token.pending_reply);
        assert_eq!(
            token.window.lines(),
            [
                "[USER]: hello",
                "[THERABOT]: I hear you.",
                "[USER]: again",
                "[THERABOT]: I hear you.",
            ]
        );
    }

    #[tokio::test]
    async fn test_dropped_stream_persists_no_reply() {
        let relay = relay(Arc::new(EchoClient::default()));

        let (mut stream, token) = relay
            .handle_message_stream(SessionToken::default(), "hello")
            .await
            .unwrap();
        let first = stream.next().await;
        assert_eq!(first, Some(NormalizedEvent::delta("I ")));
        drop(stream);

        let id = token.session_id.clone().unwrap();
        let messages = relay.messages(&id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].speaker, Speaker::User);

        let reconciled = relay.reconcile(token).await.unwrap();
        assert_eq!(reconciled.window.lines(), ["[USER]: hello"]);
    }

    #[tokio::test]
    async fn test_blank_stream_stores_fallback_reply() {
        let relay = relay(Arc::new(ScriptClient {
            reply: "x".to_string(),
            fragments: vec!["\n", "\n\n"],
        }));

        let (stream, token) = relay
            .handle_message_stream(SessionToken::default(), "hi")
            .await
            .unwrap();
        let events: Vec<_> = stream.collect().await;
        assert_eq!(
            &events[events.len() - 2..],
            [
                NormalizedEvent::delta(EMPTY_REPLY_FALLBACK),
                NormalizedEvent::Done
            ]
        );

        let id = token.session_id.clone().unwrap();
        let messages = relay.messages(&id).await.unwrap();
        assert_eq!(messages[1].content, EMPTY_REPLY_FALLBACK);

        let (_, token) = relay.handle_message(token, "again").await.unwrap();
        assert_eq!(
            token.window.lines()[1],
            format!("[THERABOT]: {EMPTY_REPLY_FALLBACK}")
        );
    }

    #[tokio::test]
    async fn test_long_turns_keep_token_cookie_sized() {
        let relay = relay(Arc::new(ScriptClient {
            reply: "I hear how heavy this week has been. ".repeat(40),
            fragments: Vec::new(),
        }));

        let mut token = SessionToken::default();
        for _ in 0..4 {
            let message = "Work keeps piling up and I can't sleep. ".repeat(30);
            token = relay.handle_message(token, &message).await.unwrap().1;
        }

        assert_eq!(token.window.len(), 6);
        assert!(token.encode().len() < 3500, "{}", token.encode().len());

        // The store keeps the full text.
        let id = token.session_id.unwrap();
        let messages = relay.messages(&id).await.unwrap();
        assert!(messages[1].content.len() > 1000);
    }

    #[tokio::test]
    async fn test_reset_forgets_token() {
        let relay = relay(Arc::new(EchoClient::default()));
        let (_, token) = relay
            .handle_message(SessionToken::default(), "hi")
            .await
            .unwrap();
        let id = token.session_id.clone().unwrap();

        assert!(relay.reset(token).is_empty());
        assert_eq!(relay.messages(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_restore_rebuilds_window() {
        let relay = relay(Arc::new(EchoClient::default()));
        let (_, token) = relay
            .handle_message(SessionToken::default(), "one")
            .await
            .unwrap();
        let id = token.session_id.unwrap();

        let (restored, token) = relay.restore(&id).await.unwrap();
        assert!(restored.returning_user);
        assert_eq!(restored.message_count, 2);
        assert_eq!(token.window.len(), 2);
    }

    #[tokio::test]
    async fn test_restore_unknown_is_not_found() {
        let relay = relay(Arc::new(EchoClient::default()));
        let err = relay.restore("nope").await.unwrap_err();
        assert!(matches!(err, RelayError::Store(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_end_session_tiers() {
        let relay = relay(Arc::new(EchoClient::default()));

        let (outcome, cleared) = relay.end_session(SessionToken::default()).await;
        assert!(cleared.is_empty());
        assert!(outcome.document().unwrap().filename.starts_with("therabot_visit_"));

        let (_, token) = relay
            .handle_message(SessionToken::default(), "hi")
            .await
            .unwrap();
        let (outcome, _) = relay.end_session(token.clone()).await;
        assert_eq!(outcome.tier(), transcript::TranscriptTier::Full);
        assert!(outcome.document().unwrap().filename.starts_with("therabot_session_"));

        let (again, _) = relay.end_session(token).await;
        assert_eq!(again.tier(), transcript::TranscriptTier::Full);
    }

    #[tokio::test]
    async fn test_start_session_records_contact() {
        let relay = relay(Arc::new(EchoClient::default()));
        let (id, token) = relay
            .start_session(SessionToken::default(), Some("a@b.c"))
            .await
            .unwrap();
        assert_eq!(token.session_id.as_deref(), Some(id.as_str()));
        let session = relay.store().get(&id).await.unwrap().unwrap();
        assert_eq!(session.user_email.as_deref(), Some("a@b.c"));
    }
}
