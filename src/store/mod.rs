//! Durable session and message storage.
//!
//! [`SessionRepository`] is the storage seam; [`SessionStore`] layers the
//! session-token semantics (get-or-create, restore) on top of it.
//!
//! # Providers
//!
//! - [`SqliteRepository`]: sqlx/SQLite with a single-connection writer pool
//! - [`MemoryRepository`]: process-local, used in tests and demos

mod memory;
mod sqlite;

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::config::PersistenceConfig;
use crate::session::{Message, Session, SessionToken, Speaker};

/// Storage failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An explicitly requested session does not exist.
    #[error("session not found: {0}")]
    NotFound(String),

    /// The database rejected or failed a query.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migrations failed at startup.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be mapped back to the domain model.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// The configured provider name is not recognised.
    #[error("unknown persistence provider: {0}")]
    UnknownProvider(String),
}

/// A message about to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub session_id: String,
    pub speaker: Speaker,
    pub content: String,
    pub sentiment: Option<f32>,
    pub timestamp: DateTime<Utc>,
}

/// Backing store for sessions and their message logs.
///
/// Implementations must serialize writes: two appends to the same session may
/// never be assigned the same sequence number or become visible out of order.
#[async_trait]
pub trait SessionRepository: Send + Sync + std::fmt::Debug {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError>;
    async fn find_session(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// Record a contact address. Returns `false` if the session is unknown.
    async fn set_contact(&self, id: &str, email: &str) -> Result<bool, StoreError>;

    /// Set `ended_at` unless it is already set, and return the session.
    async fn mark_ended(&self, id: &str, at: DateTime<Utc>)
    -> Result<Option<Session>, StoreError>;

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// All messages of a session ordered by `(timestamp, seq)`.
    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError>;

    /// The newest message of a session.
    async fn last_message(&self, session_id: &str) -> Result<Option<Message>, StoreError>;
}

/// Session store used by the relay.
#[derive(Debug, Clone)]
pub struct SessionStore {
    repo: Arc<dyn SessionRepository>,
}

impl SessionStore {
    #[must_use]
    pub fn new(repo: Arc<dyn SessionRepository>) -> Self {
        Self { repo }
    }

    /// Store backed by process memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRepository::new()))
    }

    /// Open the provider named in the configuration.
    pub async fn connect(config: &PersistenceConfig) -> Result<Self, StoreError> {
        let repo: Arc<dyn SessionRepository> = match config.provider.as_str() {
            "sqlite" => Arc::new(SqliteRepository::connect(&config.database_url).await?),
            "memory" => Arc::new(MemoryRepository::new()),
            other => return Err(StoreError::UnknownProvider(other.to_string())),
        };
        Ok(Self::new(repo))
    }

    /// Create and persist a fresh session.
    pub async fn create(&self) -> Result<Session, StoreError> {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_email: None,
            created_at: Utc::now(),
            ended_at: None,
        };
        self.repo.insert_session(&session).await?;
        tracing::info!(name: "session.created", session_id = %session.id, "Session created");
        Ok(session)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Session>, StoreError> {
        self.repo.find_session(id).await
    }

    /// Resolve the session a token refers to, creating one when the token is
    /// absent or names a session the store does not know.
    ///
    /// The returned token names the resolved session. A token that already
    /// resolved is returned unchanged.
    pub async fn get_or_create(
        &self,
        token: SessionToken,
    ) -> Result<(Session, SessionToken), StoreError> {
        if let Some(id) = token.session_id.as_deref() {
            if let Some(session) = self.repo.find_session(id).await? {
                return Ok((session, token));
            }
            tracing::debug!(session_id = %id, "Token references unknown session");
        }

        let session = self.create().await?;
        let token = SessionToken {
            session_id: Some(session.id.clone()),
            window: token.window,
            pending_reply: false,
        };
        Ok((session, token))
    }

    /// Persist a message. It is visible to reads as soon as this returns.
    pub async fn append(
        &self,
        session_id: &str,
        speaker: Speaker,
        content: &str,
        sentiment: Option<f32>,
    ) -> Result<Message, StoreError> {
        self.repo
            .insert_message(NewMessage {
                session_id: session_id.to_string(),
                speaker,
                content: content.to_string(),
                sentiment,
                timestamp: Utc::now(),
            })
            .await
    }

    /// Load a session with its full ordered history.
    ///
    /// Unknown ids are [`StoreError::NotFound`]; nothing is created.
    pub async fn restore(&self, id: &str) -> Result<(Session, Vec<Message>), StoreError> {
        let session = self
            .repo
            .find_session(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let messages = self.repo.list_messages(id).await?;
        Ok((session, messages))
    }

    pub async fn messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        self.repo.list_messages(session_id).await
    }

    pub async fn last_message(&self, session_id: &str) -> Result<Option<Message>, StoreError> {
        self.repo.last_message(session_id).await
    }

    pub async fn set_contact(&self, session_id: &str, email: &str) -> Result<(), StoreError> {
        if self.repo.set_contact(session_id, email).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(session_id.to_string()))
        }
    }

    /// Mark a session ended. Calling it again keeps the first end time.
    pub async fn end(&self, id: &str, at: DateTime<Utc>) -> Result<Option<Session>, StoreError> {
        self.repo.mark_ended(id, at).await
    }
}
