//! Process-local session repository.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{NewMessage, SessionRepository, StoreError};
use crate::session::{Message, Session};

/// In-memory [`SessionRepository`].
///
/// All writes go through one lock, so sequence numbers are handed out in
/// commit order.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    inner: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    sessions: HashMap<String, Session>,
    messages: HashMap<String, Vec<Message>>,
    next_seq: i64,
}

impl MemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for MemoryRepository {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.sessions.insert(session.id.clone(), session.clone());
        guard.messages.entry(session.id.clone()).or_default();
        Ok(())
    }

    async fn find_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.inner.read().await.sessions.get(id).cloned())
    }

    async fn set_contact(&self, id: &str, email: &str) -> Result<bool, StoreError> {
        let mut guard = self.inner.write().await;
        match guard.sessions.get_mut(id) {
            Some(session) => {
                session.user_email = Some(email.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_ended(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let mut guard = self.inner.write().await;
        Ok(guard.sessions.get_mut(id).map(|session| {
            session.ended_at.get_or_insert(at);
            session.clone()
        }))
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.sessions.contains_key(&message.session_id) {
            return Err(StoreError::NotFound(message.session_id));
        }

        guard.next_seq += 1;
        let stored = Message {
            seq: guard.next_seq,
            session_id: message.session_id,
            speaker: message.speaker,
            content: message.content,
            sentiment: message.sentiment,
            timestamp: message.timestamp,
        };
        guard
            .messages
            .entry(stored.session_id.clone())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        let guard = self.inner.read().await;
        let mut messages = guard.messages.get(session_id).cloned().unwrap_or_default();
        messages.sort_by(|a, b| (a.timestamp, a.seq).cmp(&(b.timestamp, b.seq)));
        Ok(messages)
    }

    async fn last_message(&self, session_id: &str) -> Result<Option<Message>, StoreError> {
        Ok(self.list_messages(session_id).await?.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Speaker;

    fn session(id: &str) -> Session {
        Session {
            id: id.to_string(),
            user_email: None,
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    #[tokio::test]
    async fn test_insert_message_requires_session() {
        let repo = MemoryRepository::new();
        let err = repo
            .insert_message(NewMessage {
                session_id: "nope".to_string(),
                speaker: Speaker::User,
                content: "hi".to_string(),
                sentiment: None,
                timestamp: Utc::now(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_sequence_numbers_increase() {
        let repo = MemoryRepository::new();
        repo.insert_session(&session("a")).await.unwrap();
        repo.insert_session(&session("b")).await.unwrap();

        let mut seqs = Vec::new();
        for id in ["a", "b", "a"] {
            let stored = repo
                .insert_message(NewMessage {
                    session_id: id.to_string(),
                    speaker: Speaker::User,
                    content: id.to_string(),
                    sentiment: None,
                    timestamp: Utc::now(),
                })
                .await
                .unwrap();
            seqs.push(stored.seq);
        }
        assert_eq!(seqs, [1, 2, 3]);
        assert_eq!(repo.list_messages("a").await.unwrap().len(), 2);
        assert!(repo.list_messages("zzz").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_orders_by_timestamp() {
        let repo = MemoryRepository::new();
        repo.insert_session(&session("a")).await.unwrap();

        let now = Utc::now();
        for (content, offset) in [("late", 10), ("early", 0)] {
            repo.insert_message(NewMessage {
                session_id: "a".to_string(),
                speaker: Speaker::User,
                content: content.to_string(),
                sentiment: None,
                timestamp: now + chrono::Duration::seconds(offset),
            })
            .await
            .unwrap();
        }

        let contents: Vec<_> = repo
            .list_messages("a")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, ["early", "late"]);
    }
}
