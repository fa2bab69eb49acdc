//! SQLite session repository.
//!
//! SQLite allows one writer at a time, so writes go through a single-connection
//! pool and are serialized; reads use a separate multi-connection pool. Both
//! run in WAL mode, so a committed append is visible to the next read.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};

use super::{NewMessage, SessionRepository, StoreError};
use crate::session::{Message, Session, Speaker};

/// sqlx/SQLite implementation of [`SessionRepository`].
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    reader: SqlitePool,
    writer: SqlitePool,
}

impl SqliteRepository {
    /// Open (creating if needed) the database and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let in_memory = database_url.contains(":memory:");

        let base_opts = SqliteConnectOptions::from_str(database_url)?
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);
        let base_opts = if in_memory {
            base_opts
        } else {
            base_opts.journal_mode(SqliteJournalMode::Wal)
        };

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(base_opts.clone())
            .await?;

        sqlx::migrate!("./migrations").run(&writer).await?;

        // A second pool on an in-memory URL would open a different database.
        let reader = if in_memory {
            writer.clone()
        } else {
            SqlitePoolOptions::new()
                .max_connections(8)
                .connect_with(base_opts.read_only(true))
                .await?
        };

        tracing::info!(name: "store.sqlite.ready", url = %database_url, "SQLite store ready");

        Ok(Self { reader, writer })
    }

    async fn fetch_session(
        pool: &SqlitePool,
        id: &str,
    ) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query("SELECT id, user_email, created_at, ended_at FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }
}

#[async_trait]
impl SessionRepository for SqliteRepository {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sessions (id, user_email, created_at, ended_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.user_email)
        .bind(format_datetime(&session.created_at))
        .bind(session.ended_at.as_ref().map(format_datetime))
        .execute(&self.writer)
        .await?;
        Ok(())
    }

    async fn find_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Self::fetch_session(&self.reader, id).await
    }

    async fn set_contact(&self, id: &str, email: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE sessions SET user_email = ? WHERE id = ?")
            .bind(email)
            .bind(id)
            .execute(&self.writer)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_ended(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        sqlx::query("UPDATE sessions SET ended_at = COALESCE(ended_at, ?) WHERE id = ?")
            .bind(format_datetime(&at))
            .bind(id)
            .execute(&self.writer)
            .await?;
        Self::fetch_session(&self.writer, id).await
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let result = sqlx::query(
            r"
            INSERT INTO messages (session_id, speaker, content, sentiment, timestamp)
            VALUES (?, ?, ?, ?, ?)
            ",
        )
        .bind(&message.session_id)
        .bind(message.speaker.as_str())
        .bind(&message.content)
        .bind(message.sentiment.map(f64::from))
        .bind(format_datetime(&message.timestamp))
        .execute(&self.writer)
        .await?;

        Ok(Message {
            seq: result.last_insert_rowid(),
            session_id: message.session_id,
            speaker: message.speaker,
            content: message.content,
            sentiment: message.sentiment,
            timestamp: message.timestamp,
        })
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT seq, session_id, speaker, content, sentiment, timestamp
            FROM messages
            WHERE session_id = ?
            ORDER BY timestamp ASC, seq ASC
            ",
        )
        .bind(session_id)
        .fetch_all(&self.reader)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn last_message(&self, session_id: &str) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT seq, session_id, speaker, content, sentiment, timestamp
            FROM messages
            WHERE session_id = ?
            ORDER BY timestamp DESC, seq DESC
            LIMIT 1
            ",
        )
        .bind(session_id)
        .fetch_optional(&self.reader)
        .await?;

        row.as_ref().map(message_from_row).transpose()
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn session_from_row(row: &SqliteRow) -> Result<Session, StoreError> {
    let created_at: String = row.try_get("created_at")?;
    let ended_at: Option<String> = row.try_get("ended_at")?;

    Ok(Session {
        id: row.try_get("id")?,
        user_email: row.try_get("user_email")?,
        created_at: parse_datetime(&created_at)?,
        ended_at: ended_at.as_deref().map(parse_datetime).transpose()?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message, StoreError> {
    let speaker: String = row.try_get("speaker")?;
    let timestamp: String = row.try_get("timestamp")?;
    let sentiment: Option<f64> = row.try_get("sentiment")?;

    Ok(Message {
        seq: row.try_get("seq")?,
        session_id: row.try_get("session_id")?,
        speaker: speaker.parse::<Speaker>().map_err(StoreError::Corrupt)?,
        content: row.try_get("content")?,
        sentiment: sentiment.map(|s| s as f32),
        timestamp: parse_datetime(&timestamp)?,
    })
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid timestamp '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(dir: &tempfile::TempDir) -> SqliteRepository {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        SqliteRepository::connect(&url).await.unwrap()
    }

    fn session(id: &str) -> Session {
        Session {
            id: id.to_string(),
            user_email: None,
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    fn new_message(session_id: &str, speaker: Speaker, content: &str) -> NewMessage {
        NewMessage {
            session_id: session_id.to_string(),
            speaker,
            content: content.to_string(),
            sentiment: match speaker {
                Speaker::User => Some(-0.25),
                Speaker::Assistant => Some(0.0),
            },
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open(&dir).await;

        let original = session("s1");
        repo.insert_session(&original).await.unwrap();

        let loaded = repo.find_session("s1").await.unwrap().unwrap();
        assert_eq!(loaded.id, "s1");
        assert_eq!(
            format_datetime(&loaded.created_at),
            format_datetime(&original.created_at)
        );
        assert!(loaded.ended_at.is_none());
        assert!(repo.find_session("s2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_messages_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open(&dir).await;
        repo.insert_session(&session("s1")).await.unwrap();

        for (speaker, content) in [
            (Speaker::User, "one"),
            (Speaker::Assistant, "two"),
            (Speaker::User, "three"),
            (Speaker::User, "four"),
        ] {
            repo.insert_message(new_message("s1", speaker, content))
                .await
                .unwrap();
        }

        let messages = repo.list_messages("s1").await.unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["one", "two", "three", "four"]);
        assert_eq!(messages[0].sentiment, Some(-0.25));
        assert_eq!(messages[1].speaker, Speaker::Assistant);
        assert_eq!(messages[1].sentiment, Some(0.0));

        let last = repo.last_message("s1").await.unwrap().unwrap();
        assert_eq!(last.content, "four");
    }

    #[tokio::test]
    async fn test_message_requires_existing_session() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open(&dir).await;

        let result = repo
            .insert_message(new_message("missing", Speaker::User, "hi"))
            .await;
        assert!(matches!(result, Err(StoreError::Database(_))));
    }

    #[tokio::test]
    async fn test_mark_ended_keeps_first_time() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open(&dir).await;
        repo.insert_session(&session("s1")).await.unwrap();

        let first = Utc::now();
        let ended = repo.mark_ended("s1", first).await.unwrap().unwrap();
        let second = repo
            .mark_ended("s1", first + chrono::Duration::hours(1))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(ended.ended_at, second.ended_at);
        assert!(repo.mark_ended("missing", first).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_contact() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open(&dir).await;
        repo.insert_session(&session("s1")).await.unwrap();

        assert!(repo.set_contact("s1", "me@example.com").await.unwrap());
        assert!(!repo.set_contact("s2", "me@example.com").await.unwrap());

        let loaded = repo.find_session("s1").await.unwrap().unwrap();
        assert_eq!(loaded.user_email.as_deref(), Some("me@example.com"));
    }

    #[tokio::test]
    async fn test_in_memory_url() {
        let repo = SqliteRepository::connect("sqlite::memory:").await.unwrap();
        repo.insert_session(&session("m")).await.unwrap();
        assert!(repo.find_session("m").await.unwrap().is_some());
    }
}
