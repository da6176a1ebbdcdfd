//! Message persistence with ordered retrieval and unread tracking.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::Message;

/// Page size when the caller does not ask for one.
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
const MAX_HISTORY_LIMIT: u32 = 200;

type MessageRow = (i64, String, String, String, String, String, Option<String>);

pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        // seq is the store-wide monotonic ordering key; AUTOINCREMENT keeps
        // it strictly increasing even across deletes (which never happen).
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                sender_id TEXT NOT NULL,
                receiver_id TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                read_at TEXT,
                FOREIGN KEY (sender_id) REFERENCES users(id),
                FOREIGN KEY (receiver_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_pair
             ON messages(sender_id, receiver_id, seq)",
        )
        .execute(&pool)
        .await?;

        info!("[Messages] store initialized");
        Ok(Self { pool })
    }

    /// Persist a message. Content is trimmed; blank content is refused
    /// before anything touches the database.
    pub async fn append(&self, sender: Uuid, receiver: Uuid, content: &str) -> Result<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(Error::EmptyContent);
        }

        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let created_raw = created_at.to_rfc3339();

        let seq = super::retry_once(|| async {
            sqlx::query(
                "INSERT INTO messages (id, sender_id, receiver_id, content, created_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(id.to_string())
            .bind(sender.to_string())
            .bind(receiver.to_string())
            .bind(content)
            .bind(&created_raw)
            .execute(&self.pool)
            .await
            .map(|r| r.last_insert_rowid())
        })
        .await?;

        Ok(Message {
            id,
            seq,
            sender_id: sender,
            receiver_id: receiver,
            content: content.to_string(),
            created_at,
            read_at: None,
        })
    }

    /// Messages between the pair in ascending chronological order. The page
    /// ends just before the `before` cursor (a seq value) and holds at most
    /// `limit` messages, so walking backwards restarts cleanly from any
    /// cursor.
    pub async fn history(
        &self,
        a: Uuid,
        b: Uuid,
        limit: Option<u32>,
        before: Option<i64>,
    ) -> Result<Vec<Message>> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT) as i64;
        let before = before.unwrap_or(i64::MAX);

        let rows: Vec<MessageRow> = super::retry_once(|| async {
            sqlx::query_as(
                "SELECT seq, id, sender_id, receiver_id, content, created_at, read_at
                 FROM messages
                 WHERE seq < ?3
                   AND ((sender_id = ?1 AND receiver_id = ?2)
                     OR (sender_id = ?2 AND receiver_id = ?1))
                 ORDER BY seq DESC
                 LIMIT ?4",
            )
            .bind(a.to_string())
            .bind(b.to_string())
            .bind(before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        })
        .await?;

        let mut messages: Vec<Message> = rows.into_iter().map(row_to_message).collect();
        messages.reverse();
        Ok(messages)
    }

    /// Newest message between the pair, if any.
    pub async fn last_message(&self, a: Uuid, b: Uuid) -> Result<Option<Message>> {
        let row: Option<MessageRow> = super::retry_once(|| async {
            sqlx::query_as(
                "SELECT seq, id, sender_id, receiver_id, content, created_at, read_at
                 FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY seq DESC
                 LIMIT 1",
            )
            .bind(a.to_string())
            .bind(b.to_string())
            .fetch_optional(&self.pool)
            .await
        })
        .await?;

        Ok(row.map(row_to_message))
    }

    /// Count of messages from peer to user not yet marked read.
    pub async fn unread_count(&self, user: Uuid, peer: Uuid) -> Result<i64> {
        let (count,): (i64,) = super::retry_once(|| async {
            sqlx::query_as(
                "SELECT COUNT(*) FROM messages
                 WHERE receiver_id = ? AND sender_id = ? AND read_at IS NULL",
            )
            .bind(user.to_string())
            .bind(peer.to_string())
            .fetch_one(&self.pool)
            .await
        })
        .await?;

        Ok(count)
    }

    /// Mark everything from peer to user as read. Idempotent: already-read
    /// rows keep their original read_at.
    pub async fn mark_read(&self, user: Uuid, peer: Uuid) -> Result<u64> {
        let read_at = Utc::now().to_rfc3339();

        let updated = super::retry_once(|| async {
            sqlx::query(
                "UPDATE messages SET read_at = ?
                 WHERE receiver_id = ? AND sender_id = ? AND read_at IS NULL",
            )
            .bind(&read_at)
            .bind(user.to_string())
            .bind(peer.to_string())
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected())
        })
        .await?;

        Ok(updated)
    }

    /// Every peer this user has exchanged at least one message with.
    pub async fn message_peers(&self, user: Uuid) -> Result<Vec<Uuid>> {
        let rows: Vec<(String,)> = super::retry_once(|| async {
            sqlx::query_as(
                "SELECT DISTINCT CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END
                 FROM messages
                 WHERE sender_id = ?1 OR receiver_id = ?1",
            )
            .bind(user.to_string())
            .fetch_all(&self.pool)
            .await
        })
        .await?;

        Ok(rows.into_iter().map(|(id,)| super::parse_uuid(&id)).collect())
    }
}

fn row_to_message(
    (seq, id, sender_id, receiver_id, content, created_at, read_at): MessageRow,
) -> Message {
    Message {
        id: super::parse_uuid(&id),
        seq,
        sender_id: super::parse_uuid(&sender_id),
        receiver_id: super::parse_uuid(&receiver_id),
        content,
        created_at: super::parse_timestamp(&created_at),
        read_at: read_at.as_deref().map(super::parse_timestamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, MessageStore) {
        let dir = TempDir::new().unwrap();
        // Store-level tests use synthetic user ids with no users table, so
        // the fixture pool runs with foreign-key enforcement off.
        let options = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(dir.path().join("messenger.sqlite"))
            .create_if_missing(true)
            .foreign_keys(false);
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .unwrap();
        let store = MessageStore::new(pool).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn append_rejects_blank_content() {
        let (_dir, store) = store().await;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(matches!(store.append(a, b, "").await, Err(Error::EmptyContent)));
        assert!(matches!(store.append(a, b, "   ").await, Err(Error::EmptyContent)));
        assert!(store.history(a, b, None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_round_trips_in_insertion_order() {
        let (_dir, store) = store().await;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        store.append(a, b, "one").await.unwrap();
        store.append(b, a, "two").await.unwrap();
        store.append(a, b, "three").await.unwrap();

        let history = store.history(a, b, None, None).await.unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
        assert_eq!(history[0].sender_id, a);
        assert_eq!(history[1].sender_id, b);
        assert!(history.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn history_pages_backwards_via_cursor() {
        let (_dir, store) = store().await;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        for i in 0..5 {
            store.append(a, b, &format!("m{}", i)).await.unwrap();
        }

        let newest = store.history(a, b, Some(2), None).await.unwrap();
        let contents: Vec<_> = newest.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);

        let older = store
            .history(a, b, Some(2), Some(newest[0].seq))
            .await
            .unwrap();
        let contents: Vec<_> = older.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn mark_read_is_idempotent() {
        let (_dir, store) = store().await;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        store.append(a, b, "hello").await.unwrap();
        store.append(a, b, "again").await.unwrap();
        assert_eq!(store.unread_count(b, a).await.unwrap(), 2);
        // the sender has nothing unread
        assert_eq!(store.unread_count(a, b).await.unwrap(), 0);

        assert_eq!(store.mark_read(b, a).await.unwrap(), 2);
        assert_eq!(store.unread_count(b, a).await.unwrap(), 0);

        assert_eq!(store.mark_read(b, a).await.unwrap(), 0);
        assert_eq!(store.unread_count(b, a).await.unwrap(), 0);
    }
}
