//! Message repository for database operations.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::instrument;

use super::models::{MessageEntity, NewMessage};

/// Repository for message database operations.
#[derive(Debug, Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    /// Create a new message repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a message row, returning its assigned id.
    #[instrument(skip(self, message))]
    pub async fn create(&self, message: &NewMessage) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO messages (body, sender_id, receiver_id, read_by_receiver, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&message.body)
        .bind(message.sender_id)
        .bind(message.receiver_id)
        .bind(message.read_by_receiver)
        .bind(message.created_at)
        .fetch_one(&self.pool)
        .await
        .context("inserting message")?;

        Ok(id)
    }

    /// All messages sent or received by a chatter, oldest first.
    #[instrument(skip(self))]
    pub async fn find_by_chatter(&self, chatter_id: i64) -> Result<Vec<MessageEntity>> {
        let messages = sqlx::query_as::<_, MessageEntity>(
            r#"
            SELECT id, body, sender_id, read_by_sender, receiver_id, read_by_receiver, created_at
            FROM messages
            WHERE sender_id = ? OR receiver_id = ?
            ORDER BY created_at
            "#,
        )
        .bind(chatter_id)
        .bind(chatter_id)
        .fetch_all(&self.pool)
        .await
        .context("fetching messages by chatter")?;

        Ok(messages)
    }

    /// All messages exchanged between two chatters, in either direction,
    /// oldest first.
    #[instrument(skip(self))]
    pub async fn find_between(&self, first_id: i64, second_id: i64) -> Result<Vec<MessageEntity>> {
        let messages = sqlx::query_as::<_, MessageEntity>(
            r#"
            SELECT id, body, sender_id, read_by_sender, receiver_id, read_by_receiver, created_at
            FROM messages
            WHERE (sender_id = ?1 AND receiver_id = ?2)
               OR (receiver_id = ?1 AND sender_id = ?2)
            ORDER BY created_at
            "#,
        )
        .bind(first_id)
        .bind(second_id)
        .fetch_all(&self.pool)
        .await
        .context("fetching messages between chatters")?;

        Ok(messages)
    }

    /// Number of messages from `with_id` that `for_id` has not read.
    #[instrument(skip(self))]
    pub async fn unread_count(&self, for_id: i64, with_id: i64) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM messages
            WHERE receiver_id = ? AND sender_id = ? AND read_by_receiver = 0
            "#,
        )
        .bind(for_id)
        .bind(with_id)
        .fetch_one(&self.pool)
        .await
        .context("counting unread messages")?;

        Ok(count)
    }

    /// Mark every message from `with_id` to `for_id` as read.
    #[instrument(skip(self))]
    pub async fn read_all(&self, for_id: i64, with_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE messages
            SET read_by_receiver = 1
            WHERE receiver_id = ? AND sender_id = ? AND read_by_receiver = 0
            "#,
        )
        .bind(for_id)
        .bind(with_id)
        .execute(&self.pool)
        .await
        .context("marking messages read")?;

        Ok(())
    }
}
