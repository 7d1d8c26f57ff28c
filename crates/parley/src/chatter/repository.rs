//! Chatter repository for database operations.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use super::models::{Chatter, ChatterWithUnread};

/// Repository for chatter database operations.
#[derive(Debug, Clone)]
pub struct ChatterRepository {
    pool: SqlitePool,
}

impl ChatterRepository {
    /// Create a new chatter repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a chatter backed by a registered user.
    #[instrument(skip(self))]
    pub async fn create_for_user(&self, user_id: i64) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO chatters (user_id, temp_session, created_at)
            VALUES (?, NULL, ?)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .context("inserting user chatter")?;

        debug!(chatter_id = id, user_id, "created chatter for user");
        Ok(id)
    }

    /// Create an anonymous chatter backed by a session string.
    #[instrument(skip(self, session))]
    pub async fn create_for_session(&self, session: &str) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO chatters (user_id, temp_session, created_at)
            VALUES (NULL, ?, ?)
            RETURNING id
            "#,
        )
        .bind(session)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .context("inserting session chatter")?;

        debug!(chatter_id = id, "created anonymous chatter");
        Ok(id)
    }

    /// Get a chatter by its id.
    #[instrument(skip(self))]
    pub async fn find_by_id(&self, chatter_id: i64) -> Result<Option<Chatter>> {
        let chatter = sqlx::query_as::<_, Chatter>(
            r#"
            SELECT id, user_id, temp_session, created_at
            FROM chatters
            WHERE id = ?
            "#,
        )
        .bind(chatter_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching chatter by id")?;

        Ok(chatter)
    }

    /// Get a chatter by the user backing it.
    #[instrument(skip(self))]
    pub async fn find_by_user_id(&self, user_id: i64) -> Result<Option<Chatter>> {
        let chatter = sqlx::query_as::<_, Chatter>(
            r#"
            SELECT id, user_id, temp_session, created_at
            FROM chatters
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching chatter by user id")?;

        Ok(chatter)
    }

    /// Get a chatter by its anonymous session string.
    #[instrument(skip(self, session))]
    pub async fn find_by_session(&self, session: &str) -> Result<Option<Chatter>> {
        let chatter = sqlx::query_as::<_, Chatter>(
            r#"
            SELECT id, user_id, temp_session, created_at
            FROM chatters
            WHERE temp_session = ?
            "#,
        )
        .bind(session)
        .fetch_optional(&self.pool)
        .await
        .context("fetching chatter by session")?;

        Ok(chatter)
    }

    /// Attach a user id to an anonymous chatter, clearing its session.
    ///
    /// Lets a visitor keep their chat history after signing in.
    #[instrument(skip(self, session))]
    pub async fn promote_session(&self, session: &str, user_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE chatters
            SET user_id = ?, temp_session = NULL
            WHERE temp_session = ?
            "#,
        )
        .bind(user_id)
        .bind(session)
        .execute(&self.pool)
        .await
        .context("promoting session chatter")?;

        Ok(())
    }

    /// List every chatter who has written to `chatter_id`, each with the
    /// number of their messages `chatter_id` has not read yet.
    #[instrument(skip(self))]
    pub async fn senders_with_unread(&self, chatter_id: i64) -> Result<Vec<ChatterWithUnread>> {
        let senders = sqlx::query_as::<_, ChatterWithUnread>(
            r#"
            SELECT DISTINCT c.id, c.user_id, c.temp_session, c.created_at,
                (
                    SELECT COUNT(*)
                    FROM messages
                    WHERE receiver_id = ? AND sender_id = c.id AND read_by_receiver = 0
                ) AS unread_count
            FROM chatters c
            JOIN messages m ON m.sender_id = c.id
            WHERE m.receiver_id = ?
            ORDER BY c.id
            "#,
        )
        .bind(chatter_id)
        .bind(chatter_id)
        .fetch_all(&self.pool)
        .await
        .context("listing senders with unread counts")?;

        Ok(senders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::message::{MessageRepository, NewMessage};

    async fn test_repos() -> (ChatterRepository, MessageRepository) {
        let db = Database::in_memory().await.unwrap();
        (
            ChatterRepository::new(db.pool().clone()),
            MessageRepository::new(db.pool().clone()),
        )
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let (chatters, _) = test_repos().await;

        let id = chatters.create_for_user(42).await.unwrap();
        let found = chatters.find_by_user_id(42).await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert!(!found.is_anonymous());

        assert!(chatters.find_by_user_id(99).await.unwrap().is_none());
        assert_eq!(chatters.find_by_id(id).await.unwrap().unwrap().id, id);
    }

    #[tokio::test]
    async fn test_session_chatter_and_promotion() {
        let (chatters, _) = test_repos().await;

        let id = chatters.create_for_session("session-abc").await.unwrap();
        let found = chatters.find_by_session("session-abc").await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert!(found.is_anonymous());

        chatters.promote_session("session-abc", 42).await.unwrap();

        // The session is gone, the user id took its place.
        assert!(chatters.find_by_session("session-abc").await.unwrap().is_none());
        let promoted = chatters.find_by_user_id(42).await.unwrap().unwrap();
        assert_eq!(promoted.id, id);
    }

    #[tokio::test]
    async fn test_senders_with_unread() {
        let (chatters, messages) = test_repos().await;

        let support = chatters.create_for_user(1).await.unwrap();
        let alice = chatters.create_for_user(10).await.unwrap();
        let bob = chatters.create_for_user(20).await.unwrap();
        // Carol never writes to support.
        let _carol = chatters.create_for_user(30).await.unwrap();

        let insert = |sender_id, receiver_id, read_by_receiver| NewMessage {
            body: "opaque".to_string(),
            sender_id,
            receiver_id,
            read_by_receiver,
            created_at: chrono::Utc::now(),
        };

        messages.create(&insert(alice, support, false)).await.unwrap();
        messages.create(&insert(alice, support, false)).await.unwrap();
        messages.create(&insert(bob, support, true)).await.unwrap();

        let senders = chatters.senders_with_unread(support).await.unwrap();
        assert_eq!(senders.len(), 2);
        assert_eq!(senders[0].id, alice);
        assert_eq!(senders[0].unread_count, 2);
        assert_eq!(senders[1].id, bob);
        assert_eq!(senders[1].unread_count, 0);
    }
}
