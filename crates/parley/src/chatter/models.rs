//! Chatter data models.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// A chat participant.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chatter {
    pub id: i64,
    /// Registered user backing this chatter, if any.
    pub user_id: Option<i64>,
    /// Anonymous session backing this chatter, if any.
    pub temp_session: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Chatter {
    /// Whether this chatter is an anonymous (session-only) participant.
    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }
}

/// A chatter together with the number of their messages the queried
/// receiver has not read yet. Returned by the admin client listing.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatterWithUnread {
    pub id: i64,
    pub user_id: Option<i64>,
    pub temp_session: Option<String>,
    pub created_at: DateTime<Utc>,
    pub unread_count: i64,
}
