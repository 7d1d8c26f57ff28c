//! Message data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A stored message row. `body` is the base64-encoded ciphertext.
#[derive(Debug, Clone, FromRow)]
pub struct MessageEntity {
    pub id: i64,
    pub body: String,
    pub sender_id: i64,
    pub read_by_sender: bool,
    pub receiver_id: i64,
    pub read_by_receiver: bool,
    pub created_at: DateTime<Utc>,
}

/// Parameters for inserting a message row.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Base64-encoded ciphertext.
    pub body: String,
    pub sender_id: i64,
    pub receiver_id: i64,
    /// Set when the receiver had a live connection at persistence time.
    pub read_by_receiver: bool,
    pub created_at: DateTime<Utc>,
}

/// A message as served to clients, over both HTTP and the live socket.
/// `message` is plaintext at this boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: i64,
    pub message: String,
    pub sender_id: i64,
    pub read_by_sender: bool,
    pub receiver_id: i64,
    pub read_by_receiver: bool,
    pub created_at: DateTime<Utc>,
}
