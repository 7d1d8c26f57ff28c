//! Message service: encryption-aware access to the message store.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;

use crate::crypto::Cipher;

use super::models::{MessageEntity, MessageResponse, NewMessage};
use super::repository::MessageRepository;

/// The persistence seam consumed by the conversation hub.
///
/// Kept narrow so hub tests can substitute an in-memory store.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist one message, returning its assigned id. `read_by_receiver`
    /// records whether the receiver had a live connection at this moment.
    async fn create(
        &self,
        message: &str,
        sender_id: i64,
        receiver_id: i64,
        read_by_receiver: bool,
    ) -> Result<i64>;
}

/// Message service combining the repository with the at-rest cipher.
pub struct MessageService {
    repository: MessageRepository,
    cipher: Arc<dyn Cipher>,
}

impl MessageService {
    /// Create a new message service.
    pub fn new(repository: MessageRepository, cipher: Arc<dyn Cipher>) -> Self {
        Self { repository, cipher }
    }

    fn encrypt_body(&self, plaintext: &str) -> Result<String> {
        let ciphertext = self
            .cipher
            .encrypt(plaintext.as_bytes())
            .context("encrypting message")?;
        Ok(BASE64.encode(ciphertext))
    }

    fn decrypt_entity(&self, entity: MessageEntity) -> Result<MessageResponse> {
        let ciphertext = BASE64
            .decode(&entity.body)
            .context("decoding stored message body")?;
        let plaintext = self.cipher.decrypt(&ciphertext).context("decrypting message")?;
        let message = String::from_utf8(plaintext).context("stored message is not valid UTF-8")?;

        Ok(MessageResponse {
            id: entity.id,
            message,
            sender_id: entity.sender_id,
            read_by_sender: entity.read_by_sender,
            receiver_id: entity.receiver_id,
            read_by_receiver: entity.read_by_receiver,
            created_at: entity.created_at,
        })
    }

    /// All messages sent or received by a chatter, decrypted.
    pub async fn find_by_chatter(&self, chatter_id: i64) -> Result<Vec<MessageResponse>> {
        self.repository
            .find_by_chatter(chatter_id)
            .await?
            .into_iter()
            .map(|entity| self.decrypt_entity(entity))
            .collect()
    }

    /// All messages between two chatters, decrypted.
    pub async fn find_between(&self, first_id: i64, second_id: i64) -> Result<Vec<MessageResponse>> {
        self.repository
            .find_between(first_id, second_id)
            .await?
            .into_iter()
            .map(|entity| self.decrypt_entity(entity))
            .collect()
    }

    /// Number of messages from `with_id` that `for_id` has not read.
    pub async fn unread_count(&self, for_id: i64, with_id: i64) -> Result<i64> {
        self.repository.unread_count(for_id, with_id).await
    }

    /// Mark every message from `with_id` to `for_id` as read.
    pub async fn read_all(&self, for_id: i64, with_id: i64) -> Result<()> {
        self.repository.read_all(for_id, with_id).await
    }
}

#[async_trait]
impl MessageStore for MessageService {
    async fn create(
        &self,
        message: &str,
        sender_id: i64,
        receiver_id: i64,
        read_by_receiver: bool,
    ) -> Result<i64> {
        let body = self.encrypt_body(message)?;
        self.repository
            .create(&NewMessage {
                body,
                sender_id,
                receiver_id,
                read_by_receiver,
                created_at: Utc::now(),
            })
            .await
    }
}
