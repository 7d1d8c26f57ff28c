//! Chat message persistence.
//!
//! Message bodies are encrypted before storage and decrypted after
//! retrieval; only the read flags mutate after a row is created.

mod models;
mod repository;
mod service;

pub use models::{MessageEntity, MessageResponse, NewMessage};
pub use repository::MessageRepository;
pub use service::{MessageService, MessageStore};
