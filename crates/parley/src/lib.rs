//! Parley backend library.
//!
//! Core components of the two-party support-chat backend: the real-time
//! relay (`chat`), persistence (`chatter`, `message`, `db`), the at-rest
//! cipher (`crypto`), authentication (`auth`) and the HTTP layer (`api`).

pub mod api;
pub mod auth;
pub mod chat;
pub mod chatter;
pub mod crypto;
pub mod db;
pub mod message;
