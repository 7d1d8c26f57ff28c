//! Chat participant identity.
//!
//! A chatter is the stable participant identity used throughout the chat
//! service. It is backed either by a registered user id (validated via JWT)
//! or by an anonymous browser session cookie.

mod models;
mod repository;

pub use models::{Chatter, ChatterWithUnread};
pub use repository::ChatterRepository;
