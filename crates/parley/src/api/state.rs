//! Application state shared across handlers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::AuthState;
use crate::chat::{HubManager, PreflightTokens};
use crate::chatter::ChatterRepository;
use crate::message::MessageService;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Message service (encryption-aware persistence and history).
    pub messages: Arc<MessageService>,
    /// Chatter identity repository.
    pub chatters: Arc<ChatterRepository>,
    /// Registry of live conversation hubs.
    pub hubs: Arc<HubManager>,
    /// Preflight tokens authorizing WebSocket upgrades.
    pub preflight: Arc<PreflightTokens>,
    /// Authentication state.
    pub auth: AuthState,
    /// Counterpart for the non-admin chat surface (the support chatter).
    pub support_chatter_id: i64,
    /// Process-level shutdown token; per-connection contexts are parented
    /// on it.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        messages: Arc<MessageService>,
        chatters: Arc<ChatterRepository>,
        hubs: Arc<HubManager>,
        auth: AuthState,
        support_chatter_id: i64,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            messages,
            chatters,
            hubs,
            preflight: Arc::new(PreflightTokens::new()),
            auth,
            support_chatter_id,
            shutdown,
        }
    }
}
