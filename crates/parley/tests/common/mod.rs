//! Test utilities and common setup.

use std::sync::Arc;

use axum::Router;
use tokio_util::sync::CancellationToken;

use parley::api::{self, AppState};
use parley::auth::{AuthConfig, AuthState, Role};
use parley::chat::HubManager;
use parley::chatter::ChatterRepository;
use parley::crypto::MessageCipher;
use parley::db::Database;
use parley::message::{MessageRepository, MessageService, MessageStore};

pub const TEST_JWT_SECRET: &str = "test-secret-for-integration-tests-minimum-32-chars";

/// The support counterpart used by the non-admin surface in tests.
pub const SUPPORT_CHATTER_ID: i64 = 1;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

/// Create a test application with all services on an in-memory database.
pub async fn test_app() -> TestApp {
    let db = Database::in_memory().await.unwrap();

    let auth_state = AuthState::new(AuthConfig {
        jwt_secret: Some(TEST_JWT_SECRET.to_string()),
        ..AuthConfig::default()
    });

    let messages = Arc::new(MessageService::new(
        MessageRepository::new(db.pool().clone()),
        Arc::new(MessageCipher::new("integration test secret")),
    ));
    let chatters = Arc::new(ChatterRepository::new(db.pool().clone()));

    let shutdown = CancellationToken::new();
    let store: Arc<dyn MessageStore> = messages.clone();
    let hubs = Arc::new(HubManager::new(store, shutdown.child_token()));

    let state = AppState::new(
        messages,
        chatters,
        hubs,
        auth_state,
        SUPPORT_CHATTER_ID,
        shutdown,
    );

    TestApp {
        router: api::create_router(state.clone()),
        state,
    }
}

/// Mint a JWT for a regular user.
pub fn user_token(state: &AppState, user_id: i64) -> String {
    state
        .auth
        .generate_token(user_id, "user@example.com", "Test User", Role::User)
        .unwrap()
}

/// Mint a JWT for an admin user.
pub fn admin_token(state: &AppState, user_id: i64) -> String {
    state
        .auth
        .generate_token(user_id, "admin@example.com", "Support Admin", Role::Admin)
        .unwrap()
}
