//! API route definitions.

use axum::http::{HeaderValue, Method, header};
use axum::{Router, middleware, routing::get};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth::chatter_auth;

use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Everything on the chatter surface resolves to a chatter identity
    // first; the admin handlers add their own role gate on top.
    let chatter_routes = Router::new()
        .route("/api/chat/preflight", get(handlers::chat_preflight))
        .route("/api/messages", get(handlers::list_messages))
        .route("/api/messages/unread", get(handlers::unread_count))
        .route("/api/messages/read_all", get(handlers::read_all))
        .route("/api/admin/chat", get(handlers::connect_admin_chat))
        .route("/api/admin/clients", get(handlers::admin_clients))
        .route("/api/admin/messages", get(handlers::admin_messages))
        .route(
            "/api/admin/messages/unread",
            get(handlers::admin_unread_count),
        )
        .route(
            "/api/admin/messages/read_all",
            get(handlers::admin_read_all),
        )
        .layer(middleware::from_fn_with_state(state.clone(), chatter_auth));

    Router::new()
        .route("/health", get(handlers::health))
        // The upgrade itself is authorized by the preflight token alone.
        .route("/api/chat", get(handlers::connect_chat))
        .merge(chatter_routes)
        .layer(trace_layer)
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .auth
        .allowed_origins()
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(AllowOrigin::any())
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
    }
}
