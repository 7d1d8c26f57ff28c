//! API request handlers.

use axum::{
    Json,
    extract::{Query, State, WebSocketUpgrade, ws::WebSocket},
    http::StatusCode,
    response::Response,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::auth::{CurrentChatter, RequireAdmin};
use crate::chat::{ChatClient, ClientError, HubHandle};
use crate::chatter::ChatterWithUnread;
use crate::message::MessageResponse;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Health check endpoint.
///
/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreflightResponse {
    pub chatter_id: i64,
    pub token: String,
}

/// Issue a preflight token for the calling chatter. The token is later
/// presented as the `t` query parameter on the WebSocket upgrade.
///
/// GET /api/chat/preflight
pub async fn chat_preflight(
    State(state): State<AppState>,
    chatter: CurrentChatter,
) -> ApiResult<Json<PreflightResponse>> {
    let token = state.preflight.create(chatter.chatter_id)?;

    Ok(Json(PreflightResponse {
        chatter_id: chatter.chatter_id,
        token,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    t: Option<String>,
}

/// Upgrade to the chat WebSocket, conversing with the support chatter.
/// An unknown or expired preflight token rejects the request before any
/// upgrade happens.
///
/// GET /api/chat?t=<preflight token>
pub async fn connect_chat(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let token = query
        .t
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::bad_request("empty chat token parameter"))?;

    let chatter_id = state.preflight.consume(token)?;
    let hub = state.hubs.get_or_create(chatter_id, state.support_chatter_id);
    let cancel = state.shutdown.child_token();

    Ok(ws.on_upgrade(move |socket| run_chat_connection(socket, hub, chatter_id, cancel)))
}

#[derive(Debug, Deserialize)]
pub struct AdminConnectQuery {
    t: Option<String>,
    with: Option<i64>,
}

/// Admin variant of the chat upgrade: converses with an arbitrary
/// counterpart. The JWT rides in the `token` query parameter since
/// browsers cannot set headers on WebSocket upgrades.
///
/// GET /api/admin/chat?t=<preflight token>&with=<chatter id>
pub async fn connect_admin_chat(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Query(query): Query<AdminConnectQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let token = query
        .t
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::bad_request("empty chat token parameter"))?;
    let with = query
        .with
        .ok_or_else(|| ApiError::bad_request("missing 'with' parameter"))?;

    let chatter_id = state.preflight.consume(token)?;
    let hub = state.hubs.get_or_create(chatter_id, with);
    let cancel = state.shutdown.child_token();

    Ok(ws.on_upgrade(move |socket| run_chat_connection(socket, hub, chatter_id, cancel)))
}

/// Register the upgraded socket with its hub and pump it until it closes.
async fn run_chat_connection(
    socket: WebSocket,
    hub: HubHandle,
    chatter_id: i64,
    cancel: tokio_util::sync::CancellationToken,
) {
    let client = match ChatClient::connect(hub, socket, chatter_id).await {
        Ok(client) => client,
        Err(err) => {
            warn!(chatter_id, error = %err, "chat registration failed");
            return;
        }
    };

    match client.listen(cancel).await {
        Ok(()) | Err(ClientError::Cancelled) => {
            info!(chatter_id, "chat connection closed");
        }
        Err(err) => {
            info!(chatter_id, error = %err, "chat connection closed");
        }
    }
}

/// All messages sent or received by the calling chatter.
///
/// GET /api/messages
pub async fn list_messages(
    State(state): State<AppState>,
    chatter: CurrentChatter,
) -> ApiResult<Json<Vec<MessageResponse>>> {
    let messages = state.messages.find_by_chatter(chatter.chatter_id).await?;
    Ok(Json(messages))
}

/// Unread count from the support counterpart.
///
/// GET /api/messages/unread
pub async fn unread_count(
    State(state): State<AppState>,
    chatter: CurrentChatter,
) -> ApiResult<Json<i64>> {
    let count = state
        .messages
        .unread_count(chatter.chatter_id, state.support_chatter_id)
        .await?;
    Ok(Json(count))
}

/// Mark everything from the support counterpart as read.
///
/// GET /api/messages/read_all
pub async fn read_all(
    State(state): State<AppState>,
    chatter: CurrentChatter,
) -> ApiResult<StatusCode> {
    state
        .messages
        .read_all(chatter.chatter_id, state.support_chatter_id)
        .await?;
    Ok(StatusCode::OK)
}

/// Chatters who have written to the admin, with unread counts.
///
/// GET /api/admin/clients
pub async fn admin_clients(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
) -> ApiResult<Json<Vec<ChatterWithUnread>>> {
    let clients = state.chatters.senders_with_unread(admin.chatter_id).await?;
    Ok(Json(clients))
}

#[derive(Debug, Deserialize)]
pub struct WithQuery {
    with: i64,
}

/// History between the admin and a chosen counterpart.
///
/// GET /api/admin/messages?with=<chatter id>
pub async fn admin_messages(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Query(query): Query<WithQuery>,
) -> ApiResult<Json<Vec<MessageResponse>>> {
    let messages = state
        .messages
        .find_between(admin.chatter_id, query.with)
        .await?;
    Ok(Json(messages))
}

/// Unread count from a chosen counterpart.
///
/// GET /api/admin/messages/unread?with=<chatter id>
pub async fn admin_unread_count(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Query(query): Query<WithQuery>,
) -> ApiResult<Json<i64>> {
    let count = state
        .messages
        .unread_count(admin.chatter_id, query.with)
        .await?;
    Ok(Json(count))
}

/// Mark everything from a chosen counterpart as read.
///
/// GET /api/admin/messages/read_all?with=<chatter id>
pub async fn admin_read_all(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Query(query): Query<WithQuery>,
) -> ApiResult<StatusCode> {
    state
        .messages
        .read_all(admin.chatter_id, query.with)
        .await?;
    Ok(StatusCode::OK)
}
