//! End-to-end WebSocket tests against a real listener.
//!
//! These run the full path: preflight token, HTTP upgrade, hub
//! registration, live fan-out and read/unread bookkeeping.

use std::future::IntoFuture;
use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use parley::api::AppState;
use parley::auth::Role;

mod common;
use common::{SUPPORT_CHATTER_ID, test_app};

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_app() -> (SocketAddr, AppState) {
    let app = test_app().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app.router).into_future());
    (addr, app.state)
}

/// Read frames until the next text frame, skipping keepalive traffic.
async fn next_message(ws: &mut WsClient) -> Value {
    loop {
        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("websocket error");

        match frame {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// An unknown preflight token rejects the upgrade with 428 before any
/// protocol switch.
#[tokio::test]
async fn test_upgrade_rejected_for_unknown_token() {
    let (addr, _state) = spawn_app().await;

    let err = connect_async(format!("ws://{addr}/api/chat?t=bogus"))
        .await
        .expect_err("upgrade should be rejected");

    match err {
        tungstenite::Error::Http(response) => {
            assert_eq!(response.status().as_u16(), 428);
        }
        other => panic!("expected an HTTP rejection, got {other:?}"),
    }
}

/// Preflight tokens are single-use: a token that authorized one upgrade
/// does not authorize a second.
#[tokio::test]
async fn test_preflight_token_is_single_use() {
    let (addr, state) = spawn_app().await;
    let token = state.preflight.create(2).unwrap();

    let (_ws, _) = connect_async(format!("ws://{addr}/api/chat?t={token}"))
        .await
        .expect("first upgrade should succeed");

    let err = connect_async(format!("ws://{addr}/api/chat?t={token}"))
        .await
        .expect_err("second upgrade should be rejected");

    match err {
        tungstenite::Error::Http(response) => {
            assert_eq!(response.status().as_u16(), 428);
        }
        other => panic!("expected an HTTP rejection, got {other:?}"),
    }
}

/// Full conversation: a chatter and the support admin exchange messages
/// live, and the read flags track who was connected when.
#[tokio::test]
async fn test_two_party_conversation() {
    let (addr, state) = spawn_app().await;

    // Chatter 1 is the support admin (user 1), chatter 2 the visitor.
    let support = state.chatters.create_for_user(1).await.unwrap();
    assert_eq!(support, SUPPORT_CHATTER_ID);
    let visitor = state.chatters.create_for_user(42).await.unwrap();

    // Visitor connects and speaks into an empty room.
    let visitor_preflight = state.preflight.create(visitor).unwrap();
    let (mut visitor_ws, _) = connect_async(format!("ws://{addr}/api/chat?t={visitor_preflight}"))
        .await
        .unwrap();

    visitor_ws
        .send(Message::Text("hello?  ".into()))
        .await
        .unwrap();

    let frame = next_message(&mut visitor_ws).await;
    assert_eq!(frame["message"], "hello?");
    assert_eq!(frame["senderId"], Value::from(visitor));
    assert_eq!(frame["receiverId"], Value::from(support));

    // Nobody on the support side yet, so the message stays unread.
    assert_eq!(
        state.messages.unread_count(support, visitor).await.unwrap(),
        1
    );

    // Support connects through the admin endpoint; the JWT rides in the
    // query string since upgrades cannot carry headers.
    let jwt = state
        .auth
        .generate_token(1, "admin@example.com", "Support Admin", Role::Admin)
        .unwrap();
    let admin_preflight = state.preflight.create(support).unwrap();
    let (mut admin_ws, _) = connect_async(format!(
        "ws://{addr}/api/admin/chat?t={admin_preflight}&with={visitor}&token={jwt}"
    ))
    .await
    .unwrap();

    // The admin's own frame proves their registration reached the hub.
    admin_ws
        .send(Message::Text("how can I help?".into()))
        .await
        .unwrap();
    let echo = next_message(&mut admin_ws).await;
    assert_eq!(echo["message"], "how can I help?");

    let relayed = next_message(&mut visitor_ws).await;
    assert_eq!(relayed["message"], "how can I help?");
    assert_eq!(relayed["senderId"], Value::from(support));
    assert_eq!(relayed["receiverId"], Value::from(visitor));
    // The visitor was connected, so the message was born read.
    assert_eq!(relayed["readByReceiver"], Value::from(true));

    // Now both sides are live; a visitor message lands pre-read too.
    visitor_ws
        .send(Message::Text("I need a hand".into()))
        .await
        .unwrap();
    let received = next_message(&mut admin_ws).await;
    assert_eq!(received["message"], "I need a hand");
    assert_eq!(received["readByReceiver"], Value::from(true));

    // Only the first, offline-delivered message is still unread.
    assert_eq!(
        state.messages.unread_count(support, visitor).await.unwrap(),
        1
    );
    assert_eq!(
        state.messages.unread_count(visitor, support).await.unwrap(),
        0
    );
}

/// A non-admin JWT cannot open the admin chat endpoint.
#[tokio::test]
async fn test_admin_upgrade_requires_admin_role() {
    let (addr, state) = spawn_app().await;

    let visitor = state.chatters.create_for_user(42).await.unwrap();
    let jwt = state
        .auth
        .generate_token(42, "user@example.com", "Test User", Role::User)
        .unwrap();
    let preflight = state.preflight.create(visitor).unwrap();

    let err = connect_async(format!(
        "ws://{addr}/api/admin/chat?t={preflight}&with=1&token={jwt}"
    ))
    .await
    .expect_err("non-admin upgrade should be rejected");

    match err {
        tungstenite::Error::Http(response) => {
            assert_eq!(response.status().as_u16(), 403);
        }
        other => panic!("expected an HTTP rejection, got {other:?}"),
    }
}
