//! Conversation relay integration tests.
//!
//! These drive the hub registry and hub event loops directly, standing in
//! for real sockets with plain channel endpoints, so routing, presence and
//! teardown behavior can be asserted without a WebSocket in the loop.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use parley::chat::{ClientHandle, HubHandle, HubManager, InboundMessage};
use parley::crypto::MessageCipher;
use parley::db::Database;
use parley::message::{MessageRepository, MessageResponse, MessageService, MessageStore};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
struct StoredMessage {
    body: String,
    sender_id: i64,
    receiver_id: i64,
    read_by_receiver: bool,
}

/// In-memory stand-in for the message store, with a switch to simulate
/// persistence failure.
struct RecordingStore {
    next_id: AtomicI64,
    records: Mutex<Vec<StoredMessage>>,
    fail: AtomicBool,
}

impl RecordingStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI64::new(1),
            records: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    fn records(&self) -> Vec<StoredMessage> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageStore for RecordingStore {
    async fn create(
        &self,
        message: &str,
        sender_id: i64,
        receiver_id: i64,
        read_by_receiver: bool,
    ) -> Result<i64> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("database is gone"));
        }

        self.records.lock().unwrap().push(StoredMessage {
            body: message.to_string(),
            sender_id,
            receiver_id,
            read_by_receiver,
        });
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

/// A registered connection endpoint, as the hub sees it.
struct FakeClient {
    conn_id: Uuid,
    rx: mpsc::Receiver<Arc<MessageResponse>>,
}

impl FakeClient {
    async fn join(hub: &HubHandle, chatter_id: i64) -> Self {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(16);
        hub.register(ClientHandle {
            conn_id,
            chatter_id,
            sender: tx,
        })
        .await
        .expect("hub should accept registration");
        Self { conn_id, rx }
    }

    async fn recv(&mut self) -> Arc<MessageResponse> {
        timeout(RECV_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("outbound queue closed unexpectedly")
    }

    fn try_recv(&mut self) -> Option<Arc<MessageResponse>> {
        self.rx.try_recv().ok()
    }
}

async fn send(hub: &HubHandle, sender_id: i64, body: &str) {
    hub.submit(InboundMessage {
        sender_id,
        body: body.to_string(),
    })
    .await
    .expect("hub should accept the message");
}

/// A message sent while the receiver has no live connection is persisted
/// unread; once the receiver connects, it is persisted as already read.
#[tokio::test]
async fn test_read_flag_tracks_receiver_presence() {
    let store = RecordingStore::new();
    let manager = HubManager::new(store.clone(), CancellationToken::new());
    let hub = manager.get_or_create(1, 2);

    let mut alice = FakeClient::join(&hub, 1).await;
    send(&hub, 1, "anyone home?").await;
    let frame = alice.recv().await;
    assert!(!frame.read_by_receiver);

    let mut bob = FakeClient::join(&hub, 2).await;
    send(&hub, 1, "there you are").await;
    alice.recv().await;
    assert_eq!(bob.recv().await.message, "there you are");

    let records = store.records();
    assert_eq!(records.len(), 2);
    assert!(!records[0].read_by_receiver);
    assert!(records[1].read_by_receiver);
    assert_eq!(records[1].receiver_id, 2);
}

/// Both participants connected: the receiver gets exactly one frame with
/// the canonical sender/receiver ids, and so does the sender's own
/// connection.
#[tokio::test]
async fn test_broadcast_frame_contents() {
    let store = RecordingStore::new();
    let manager = HubManager::new(store, CancellationToken::new());
    let hub = manager.get_or_create(1, 2);

    let mut alice = FakeClient::join(&hub, 1).await;
    let mut bob = FakeClient::join(&hub, 2).await;

    send(&hub, 1, "hi").await;

    let frame = bob.recv().await;
    assert_eq!(frame.message, "hi");
    assert_eq!(frame.sender_id, 1);
    assert_eq!(frame.receiver_id, 2);
    assert!(frame.id > 0);

    let echo = alice.recv().await;
    assert_eq!(echo.message, "hi");

    // Exactly one frame each.
    assert!(bob.try_recv().is_none());
    assert!(alice.try_recv().is_none());
}

/// A second connection of the same participant also receives the fan-out.
#[tokio::test]
async fn test_broadcast_reaches_all_connections_of_a_participant() {
    let store = RecordingStore::new();
    let manager = HubManager::new(store, CancellationToken::new());
    let hub = manager.get_or_create(1, 2);

    let mut first = FakeClient::join(&hub, 1).await;
    let mut second = FakeClient::join(&hub, 1).await;

    send(&hub, 1, "hello from my phone").await;

    assert_eq!(first.recv().await.message, "hello from my phone");
    assert_eq!(second.recv().await.message, "hello from my phone");
}

/// Messages never leak into a different conversation.
#[tokio::test]
async fn test_broadcast_is_scoped_to_one_conversation() {
    let store = RecordingStore::new();
    let manager = HubManager::new(store, CancellationToken::new());
    let support_chat = manager.get_or_create(1, 2);
    let other_chat = manager.get_or_create(1, 3);

    let mut bob = FakeClient::join(&support_chat, 2).await;
    let mut carol = FakeClient::join(&other_chat, 3).await;

    send(&support_chat, 1, "for bob only").await;

    assert_eq!(bob.recv().await.message, "for bob only");
    assert!(carol.try_recv().is_none());
}

/// The hub loop ends exactly when the last connection unregisters, and
/// the next request for the pair builds a brand-new hub instance.
#[tokio::test]
async fn test_hub_lifecycle() {
    let store = RecordingStore::new();
    let manager = HubManager::new(store, CancellationToken::new());
    let hub = manager.get_or_create(1, 2);

    let alice = FakeClient::join(&hub, 1).await;
    let bob = FakeClient::join(&hub, 2).await;
    assert_eq!(manager.active(), 1);

    hub.unregister(alice.conn_id).await.unwrap();
    // One connection remains; the conversation must stay up.
    tokio::task::yield_now().await;
    assert_eq!(manager.active(), 1);

    hub.unregister(bob.conn_id).await.unwrap();
    while manager.active() != 0 {
        tokio::task::yield_now().await;
    }

    let replacement = manager.get_or_create(2, 1);
    assert_ne!(hub.instance(), replacement.instance());
}

/// A persistence failure tears down the whole conversation: the loop
/// exits, the registry entry disappears, and orphaned connections observe
/// their queues closing.
#[tokio::test]
async fn test_persistence_failure_ends_conversation() {
    let store = RecordingStore::new();
    let manager = HubManager::new(store.clone(), CancellationToken::new());
    let hub = manager.get_or_create(1, 2);

    let mut bob = FakeClient::join(&hub, 2).await;

    store.fail.store(true, Ordering::SeqCst);
    send(&hub, 1, "this will not persist").await;

    // The hub drops its end of the outbound queue on the way out.
    let closed = timeout(RECV_TIMEOUT, bob.rx.recv())
        .await
        .expect("timed out waiting for queue closure");
    assert!(closed.is_none());

    while manager.active() != 0 {
        tokio::task::yield_now().await;
    }

    // Later submissions fail instead of blocking on a dead hub.
    assert!(
        hub.submit(InboundMessage {
            sender_id: 1,
            body: "anyone?".to_string(),
        })
        .await
        .is_err()
    );
}

/// End-to-end over the real store: participant 1 sends "hello" while
/// participant 2 is offline; 2 later sees one unread message from 1 and
/// mark-all-read clears it.
#[tokio::test]
async fn test_offline_receiver_unread_roundtrip() {
    let db = Database::in_memory().await.unwrap();
    let service = Arc::new(MessageService::new(
        MessageRepository::new(db.pool().clone()),
        Arc::new(MessageCipher::new("relay test secret")),
    ));

    let store: Arc<dyn MessageStore> = service.clone();
    let manager = HubManager::new(store, CancellationToken::new());
    let hub = manager.get_or_create(1, 2);

    let mut alice = FakeClient::join(&hub, 1).await;
    send(&hub, 1, "hello").await;
    // The fan-out frame doubles as the persistence barrier.
    assert_eq!(alice.recv().await.message, "hello");

    assert_eq!(service.unread_count(2, 1).await.unwrap(), 1);

    let history = service.find_by_chatter(2).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message, "hello");
    assert!(!history[0].read_by_receiver);

    service.read_all(2, 1).await.unwrap();
    assert_eq!(service.unread_count(2, 1).await.unwrap(), 0);
}
