//! The per-conversation actor.
//!
//! One hub owns all mutable state for one conversation: the set of
//! registered connections, message routing and presence. Its event loop is
//! the single consumer of three queues; every other task interacts with
//! the conversation exclusively by sending into them, so the client set
//! needs no lock at all.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::message::{MessageResponse, MessageStore};

/// Capacity of each of the hub's inbox queues.
const HUB_QUEUE_SIZE: usize = 32;

/// Canonical identifier of an unordered participant pair. `(a, b)` and
/// `(b, a)` produce the same key, so at most one live hub exists per pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    first: i64,
    second: i64,
}

impl ConversationKey {
    pub fn new(a: i64, b: i64) -> Self {
        Self {
            first: a.min(b),
            second: a.max(b),
        }
    }

    /// The other participant of the pair, or `None` for a chatter id that
    /// is not part of this conversation.
    pub fn counterpart(&self, chatter_id: i64) -> Option<i64> {
        if chatter_id == self.first {
            Some(self.second)
        } else if chatter_id == self.second {
            Some(self.first)
        } else {
            None
        }
    }

    pub fn contains(&self, chatter_id: i64) -> bool {
        chatter_id == self.first || chatter_id == self.second
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.first, self.second)
    }
}

/// Why a hub's event loop stopped.
#[derive(Debug, Error)]
pub enum HubError {
    /// Cooperative shutdown, not a true failure.
    #[error("conversation cancelled")]
    Cancelled,

    /// Persisting a message failed. Fatal to the whole conversation:
    /// remaining clients observe queue closure and exit on their own.
    #[error("persisting chat message")]
    Persistence(#[source] anyhow::Error),
}

/// Error for submissions to a hub whose event loop no longer consumes.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("conversation hub is closed")]
pub struct HubClosed;

/// An inbound frame from one client. The receiver is resolved by the hub,
/// not trusted from the sender.
#[derive(Debug)]
pub struct InboundMessage {
    pub sender_id: i64,
    pub body: String,
}

/// The hub-side endpoint of one registered connection.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub conn_id: Uuid,
    pub chatter_id: i64,
    /// The connection's outbound queue; fan-out pushes here.
    pub sender: mpsc::Sender<Arc<MessageResponse>>,
}

pub(crate) struct Registration {
    handle: ClientHandle,
    ack: oneshot::Sender<()>,
}

/// Cloneable handle for submitting requests into a hub's queues.
///
/// Every send races against the hub's cancellation token so a submission
/// can never block forever on a dead hub.
#[derive(Clone)]
pub struct HubHandle {
    key: ConversationKey,
    instance: Uuid,
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<Uuid>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
}

impl HubHandle {
    pub fn key(&self) -> ConversationKey {
        self.key
    }

    /// Identity of the hub instance behind this handle. Two hubs for the
    /// same pair created at different times have different instances.
    pub fn instance(&self) -> Uuid {
        self.instance
    }

    /// Register a connection and wait until the hub's event loop has
    /// acknowledged it. Only after this returns is the client guaranteed
    /// to be part of every subsequent routing decision.
    pub async fn register(&self, handle: ClientHandle) -> Result<(), HubClosed> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let registration = Registration {
            handle,
            ack: ack_tx,
        };

        tokio::select! {
            _ = self.cancel.cancelled() => return Err(HubClosed),
            sent = self.register_tx.send(registration) => sent.map_err(|_| HubClosed)?,
        }

        tokio::select! {
            _ = self.cancel.cancelled() => Err(HubClosed),
            ack = ack_rx => ack.map_err(|_| HubClosed),
        }
    }

    /// Remove a connection from the hub.
    pub async fn unregister(&self, conn_id: Uuid) -> Result<(), HubClosed> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(HubClosed),
            sent = self.unregister_tx.send(conn_id) => sent.map_err(|_| HubClosed),
        }
    }

    /// Submit an inbound message for routing.
    pub async fn submit(&self, message: InboundMessage) -> Result<(), HubClosed> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(HubClosed),
            sent = self.inbound_tx.send(message) => sent.map_err(|_| HubClosed),
        }
    }
}

/// The conversation actor. Constructed by the [`HubManager`], which then
/// drives [`Hub::run`] on its own task.
///
/// [`HubManager`]: super::HubManager
pub struct Hub {
    key: ConversationKey,
    store: Arc<dyn MessageStore>,
    clients: HashMap<Uuid, ClientHandle>,
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::Receiver<Uuid>,
    inbound_rx: mpsc::Receiver<InboundMessage>,
    cancel: CancellationToken,
}

impl Hub {
    /// Create a hub for `key` together with its submission handle.
    pub fn new(
        key: ConversationKey,
        store: Arc<dyn MessageStore>,
        cancel: CancellationToken,
    ) -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::channel(HUB_QUEUE_SIZE);
        let (unregister_tx, unregister_rx) = mpsc::channel(HUB_QUEUE_SIZE);
        let (inbound_tx, inbound_rx) = mpsc::channel(HUB_QUEUE_SIZE);

        let handle = HubHandle {
            key,
            instance: Uuid::new_v4(),
            register_tx,
            unregister_tx,
            inbound_tx,
            cancel: cancel.clone(),
        };

        let hub = Self {
            key,
            store,
            clients: HashMap::new(),
            register_rx,
            unregister_rx,
            inbound_rx,
            cancel,
        };

        (hub, handle)
    }

    /// Run the event loop to completion.
    ///
    /// Returns `Ok(())` when the last client unregisters, `Cancelled` on
    /// cooperative shutdown, and `Persistence` when the store fails,
    /// which tears down the whole conversation.
    pub async fn run(mut self) -> Result<(), HubError> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(HubError::Cancelled),
                registration = self.register_rx.recv() => match registration {
                    Some(registration) => self.register_client(registration),
                    None => return Ok(()),
                },
                conn_id = self.unregister_rx.recv() => match conn_id {
                    Some(conn_id) => {
                        self.unregister_client(conn_id);
                        if self.clients.is_empty() {
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                },
                message = self.inbound_rx.recv() => match message {
                    Some(message) => self.route_message(message).await?,
                    None => return Ok(()),
                },
            }
        }
    }

    fn register_client(&mut self, registration: Registration) {
        let handle = registration.handle;
        debug!(
            conversation = %self.key,
            chatter_id = handle.chatter_id,
            conn_id = %handle.conn_id,
            "chatter joined conversation"
        );
        self.clients.insert(handle.conn_id, handle);
        // The registering side may have been cancelled while queued.
        let _ = registration.ack.send(());
    }

    fn unregister_client(&mut self, conn_id: Uuid) {
        if let Some(handle) = self.clients.remove(&conn_id) {
            debug!(
                conversation = %self.key,
                chatter_id = handle.chatter_id,
                conn_id = %conn_id,
                "chatter left conversation"
            );
        }
    }

    /// Persist an inbound message and fan it out to every registered
    /// connection of this conversation, the sender's own included.
    async fn route_message(&mut self, message: InboundMessage) -> Result<(), HubError> {
        // A sender outside the canonical pair is a defensive fallback, not
        // an expected path; 0 keeps the row attributable.
        let receiver_id = self.key.counterpart(message.sender_id).unwrap_or(0);
        let receiver_online = self.is_online(receiver_id);

        let id = self
            .store
            .create(&message.body, message.sender_id, receiver_id, receiver_online)
            .await
            .map_err(HubError::Persistence)?;

        debug!(
            conversation = %self.key,
            message_id = id,
            sender_id = message.sender_id,
            receiver_id,
            receiver_online,
            "message routed"
        );

        // Plaintext as received, not the round-trip through the store.
        let response = Arc::new(MessageResponse {
            id,
            message: message.body,
            sender_id: message.sender_id,
            read_by_sender: false,
            receiver_id,
            read_by_receiver: receiver_online,
            created_at: Utc::now(),
        });

        for client in self.clients.values() {
            if client.sender.send(Arc::clone(&response)).await.is_err() {
                warn!(
                    conversation = %self.key,
                    conn_id = %client.conn_id,
                    "dropping frame for dead connection"
                );
            }
        }

        Ok(())
    }

    /// A participant is online iff at least one registered connection
    /// carries their chatter id. Linear scan: a two-party conversation
    /// holds at most a handful of connections.
    fn is_online(&self, chatter_id: i64) -> bool {
        self.clients
            .values()
            .any(|client| client.chatter_id == chatter_id)
    }
}
