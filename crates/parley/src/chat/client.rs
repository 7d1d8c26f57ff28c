//! The per-connection wrapper.
//!
//! Adapts one WebSocket into two independent loops: the inbound loop reads
//! frames under a liveness deadline and submits them to the hub, the
//! outbound loop drains the connection's queue and keeps the peer alive
//! with pings. The sink half is owned solely by the outbound task, so the
//! two write triggers (message, ping) can never interleave.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::message::MessageResponse;

use super::hub::{ClientHandle, HubClosed, HubHandle, InboundMessage};

/// Window the peer has to show liveness before the connection is dropped.
const PONG_WINDOW: Duration = Duration::from_secs(5);

/// Ping cadence: 90% of the window, so a probe always lands before the
/// peer's deadline would otherwise expire.
const PING_INTERVAL: Duration = Duration::from_millis(PONG_WINDOW.as_millis() as u64 * 9 / 10);

/// Capacity of the per-connection outbound queue.
const OUTBOUND_BUFFER_SIZE: usize = 64;

/// Why a connection's loops stopped. Fatal to this connection only; the
/// conversation itself survives.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("reading from chat socket")]
    Read(#[source] axum::Error),

    #[error("writing to chat socket")]
    Write(#[source] axum::Error),

    #[error("peer missed its liveness deadline")]
    Timeout,

    #[error("connection cancelled")]
    Cancelled,

    #[error(transparent)]
    HubClosed(#[from] HubClosed),
}

/// One live WebSocket connection registered with a conversation hub.
pub struct ChatClient {
    chatter_id: i64,
    conn_id: Uuid,
    hub: HubHandle,
    outbound_rx: mpsc::Receiver<Arc<MessageResponse>>,
    socket: WebSocket,
}

impl ChatClient {
    /// Wrap `socket` and register with the hub.
    ///
    /// This is a blocking handshake: it returns only once the hub's event
    /// loop has acknowledged the registration, so the connection is never
    /// reading or writing before the hub knows it exists.
    pub async fn connect(
        hub: HubHandle,
        socket: WebSocket,
        chatter_id: i64,
    ) -> Result<Self, HubClosed> {
        let conn_id = Uuid::new_v4();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER_SIZE);

        hub.register(ClientHandle {
            conn_id,
            chatter_id,
            sender: outbound_tx,
        })
        .await?;

        debug!(conn_id = %conn_id, chatter_id, "chat connection registered");

        Ok(Self {
            chatter_id,
            conn_id,
            hub,
            outbound_rx,
            socket,
        })
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Drive both loops until either one finishes or `cancel` fires.
    ///
    /// On every exit path the connection unregisters from its hub; the
    /// socket closes when its halves are dropped. Returns the first error
    /// observed, or the cancellation reason.
    pub async fn listen(self, cancel: CancellationToken) -> Result<(), ClientError> {
        let Self {
            chatter_id,
            conn_id,
            hub,
            outbound_rx,
            socket,
        } = self;

        let (sink, stream) = socket.split();

        let guard = cancel.child_token();
        let mut read_task = tokio::spawn(read_loop(stream, hub.clone(), chatter_id, guard.clone()));
        let mut write_task = tokio::spawn(write_loop(sink, outbound_rx, guard.clone()));

        let result = tokio::select! {
            read = &mut read_task => {
                guard.cancel();
                let _ = (&mut write_task).await;
                read.unwrap_or(Err(ClientError::Cancelled))
            }
            write = &mut write_task => {
                guard.cancel();
                let _ = (&mut read_task).await;
                write.unwrap_or(Err(ClientError::Cancelled))
            }
        };

        if let Err(err) = hub.unregister(conn_id).await {
            // The hub may already be gone (persistence failure, shutdown).
            debug!(conn_id = %conn_id, error = %err, "unregister from closed hub");
        }

        debug!(conn_id = %conn_id, chatter_id, "chat connection closed");
        result
    }
}

/// Read frames until error, close, cancellation, or a missed deadline.
///
/// Any inbound frame proves liveness and refreshes the deadline; pings are
/// answered by the WebSocket layer itself. Text frames become chat
/// messages tagged with this connection's chatter id; the receiver is
/// resolved by the hub.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    hub: HubHandle,
    chatter_id: i64,
    cancel: CancellationToken,
) -> Result<(), ClientError> {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            frame = timeout(PONG_WINDOW, stream.next()) => frame,
        };

        let frame = match frame {
            Err(_) => return Err(ClientError::Timeout),
            Ok(None) => return Ok(()),
            Ok(Some(Err(err))) => return Err(ClientError::Read(err)),
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                let body = text.trim().to_string();
                hub.submit(InboundMessage {
                    sender_id: chatter_id,
                    body,
                })
                .await?;
            }
            Message::Close(_) => return Ok(()),
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }
}

/// Drain the outbound queue onto the socket, interleaved with keepalive
/// pings. Exits cleanly when the hub drops the queue's sender; that is
/// how an orphaned connection learns its conversation has ended.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Arc<MessageResponse>>,
    cancel: CancellationToken,
) -> Result<(), ClientError> {
    let mut ping = interval(PING_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            message = outbound.recv() => match message {
                Some(message) => {
                    let frame = serde_json::to_string(&*message)
                        .map_err(|err| ClientError::Write(axum::Error::new(err)))?;
                    sink.send(Message::Text(frame.into()))
                        .await
                        .map_err(ClientError::Write)?;
                }
                None => return Ok(()),
            },
            _ = ping.tick() => {
                sink.send(Message::Ping(Vec::new().into()))
                    .await
                    .map_err(ClientError::Write)?;
            }
        }
    }
}
