//! Real-time two-party chat relay.
//!
//! The moving parts, leaves first:
//!
//! - [`PreflightTokens`] bridges an authenticated HTTP request to the
//!   WebSocket upgrade, which cannot carry a bearer header.
//! - [`Hub`] is the per-conversation actor: a single event loop owns the
//!   set of connected clients and serializes registration, unregistration
//!   and message routing. Nothing else touches that state.
//! - [`HubManager`] maps a canonical participant pair to its live hub,
//!   creating lazily and removing hubs whose loops have drained.
//! - [`ChatClient`] wraps one WebSocket in inbound/outbound loops with
//!   keepalive, speaking to its hub only through the hub's queues.

mod client;
mod hub;
mod manager;
mod preflight;

pub use client::{ChatClient, ClientError};
pub use hub::{
    ClientHandle, ConversationKey, Hub, HubClosed, HubError, HubHandle, InboundMessage,
};
pub use manager::HubManager;
pub use preflight::{PreflightError, PreflightTokens};
