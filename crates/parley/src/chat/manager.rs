//! The conversation registry.
//!
//! Single point of truth mapping a canonical participant pair to its live
//! hub. Hubs start lazily on first request and are removed once their
//! event loops drain.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::message::MessageStore;

use super::hub::{ConversationKey, Hub, HubError, HubHandle};

/// Registry of live conversation hubs.
pub struct HubManager {
    hubs: Arc<DashMap<ConversationKey, HubHandle>>,
    store: Arc<dyn MessageStore>,
    cancel: CancellationToken,
}

impl HubManager {
    /// Create a registry. Hubs are parented on `cancel`; cancelling it
    /// ends every conversation loop.
    pub fn new(store: Arc<dyn MessageStore>, cancel: CancellationToken) -> Self {
        Self {
            hubs: Arc::new(DashMap::new()),
            store,
            cancel,
        }
    }

    /// Return the live hub for the `(a, b)` pair, creating and starting
    /// one if none exists. `get_or_create(a, b)` and `get_or_create(b, a)`
    /// always yield the same hub.
    pub fn get_or_create(&self, a: i64, b: i64) -> HubHandle {
        let key = ConversationKey::new(a, b);

        match self.hubs.entry(key) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                debug!(conversation = %key, "starting conversation hub");
                let (hub, handle) =
                    Hub::new(key, Arc::clone(&self.store), self.cancel.child_token());
                entry.insert(handle.clone());
                self.spawn_hub(key, hub, handle.instance());
                handle
            }
        }
    }

    /// Number of live conversations.
    pub fn active(&self) -> usize {
        self.hubs.len()
    }

    fn spawn_hub(&self, key: ConversationKey, hub: Hub, instance: Uuid) {
        let hubs = Arc::clone(&self.hubs);

        tokio::spawn(async move {
            match hub.run().await {
                Ok(()) => debug!(conversation = %key, "conversation hub drained"),
                Err(HubError::Cancelled) => {
                    debug!(conversation = %key, "conversation hub cancelled");
                }
                Err(err) => {
                    warn!(conversation = %key, error = %err, "conversation hub failed");
                }
            }

            // The key may already point at a newer hub started after this
            // one drained; only remove the entry we own.
            hubs.remove_if(&key, |_, handle| handle.instance() == instance);
        });
    }
}
