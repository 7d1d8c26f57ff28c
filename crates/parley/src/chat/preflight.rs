//! Short-lived tokens authorizing a WebSocket upgrade.
//!
//! The upgrade handshake cannot carry an Authorization header, so an
//! authenticated HTTP call first exchanges its credentials for an opaque
//! token which is then presented as a query parameter.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;

/// Length of the opaque token string.
const TOKEN_LENGTH: usize = 16;

/// How long a token stays valid after issuance.
const TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

/// Preflight token failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreflightError {
    /// The token was never issued, already consumed, or already evicted.
    #[error("chat token not found")]
    NotFound,

    /// The token existed but its TTL had elapsed.
    #[error("chat token expired")]
    Expired,

    /// A freshly generated token collided with a live one. Not retried.
    #[error("chat token collision")]
    Collision,
}

#[derive(Debug)]
struct TokenEntry {
    chatter_id: i64,
    expires_at: Instant,
}

/// In-memory store of live preflight tokens.
///
/// The map is sharded behind reader/writer locks; lookups run concurrently
/// while insertions and evictions exclude each other per shard.
#[derive(Debug)]
pub struct PreflightTokens {
    ttl: Duration,
    tokens: DashMap<String, TokenEntry>,
}

impl PreflightTokens {
    /// Create a store with the default 15 minute TTL.
    pub fn new() -> Self {
        Self::with_ttl(TOKEN_TTL)
    }

    /// Create a store with a custom TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            tokens: DashMap::new(),
        }
    }

    /// Issue a token for `chatter_id`, valid for the store's TTL.
    pub fn create(&self, chatter_id: i64) -> Result<String, PreflightError> {
        let token = nanoid::nanoid!(TOKEN_LENGTH);

        match self.tokens.entry(token.clone()) {
            Entry::Occupied(_) => Err(PreflightError::Collision),
            Entry::Vacant(slot) => {
                slot.insert(TokenEntry {
                    chatter_id,
                    expires_at: Instant::now() + self.ttl,
                });
                Ok(token)
            }
        }
    }

    /// Resolve a token to the chatter it was issued for.
    ///
    /// Tokens are single-use: the entry is removed whether it turns out to
    /// be valid or expired, so a second lookup always fails.
    pub fn consume(&self, token: &str) -> Result<i64, PreflightError> {
        let (_, entry) = self.tokens.remove(token).ok_or(PreflightError::NotFound)?;

        if Instant::now() >= entry.expires_at {
            return Err(PreflightError::Expired);
        }

        Ok(entry.chatter_id)
    }

    /// Number of live (not yet consumed) tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no tokens are outstanding.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Default for PreflightTokens {
    fn default() -> Self {
        Self::new()
    }
}
