//! Client registry — the static public keys allowed to handshake.
//!
//! Loaded once from config and never mutated while serving, so it is shared
//! behind an `Arc` without locking.

use std::collections::HashSet;
use std::sync::Arc;

use htun_core::crypto::{key_fingerprint, PublicKey};

#[derive(Clone, Default)]
pub struct ClientRegistry {
    keys: Arc<HashSet<PublicKey>>,
}

impl ClientRegistry {
    pub fn new(keys: impl IntoIterator<Item = PublicKey>) -> Self {
        let keys: HashSet<PublicKey> = keys.into_iter().collect();
        for key in &keys {
            tracing::debug!(client = %key_fingerprint(key), "registered client key");
        }
        Self {
            keys: Arc::new(keys),
        }
    }

    /// Whether this static key may complete a handshake.
    pub fn is_authorized(&self, key: &PublicKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
