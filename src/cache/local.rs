//! In-process cache layer with lazy TTL expiry.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct LocalEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// First tier of the cache. Values are serialized bytes so both tiers
/// share one codec.
#[derive(Default)]
pub(super) struct LocalCache {
    inner: RwLock<HashMap<String, LocalEntry>>,
}

impl LocalCache {
    pub(super) async fn get(&self, key: &str) -> Option<Vec<u8>> {
        // Write lock so expired entries can be evicted on read.
        let mut guard = self.inner.write().await;
        if let Some(entry) = guard.get(key) {
            // Lazy-expire on read to avoid a background sweeper.
            if Instant::now() >= entry.expires_at {
                guard.remove(key);
                return None;
            }
            return Some(entry.value.clone());
        }
        None
    }

    pub(super) async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let entry = LocalEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.inner.write().await.insert(key.to_string(), entry);
    }

    pub(super) async fn remove(&self, key: &str) {
        self.inner.write().await.remove(key);
    }
}
