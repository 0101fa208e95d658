//! Shared cache layer contract.
//!
//! The shared layer is a separately reachable service (Redis-shaped); the
//! tiered cache treats every failure here as a miss, so implementations
//! are free to error on network trouble.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[async_trait]
pub trait SharedCacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

struct SharedEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-memory stand-in for the shared layer, used by tests and single-node
/// deployments.
#[derive(Default)]
pub struct MemorySharedCache {
    inner: RwLock<HashMap<String, SharedEntry>>,
}

impl MemorySharedCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedCacheStore for MemorySharedCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut guard = self.inner.write().await;
        if let Some(entry) = guard.get(key) {
            if Instant::now() >= entry.expires_at {
                guard.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let entry = SharedEntry {
            value: value.to_vec(),
            expires_at: Instant::now() + ttl,
        };
        self.inner.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.write().await.remove(key);
        Ok(())
    }
}
