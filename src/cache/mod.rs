//! Two-tier read-through cache.
//!
//! Resolution order on [`TieredCache::get_or_create`]: local layer →
//! shared layer (re-populating the local layer on a hit) → loader, writing
//! through to both layers afterward. The shared layer is a performance
//! optimization, never a correctness dependency: any failure talking to it
//! is logged and treated as a miss, and every round trip runs under a
//! short deadline so a hanging shared layer cannot stall a caller. Loader
//! failures always propagate — callers never receive a silently empty
//! value.

mod local;
mod shared;

pub use shared::{MemorySharedCache, SharedCacheStore};

use anyhow::{Context, Result};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

use local::LocalCache;

const DEFAULT_SHARED_TIMEOUT: Duration = Duration::from_millis(250);

pub struct TieredCache {
    local: LocalCache,
    shared: Arc<dyn SharedCacheStore>,
    shared_timeout: Duration,
    // Tag membership is tracked in-process only; it does not survive a
    // restart and does not span instances. Entries carry short absolute
    // TTLs so other instances converge without tag eviction.
    tags: Mutex<HashMap<String, HashSet<String>>>,
}

impl TieredCache {
    #[must_use]
    pub fn new(shared: Arc<dyn SharedCacheStore>) -> Self {
        Self {
            local: LocalCache::default(),
            shared,
            shared_timeout: DEFAULT_SHARED_TIMEOUT,
            tags: Mutex::new(HashMap::new()),
        }
    }

    /// Deadline applied to every shared-layer round trip. Elapsing counts
    /// as a miss, never as an error.
    #[must_use]
    pub fn with_shared_timeout(mut self, shared_timeout: Duration) -> Self {
        self.shared_timeout = shared_timeout;
        self
    }

    /// Read-through lookup. The loader runs only on a full miss.
    ///
    /// # Errors
    /// Fails only when the loader fails; shared-layer trouble degrades to
    /// local/loader.
    pub async fn get_or_create<T, F, Fut>(
        &self,
        key: &str,
        local_ttl: Duration,
        shared_ttl: Duration,
        loader: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.get_or_create_inner(key, None, local_ttl, shared_ttl, loader)
            .await
    }

    /// Same as [`Self::get_or_create`], registering the key under `tag`
    /// for [`Self::remove_by_tag`].
    pub async fn get_or_create_tagged<T, F, Fut>(
        &self,
        key: &str,
        tag: &str,
        local_ttl: Duration,
        shared_ttl: Duration,
        loader: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.get_or_create_inner(key, Some(tag), local_ttl, shared_ttl, loader)
            .await
    }

    async fn get_or_create_inner<T, F, Fut>(
        &self,
        key: &str,
        tag: Option<&str>,
        local_ttl: Duration,
        shared_ttl: Duration,
        loader: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(bytes) = self.local.get(key).await {
            match serde_json::from_slice(&bytes) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!("discarding undecodable local cache entry for {key}: {err}");
                    self.local.remove(key).await;
                }
            }
        }

        match tokio::time::timeout(self.shared_timeout, self.shared.get(key)).await {
            Ok(Ok(Some(bytes))) => match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    self.local.set(key, bytes, local_ttl).await;
                    self.register_tag(key, tag).await;
                    return Ok(value);
                }
                Err(err) => {
                    warn!("discarding undecodable shared cache entry for {key}: {err}");
                }
            },
            Ok(Ok(None)) => {}
            Ok(Err(err)) => {
                warn!("shared cache layer unavailable for {key}: {err}");
            }
            Err(_) => {
                warn!("shared cache read for {key} timed out, treating as a miss");
            }
        }

        let value = loader().await?;
        let bytes = serde_json::to_vec(&value).context("failed to serialize cache value")?;
        self.local.set(key, bytes.clone(), local_ttl).await;
        match tokio::time::timeout(self.shared_timeout, self.shared.set(key, &bytes, shared_ttl))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!("failed to write through to shared cache for {key}: {err}");
            }
            Err(_) => {
                warn!("shared cache write for {key} timed out");
            }
        }
        self.register_tag(key, tag).await;
        Ok(value)
    }

    async fn register_tag(&self, key: &str, tag: Option<&str>) {
        if let Some(tag) = tag {
            self.tags
                .lock()
                .await
                .entry(tag.to_string())
                .or_default()
                .insert(key.to_string());
        }
    }

    /// Clear both layers for this exact key.
    pub async fn remove(&self, key: &str) {
        self.local.remove(key).await;
        match tokio::time::timeout(self.shared_timeout, self.shared.remove(key)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!("failed to remove {key} from shared cache: {err}");
            }
            Err(_) => {
                warn!("shared cache removal for {key} timed out");
            }
        }
    }

    /// Clear every key registered under `tag` on this instance.
    pub async fn remove_by_tag(&self, tag: &str) {
        let keys = self.tags.lock().await.remove(tag);
        if let Some(keys) = keys {
            for key in keys {
                self.remove(&key).await;
            }
        }
    }
}
