//! # Memory Cache Provider
//!
//! Size-bounded in-memory tier built on Moka.

use moka::future::Cache as MokaCache;
use tracing::{debug, warn};

use crate::cache::providers::CacheProvider;
use crate::cache::types::{CacheEntry, CacheResult, now_ms};
use crate::request::Fingerprint;

/// Memory cache provider implementation using Moka
#[derive(Clone)]
pub struct MemoryCache {
    cache: MokaCache<Fingerprint, CacheEntry>,
    /// Maximum size for this cache in bytes
    max_size: u64,
}

impl MemoryCache {
    /// Create a memory cache weighing entries by payload size
    pub fn new(max_size_bytes: u64) -> Self {
        let cache = MokaCache::builder()
            .weigher(|_k, v: &CacheEntry| v.payload.len().try_into().unwrap_or(u32::MAX))
            .max_capacity(max_size_bytes)
            .build();

        debug!(max_size = max_size_bytes, "Memory cache created");

        Self {
            cache,
            max_size: max_size_bytes,
        }
    }
}

#[async_trait::async_trait]
impl CacheProvider for MemoryCache {
    async fn contains(&self, key: &Fingerprint) -> CacheResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn get(&self, key: &Fingerprint) -> CacheResult<Option<CacheEntry>> {
        let Some(entry) = self.cache.get(key).await else {
            return Ok(None);
        };

        if entry.metadata.is_expired() {
            debug!(fingerprint = %key.short(), "Memory cache entry expired");
            self.cache.invalidate(key).await;
            return Ok(None);
        }

        Ok(Some(entry))
    }

    async fn put(&self, key: Fingerprint, entry: CacheEntry) -> CacheResult<()> {
        let size = entry.payload.len() as u64;

        // A single entry can't be larger than the whole tier
        if size > self.max_size {
            warn!(
                fingerprint = %key.short(),
                size,
                max_size = self.max_size,
                "Entry too large for memory cache, skipping"
            );
            // Drop any previous version so the tiers can't disagree
            self.cache.invalidate(&key).await;
            return Ok(());
        }

        self.cache.insert(key, entry).await;
        Ok(())
    }

    async fn invalidate(&self, key: &Fingerprint) -> CacheResult<()> {
        if self.cache.remove(key).await.is_some() {
            debug!(fingerprint = %key.short(), "Removed entry from memory cache");
        }
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        debug!("Memory cache cleared");
        Ok(())
    }

    async fn sweep(&self) -> CacheResult<usize> {
        let now = now_ms();
        let expired: Vec<_> = self
            .cache
            .iter()
            .filter(|(_, entry)| entry.metadata.is_expired_at(now))
            .map(|(key, _)| key)
            .collect();

        for key in &expired {
            self.cache.invalidate(&**key).await;
        }
        self.cache.run_pending_tasks().await;

        if !expired.is_empty() {
            debug!(count = expired.len(), "Swept expired memory cache entries");
        }
        Ok(expired.len())
    }
}
