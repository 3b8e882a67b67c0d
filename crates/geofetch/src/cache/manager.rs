//! # Cache Manager
//!
//! Coordinates the memory and file tiers behind a single [`CacheProvider`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io;
use tracing::{debug, warn};

use crate::cache::providers::{CacheProvider, FileCache, MemoryCache};
use crate::cache::types::{CacheConfig, CacheEntry, CacheResult};
use crate::format::MimeType;
use crate::request::Fingerprint;

/// Two-tier cache: memory in front of files
#[derive(Clone)]
pub struct CacheManager {
    memory_cache: Option<MemoryCache>,
    file_cache: Option<FileCache>,
    config: Arc<CacheConfig>,
}

impl CacheManager {
    /// Create a cache manager, creating the cache directory up front
    pub async fn new(config: CacheConfig) -> io::Result<Self> {
        let memory_cache = (config.enabled && config.max_memory_cache_size > 0)
            .then(|| MemoryCache::new(config.max_memory_cache_size));

        let file_cache = (config.enabled && config.max_disk_cache_size > 0)
            .then(|| FileCache::new(config.resolved_disk_path(), config.max_disk_cache_size));

        if let Some(file_cache) = &file_cache {
            file_cache.ensure_initialized().await?;
            debug!(dir = ?file_cache.cache_dir(), "File cache ready");
        }

        Ok(Self {
            memory_cache,
            file_cache,
            config: Arc::new(config),
        })
    }

    /// A manager that stores nothing
    pub fn disabled() -> Self {
        Self {
            memory_cache: None,
            file_cache: None,
            config: Arc::new(CacheConfig {
                enabled: false,
                ..CacheConfig::default()
            }),
        }
    }

    /// Build an entry for `payload` with the configured TTL
    pub fn new_entry(&self, format: MimeType, payload: Bytes) -> CacheEntry {
        CacheEntry::new(format, payload, self.config.default_ttl)
    }

    pub fn is_enabled(&self) -> bool {
        self.memory_cache.is_some() || self.file_cache.is_some()
    }
}

#[async_trait]
impl CacheProvider for CacheManager {
    async fn contains(&self, key: &Fingerprint) -> CacheResult<bool> {
        if let Some(memory) = &self.memory_cache {
            if memory.contains(key).await? {
                return Ok(true);
            }
        }
        match &self.file_cache {
            Some(file) => file.contains(key).await,
            None => Ok(false),
        }
    }

    async fn get(&self, key: &Fingerprint) -> CacheResult<Option<CacheEntry>> {
        if let Some(memory) = &self.memory_cache {
            if let Some(entry) = memory.get(key).await? {
                return Ok(Some(entry));
            }
        }

        let Some(file) = &self.file_cache else {
            return Ok(None);
        };
        let Some(entry) = file.get(key).await? else {
            return Ok(None);
        };

        // Promote for faster access next time
        if let Some(memory) = &self.memory_cache {
            memory.put(key.clone(), entry.clone()).await?;
        }
        Ok(Some(entry))
    }

    async fn put(&self, key: Fingerprint, entry: CacheEntry) -> CacheResult<()> {
        if let Some(memory) = &self.memory_cache {
            memory.put(key.clone(), entry.clone()).await?;
        }
        match &self.file_cache {
            Some(file) => file.put(key, entry).await,
            None => Ok(()),
        }
    }

    async fn invalidate(&self, key: &Fingerprint) -> CacheResult<()> {
        let mem_result = match &self.memory_cache {
            Some(memory) => memory.invalidate(key).await,
            None => Ok(()),
        };
        let file_result = match &self.file_cache {
            Some(file) => file.invalidate(key).await,
            None => Ok(()),
        };
        // Return file cache error if any, otherwise memory cache error if any
        file_result.and(mem_result)
    }

    async fn clear(&self) -> CacheResult<()> {
        let mem_result = match &self.memory_cache {
            Some(memory) => memory.clear().await,
            None => Ok(()),
        };
        let file_result = match &self.file_cache {
            Some(file) => file.clear().await,
            None => Ok(()),
        };
        file_result.and(mem_result)
    }

    async fn sweep(&self) -> CacheResult<usize> {
        let mut removed = 0;
        if let Some(memory) = &self.memory_cache {
            removed += memory.sweep().await?;
        }
        if let Some(file) = &self.file_cache {
            match file.sweep().await {
                Ok(count) => removed += count,
                Err(e) => {
                    warn!(error = %e, "File cache sweep failed");
                    return Err(e);
                }
            }
        }
        Ok(removed)
    }
}
