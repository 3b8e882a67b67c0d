//! # Cache Provider
//!
//! The trait every cache tier implements, keyed by request fingerprint.

use async_trait::async_trait;

use crate::cache::types::{CacheEntry, CacheResult};
use crate::request::Fingerprint;

/// A store of validated artifacts
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Check if the cache holds a live entry for the fingerprint
    async fn contains(&self, key: &Fingerprint) -> CacheResult<bool>;

    /// Get a live entry. Expired entries are evicted and reported as missing.
    /// Never touches the network.
    async fn get(&self, key: &Fingerprint) -> CacheResult<Option<CacheEntry>>;

    /// Insert or replace an entry; readers see the old or the new entry, never a mix
    async fn put(&self, key: Fingerprint, entry: CacheEntry) -> CacheResult<()>;

    /// Remove an entry
    async fn invalidate(&self, key: &Fingerprint) -> CacheResult<()>;

    /// Remove every entry
    async fn clear(&self) -> CacheResult<()>;

    /// Eagerly remove expired entries, returning how many were dropped
    async fn sweep(&self) -> CacheResult<usize>;
}
