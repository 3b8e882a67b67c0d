//! # Cache Types
//!
//! Entries, metadata and configuration shared by every cache tier.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::format::MimeType;

/// Milliseconds since the Unix epoch
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Metadata stored next to every cached payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Format the payload was validated as
    pub format: MimeType,
    /// Payload size in bytes
    pub size: u64,
    /// Hex SHA-256 of the payload, re-checked when read from disk
    pub sha256: String,
    /// When the entry was created (ms since epoch)
    pub created_at_ms: u64,
    /// When the entry expires (ms since epoch); `None` never expires
    pub expires_at_ms: Option<u64>,
}

impl CacheMetadata {
    /// Describe `payload`, hashing it
    pub fn new(format: MimeType, payload: &[u8]) -> Self {
        Self {
            format,
            size: payload.len() as u64,
            sha256: hex::encode(Sha256::digest(payload)),
            created_at_ms: now_ms(),
            expires_at_ms: None,
        }
    }

    /// Set the expiration relative to the creation time
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.expires_at_ms =
            ttl.map(|ttl| self.created_at_ms.saturating_add(ttl.as_millis() as u64));
        self
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|expires| now_ms >= expires)
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_ms())
    }
}

/// A cached artifact. Payload bytes are shared, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub payload: Bytes,
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    pub fn new(format: MimeType, payload: Bytes, ttl: Option<Duration>) -> Self {
        let metadata = CacheMetadata::new(format, &payload).with_ttl(ttl);
        Self { payload, metadata }
    }

    /// Whether the payload still matches the recorded size and hash
    pub fn verify(&self) -> bool {
        self.payload.len() as u64 == self.metadata.size
            && hex::encode(Sha256::digest(&self.payload)) == self.metadata.sha256
    }
}

/// Configuration for the cache system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Whether caching is enabled
    pub enabled: bool,
    /// Path for disk cache storage; the system temp dir when unset
    pub disk_cache_path: Option<PathBuf>,
    /// Maximum size of disk cache in bytes, enforced by [`sweep`](super::CacheProvider::sweep).
    /// Zero disables the file tier.
    pub max_disk_cache_size: u64,
    /// Maximum size of memory cache in bytes. Zero disables the memory tier.
    pub max_memory_cache_size: u64,
    /// TTL given to new entries; `None` keeps them until invalidated
    pub default_ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            disk_cache_path: None,
            max_disk_cache_size: 2 * 1024 * 1024 * 1024, // 2GB
            max_memory_cache_size: 64 * 1024 * 1024,     // 64MB
            default_ttl: Some(Duration::from_secs(7 * 24 * 3600)),
        }
    }
}

impl CacheConfig {
    /// Directory of the file tier
    pub fn resolved_disk_path(&self) -> PathBuf {
        self.disk_cache_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("geofetch-cache"))
    }
}

/// Result of a cache operation
pub type CacheResult<T> = std::result::Result<T, std::io::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_describes_payload() {
        let meta = CacheMetadata::new(MimeType::Png, b"abc");
        assert_eq!(meta.size, 3);
        assert_eq!(
            meta.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(!meta.is_expired());
    }

    #[test]
    fn test_ttl_expiry() {
        let meta = CacheMetadata::new(MimeType::Png, b"abc").with_ttl(Some(Duration::from_secs(1)));
        let created = meta.created_at_ms;
        assert!(!meta.is_expired_at(created + 999));
        assert!(meta.is_expired_at(created + 1000));

        let forever = CacheMetadata::new(MimeType::Png, b"abc").with_ttl(None);
        assert!(!forever.is_expired_at(u64::MAX));
    }

    #[test]
    fn test_entry_verification() {
        let entry = CacheEntry::new(MimeType::Txt, Bytes::from_static(b"hello"), None);
        assert!(entry.verify());

        let tampered = CacheEntry {
            payload: Bytes::from_static(b"hellO"),
            ..entry
        };
        assert!(!tampered.verify());
    }
}
