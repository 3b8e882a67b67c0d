//! # Cache System
//!
//! Validated artifacts keyed by request fingerprint, held in a size-bounded
//! memory tier in front of a persistent file tier.

mod manager;
pub mod providers;
mod types;

pub use manager::CacheManager;
pub use types::{CacheConfig, CacheEntry, CacheMetadata, CacheResult};

pub use providers::{CacheProvider, FileCache, MemoryCache};
