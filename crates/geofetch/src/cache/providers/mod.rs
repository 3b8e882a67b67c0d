//! # Cache Providers
//!
//! Memory and file tiers behind the [`CacheProvider`] trait.

pub use self::file::FileCache;
pub use self::memory::MemoryCache;
pub use self::provider::CacheProvider;

pub mod provider;

pub mod file;
pub mod memory;
