//! # Geofetch
//!
//! A download-and-cache engine for geospatial imagery services.
//! Requests for OGC-style services (WMS, WCS, FIS) and Sentinel-2 object
//! store files are fetched with bounded retries, validated and cached by
//! request fingerprint.
//!
//! ## Features
//!
//! - Provider request builders producing provider-neutral descriptors
//! - Order-independent request fingerprints
//! - Memory and file cache tiers with expiry and size limits
//! - Exponential backoff with jitter on transient failures only
//! - Format, checksum and SAFE archive validation
//! - At most one in-flight fetch per fingerprint, shared by every caller

pub mod builder;
pub mod cache;
pub mod config;
pub mod downloader;
pub mod error;
pub mod format;
pub mod proxy;
pub mod request;
pub mod retry;
pub mod transport;
pub mod validate;

#[cfg(test)]
mod testing;

pub use builder::DownloaderConfigBuilder;
pub use cache::{CacheConfig, CacheManager};
pub use config::DownloaderConfig;
pub use error::{DownloadError, ErrorKind, FetchError, ValidationError};
pub use format::MimeType;

// Re-export request types
pub use request::{
    BBox, Crs, Fingerprint, Provider, RequestBuilder, RequestDescriptor, RequestParams, Resource,
    TimeRange, fingerprint,
};

// Re-export the orchestrator
pub use downloader::{Artifact, DownloadManager, DownloadManagerConfig, DownloadStats, Origin};
pub use retry::{RetryConfig, RetryPolicy};
pub use transport::{HttpTransport, Transport, create_client};
pub use validate::{Checksum, ChecksumAlgorithm, ValidationTarget, Validator, ValidatorChain};

// Re-export proxy utilities
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
