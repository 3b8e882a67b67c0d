use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};

use crate::proxy::ProxyConfig;

const DEFAULT_USER_AGENT: &str = concat!("geofetch/", env!("CARGO_PKG_VERSION"));

/// Largest response body accepted by default (1 GiB, above any single Sentinel-2 product file)
pub const DEFAULT_MAX_PAYLOAD_SIZE: u64 = 1024 * 1024 * 1024;

/// HTTP settings of the shared client used by [`crate::HttpTransport`]
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Default per-attempt timeout, overridden by a descriptor's own timeout
    pub timeout: Duration,

    /// Time to establish a connection
    pub connect_timeout: Duration,

    /// Idle time after which pooled connections are closed; zero keeps reqwest's default
    pub pool_idle_timeout: Duration,

    pub follow_redirects: bool,

    pub user_agent: String,

    /// Headers sent with every request
    pub headers: HeaderMap,

    pub proxy: Option<ProxyConfig>,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,

    pub danger_accept_invalid_certs: bool,

    /// Path-style object store endpoint (S3-compatible mirrors, local tests).
    /// Virtual-host AWS URLs are used when unset.
    pub object_store_endpoint: Option<String>,

    /// Responses larger than this fail permanently; zero disables the limit
    pub max_payload_size: u64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: DownloaderConfig::default_headers(),
            proxy: None,
            use_system_proxy: true,
            danger_accept_invalid_certs: false,
            object_store_endpoint: None,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl DownloaderConfig {
    pub fn builder() -> crate::builder::DownloaderConfigBuilder {
        crate::builder::DownloaderConfigBuilder::new()
    }

    /// Headers every request carries unless replaced.
    ///
    /// Services answer errors as XML or JSON documents, so images are preferred
    /// without refusing anything else.
    pub fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("image/*, application/json;q=0.9, */*;q=0.8"),
        );
        headers
    }

    /// The payload limit, if any
    pub fn payload_limit(&self) -> Option<u64> {
        (self.max_payload_size > 0).then_some(self.max_payload_size)
    }
}
