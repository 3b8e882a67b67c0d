//! # Builder for DownloaderConfig
//!
//! Fluent construction of [`DownloaderConfig`] values.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use geofetch_engine::DownloaderConfig;
//! use geofetch_engine::proxy::ProxyConfig;
//!
//! let config = DownloaderConfig::builder()
//!     .with_timeout(Duration::from_secs(60))
//!     .with_connect_timeout(Duration::from_secs(15))
//!     .with_user_agent("MyApp/1.0")
//!     .with_header("X-Api-Key", "my-secret-key")
//!     .with_proxy(ProxyConfig::from_url("http://proxy.example.com:8080").with_auth("user", "pass"))
//!     .build();
//! assert!(!config.use_system_proxy);
//! ```

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::{DownloaderConfig, proxy::ProxyConfig};

/// Builder for creating DownloaderConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct DownloaderConfigBuilder {
    config: DownloaderConfig,
}

impl DownloaderConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: DownloaderConfig::default(),
        }
    }

    /// Default per-attempt timeout
    pub fn with_timeout(mut self, value: Duration) -> Self {
        self.config.timeout = value;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn with_pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    pub fn with_follow_redirects(mut self, enabled: bool) -> Self {
        self.config.follow_redirects = enabled;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add or replace one header; invalid names or values are ignored
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_ref().as_bytes()),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.headers.insert(name, value);
        }
        self
    }

    /// Merge `headers` into the current set, replacing headers of the same name
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.config.headers.extend(headers);
        self
    }

    /// Route every request through `proxy`; disables the system proxy
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = Some(proxy);
        self.config.use_system_proxy = false;
        self
    }

    /// Has no effect once an explicit proxy is set
    pub fn with_system_proxy(mut self, enabled: bool) -> Self {
        if self.config.proxy.is_none() {
            self.config.use_system_proxy = enabled;
        }
        self
    }

    /// Serve object requests from a path-style endpoint instead of AWS
    pub fn with_object_store_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.object_store_endpoint = Some(endpoint.into());
        self
    }

    /// Reject responses larger than `bytes`; zero accepts any size
    pub fn with_max_payload_size(mut self, bytes: u64) -> Self {
        self.config.max_payload_size = bytes;
        self
    }

    /// Accept invalid TLS certificates.
    ///
    /// # Warning
    /// Only for local mirrors and tests.
    pub fn danger_accept_invalid_certs(mut self, enabled: bool) -> Self {
        self.config.danger_accept_invalid_certs = enabled;
        self
    }

    pub fn build(self) -> DownloaderConfig {
        self.config
    }
}

impl Default for DownloaderConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl From<DownloaderConfig> for DownloaderConfigBuilder {
    /// Continue from an existing configuration
    fn from(config: DownloaderConfig) -> Self {
        Self { config }
    }
}
