use std::path::{Path, PathBuf};
use std::time::Duration;

use geofetch_engine::request::{DEFAULT_AWS_REGION, DEFAULT_L1C_BUCKET, DEFAULT_SERVICE_URL};
use geofetch_engine::{
    CacheConfig, DownloadManagerConfig, DownloaderConfig, ProxyConfig, RetryConfig,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cli::Args;
use crate::error::{AppError, Result};
use crate::utils::{parse_headers, parse_size};

const APP_NAME: &str = "geofetch";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Instance id of the OGC service configuration
    pub instance_id: Option<String>,

    /// Base URL of the OGC services
    pub service_url: String,

    /// Bucket of Sentinel-2 L1C files
    pub aws_bucket: String,

    pub aws_region: String,

    /// Path-style object store mirror, used instead of the AWS virtual-host URLs
    pub object_store_endpoint: Option<String>,

    /// Default directory for downloaded artifacts
    pub output_dir: PathBuf,

    /// Overall deadline of one download in seconds
    pub deadline_secs: Option<u64>,

    pub cache: CacheSettings,
    pub retry: RetrySettings,
    pub http: HttpSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,

    /// Cache directory; a folder in the system temp dir when unset
    pub dir: Option<PathBuf>,

    /// Size limit of the file cache, e.g. "2GB"
    pub max_disk_size: String,

    /// Size limit of the in-memory cache, e.g. "64MB"
    pub max_memory_size: String,

    /// Lifetime of cached artifacts in hours; unset keeps them until cleared
    pub ttl_hours: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    /// Per-attempt timeout in seconds
    pub attempt_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: Option<String>,
    pub headers: Vec<String>,
    pub use_system_proxy: bool,

    /// Largest accepted response, e.g. "1GB"; "0" disables the limit
    pub max_payload_size: String,

    /// Default proxy URL (supports http, https, socks5)
    pub proxy: Option<String>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            instance_id: None,
            service_url: DEFAULT_SERVICE_URL.to_string(),
            aws_bucket: DEFAULT_L1C_BUCKET.to_string(),
            aws_region: DEFAULT_AWS_REGION.to_string(),
            object_store_endpoint: None,
            output_dir: PathBuf::from("."),
            deadline_secs: None,
            cache: CacheSettings::default(),
            retry: RetrySettings::default(),
            http: HttpSettings::default(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            max_disk_size: "2GB".to_string(),
            max_memory_size: "64MB".to_string(),
            ttl_hours: Some(7 * 24),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            jitter: defaults.jitter,
            attempt_timeout_secs: None,
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            connect_timeout_secs: 10,
            user_agent: None,
            headers: Vec::new(),
            use_system_proxy: true,
            max_payload_size: "1GB".to_string(),
            proxy: None,
            proxy_username: None,
            proxy_password: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the given file, or from the default location
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        match config_path {
            Some(path) => {
                if path.exists() {
                    let content = std::fs::read_to_string(path)?;
                    Ok(toml::from_str(&content)?)
                } else {
                    debug!("Config file {} not found, using defaults", path.display());
                    Ok(Self::default())
                }
            }
            None => Ok(confy::load(APP_NAME, None)?),
        }
    }

    /// Get default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        confy::get_configuration_file_path(APP_NAME, None).ok()
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reset configuration to defaults and save, returning the file written
    pub fn reset(config_path: Option<&Path>) -> Result<PathBuf> {
        let path = config_path
            .map(Path::to_path_buf)
            .or_else(Self::default_config_path)
            .ok_or_else(|| AppError::Config("No configuration path available".to_string()))?;

        Self::default().save(&path)?;
        Ok(path)
    }

    /// Show current configuration as a formatted string
    pub fn show(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply the global command-line overrides
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(dir) = &args.cache_dir {
            self.cache.dir = Some(dir.clone());
        }
        if args.no_cache {
            self.cache.enabled = false;
        }
        if let Some(retries) = args.retries {
            self.retry.max_attempts = retries;
        }
        if let Some(timeout) = args.timeout {
            self.retry.attempt_timeout_secs = Some(timeout);
        }
        if let Some(deadline) = args.deadline {
            self.deadline_secs = Some(deadline);
        }
        if let Some(proxy) = &args.proxy {
            self.http.proxy = Some(proxy.clone());
            self.http.proxy_username = args.proxy_username.clone();
            self.http.proxy_password = args.proxy_password.clone();
        }
        self.http.headers.extend(args.headers.iter().cloned());
    }

    pub fn cache_config(&self) -> Result<CacheConfig> {
        Ok(CacheConfig {
            enabled: self.cache.enabled,
            disk_cache_path: self.cache.dir.clone(),
            max_disk_cache_size: parse_size(&self.cache.max_disk_size)?,
            max_memory_cache_size: parse_size(&self.cache.max_memory_size)?,
            default_ttl: self
                .cache
                .ttl_hours
                .map(|hours| Duration::from_secs(hours * 3600)),
        })
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            jitter: self.retry.jitter,
            attempt_timeout: self.retry.attempt_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn manager_config(&self) -> Result<DownloadManagerConfig> {
        let cache_config = if self.cache.enabled {
            Some(self.cache_config()?)
        } else {
            None
        };
        Ok(DownloadManagerConfig {
            cache_config,
            retry: self.retry_config(),
            deadline: self.deadline_secs.map(Duration::from_secs),
        })
    }

    pub fn downloader_config(&self) -> Result<DownloaderConfig> {
        let mut builder = DownloaderConfig::builder()
            .with_timeout(Duration::from_secs(self.http.timeout_secs))
            .with_connect_timeout(Duration::from_secs(self.http.connect_timeout_secs))
            .with_max_payload_size(parse_size(&self.http.max_payload_size)?)
            .with_headers(parse_headers(&self.http.headers));

        if let Some(user_agent) = &self.http.user_agent {
            builder = builder.with_user_agent(user_agent);
        }
        if let Some(endpoint) = &self.object_store_endpoint {
            builder = builder.with_object_store_endpoint(endpoint);
        }

        let builder = match &self.http.proxy {
            Some(url) => {
                let mut proxy = ProxyConfig::from_url(url);
                if let (Some(username), Some(password)) =
                    (&self.http.proxy_username, &self.http.proxy_password)
                {
                    proxy = proxy.with_auth(username, password);
                }
                builder.with_proxy(proxy)
            }
            None => builder.with_system_proxy(self.http.use_system_proxy),
        };
        Ok(builder.build())
    }
}
