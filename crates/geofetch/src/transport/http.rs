use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use url::Url;

use super::Transport;
use crate::error::FetchError;
use crate::proxy::build_proxy_from_config;
use crate::request::{RequestDescriptor, Resource};
use crate::{DownloadError, DownloaderConfig};

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &DownloaderConfig) -> Result<Client, DownloadError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .danger_accept_invalid_certs(config.danger_accept_invalid_certs)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.pool_idle_timeout.is_zero() {
        client_builder = client_builder.pool_idle_timeout(config.pool_idle_timeout);
    }

    if let Some(proxy_config) = &config.proxy {
        // Explicit proxy configuration takes precedence
        let proxy = build_proxy_from_config(proxy_config)?;
        client_builder = client_builder.proxy(proxy);
        info!(proxy_url = %proxy_config.url, "Using explicitly configured proxy for downloads");
    } else if config.use_system_proxy {
        // reqwest picks up system proxy settings unless no_proxy() is called
        debug!("Using system proxy settings for downloads");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled for downloads");
    }

    client_builder.build().map_err(DownloadError::from)
}

/// Classify a status code that is not a success
fn classify_status(status: StatusCode, url: &Url) -> FetchError {
    let message = format!("HTTP {status} from {}", redact(url));
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        FetchError::Transient(message)
    } else {
        FetchError::Permanent(message)
    }
}

/// Classify a client-side failure
fn classify_error(err: reqwest::Error) -> FetchError {
    if err.is_builder() || err.is_redirect() {
        return FetchError::Permanent(err.to_string());
    }
    if let Some(status) = err.status() {
        if status.is_client_error()
            && status != StatusCode::REQUEST_TIMEOUT
            && status != StatusCode::TOO_MANY_REQUESTS
        {
            return FetchError::Permanent(err.to_string());
        }
    }
    // timeouts, refused connections, resets, truncated bodies
    FetchError::Transient(err.to_string())
}

/// The URL without its query, for logs and error messages
fn redact(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

/// HTTP and object-store transport over a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    default_timeout: Duration,
    object_store_endpoint: Option<Url>,
    max_payload: Option<u64>,
}

impl HttpTransport {
    pub fn new(config: &DownloaderConfig) -> Result<Self, DownloadError> {
        let object_store_endpoint = config
            .object_store_endpoint
            .as_deref()
            .map(|endpoint| {
                Url::parse(endpoint).map_err(|e| {
                    DownloadError::Config(format!("invalid object store endpoint {endpoint}: {e}"))
                })
            })
            .transpose()?;

        Ok(Self {
            client: create_client(config)?,
            default_timeout: config.timeout,
            object_store_endpoint,
            max_payload: config.payload_limit(),
        })
    }

    /// Render the descriptor as a request URL
    pub fn url_for(&self, request: &RequestDescriptor) -> Result<Url, FetchError> {
        let malformed = |e: url::ParseError| FetchError::Permanent(format!("malformed URL: {e}"));

        let mut url = match &request.resource {
            Resource::Service { endpoint, .. } => Url::parse(endpoint.trim()).map_err(malformed)?,
            Resource::Object {
                bucket,
                key,
                region,
            } => {
                let (mut url, path_style) = match &self.object_store_endpoint {
                    Some(endpoint) => (endpoint.clone(), true),
                    None => {
                        let host = match region.as_deref().map(str::trim) {
                            Some(region) if !region.is_empty() => {
                                format!("https://{bucket}.s3.{region}.amazonaws.com/")
                            }
                            _ => format!("https://{bucket}.s3.amazonaws.com/"),
                        };
                        (Url::parse(&host).map_err(malformed)?, false)
                    }
                };

                let mut segments = url.path_segments_mut().map_err(|_| {
                    FetchError::Permanent("object store endpoint cannot be a base".to_string())
                })?;
                segments.pop_if_empty();
                if path_style {
                    segments.push(bucket);
                }
                segments.extend(key.trim_start_matches('/').split('/'));
                drop(segments);
                url
            }
        };

        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::Permanent(format!(
                "unsupported URL scheme {}",
                url.scheme()
            )));
        }

        if !request.params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(request.params.iter().map(|(k, v)| (k.trim(), v.trim())));
        }
        Ok(url)
    }

    async fn get(&self, url: Url, timeout: Duration) -> Result<Bytes, FetchError> {
        let mut response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, &url));
        }

        let Some(limit) = self.max_payload else {
            return response.bytes().await.map_err(classify_error);
        };
        let too_large = || {
            FetchError::Permanent(format!(
                "response from {} exceeds the {limit} byte limit",
                redact(&url)
            ))
        };
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(too_large());
        }

        // Content-Length may be absent or wrong, so count while reading
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(classify_error)? {
            if body.len() as u64 + chunk.len() as u64 > limit {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        let url = self.url_for(request)?;
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let started = Instant::now();
        trace!(url = %redact(&url), ?timeout, "Fetching");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = self.get(url.clone(), timeout) => result,
        };

        match &result {
            Ok(bytes) => debug!(
                url = %redact(&url),
                bytes = bytes.len(),
                elapsed = ?started.elapsed(),
                "Fetched"
            ),
            Err(e) => debug!(url = %redact(&url), error = %e, "Fetch failed"),
        }
        result
    }
}
