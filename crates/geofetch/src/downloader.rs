//! # Download Manager
//!
//! Entry point of the engine. A download is served from the cache when
//! possible; otherwise it joins the single in-flight fetch for its fingerprint
//! or starts one. A fetch runs the transport through the retry policy,
//! validates the payload and stores it before every waiter receives a clone
//! of the result. A caller with its own expected checksum has cached or shared
//! payloads checked against it before they are handed out.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared, WeakShared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheConfig, CacheEntry, CacheManager, CacheMetadata, CacheProvider};
use crate::error::ValidationError;
use crate::request::{Fingerprint, RequestDescriptor, fingerprint};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::transport::{HttpTransport, Transport};
use crate::validate::{ChecksumValidator, ValidationTarget, Validator, ValidatorChain};
use crate::{DownloadError, DownloaderConfig};

/// Fetch rounds per flight: the first one and a single refetch after a rejected payload
const VALIDATION_ROUNDS: u32 = 2;

/// Configuration for the DownloadManager
#[derive(Debug, Clone)]
pub struct DownloadManagerConfig {
    /// Cache configuration; `None` disables caching
    pub cache_config: Option<CacheConfig>,
    /// Retry settings of each fetch
    pub retry: RetryConfig,
    /// Overall bound of one caller's wait, independent of attempt timeouts
    pub deadline: Option<Duration>,
}

impl Default for DownloadManagerConfig {
    fn default() -> Self {
        Self {
            cache_config: Some(CacheConfig::default()),
            retry: RetryConfig::default(),
            deadline: None,
        }
    }
}

/// Where an artifact came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Cache,
    Network,
}

/// A validated payload handed to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub fingerprint: Fingerprint,
    pub payload: Bytes,
    pub metadata: CacheMetadata,
    pub origin: Origin,
}

impl Artifact {
    fn from_entry(fingerprint: Fingerprint, entry: CacheEntry, origin: Origin) -> Self {
        Self {
            fingerprint,
            payload: entry.payload,
            metadata: entry.metadata,
            origin,
        }
    }
}

/// Counters since the manager was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Transport calls, retries included
    pub fetches: u64,
    /// Callers that joined a fetch started by someone else
    pub coalesced: u64,
    pub cache_write_errors: u64,
}

#[derive(Default)]
struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    fetches: AtomicU64,
    coalesced: AtomicU64,
    cache_write_errors: AtomicU64,
}

type FlightResult = Result<Artifact, DownloadError>;
type Flight = Shared<BoxFuture<'static, FlightResult>>;

struct Inner {
    transport: Arc<dyn Transport>,
    cache: Arc<dyn CacheProvider>,
    validator: Arc<dyn Validator>,
    retry: RetryPolicy,
    ttl: Option<Duration>,
    in_flight: Mutex<HashMap<Fingerprint, (u64, WeakShared<BoxFuture<'static, FlightResult>>)>>,
    next_flight: AtomicU64,
    shutdown: CancellationToken,
    counters: Counters,
}

/// Releases the in-flight slot when a flight finishes or is dropped
struct FlightGuard {
    inner: Arc<Inner>,
    id: u64,
    fingerprint: Fingerprint,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight.lock();
        // A newer flight may already own the slot
        if in_flight
            .get(&self.fingerprint)
            .is_some_and(|(id, _)| *id == self.id)
        {
            in_flight.remove(&self.fingerprint);
        }
    }
}

impl Inner {
    /// Cache lookup; a failing cache is treated as a miss
    async fn lookup(&self, key: &Fingerprint) -> Option<CacheEntry> {
        match self.cache.get(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(fingerprint = %key.short(), error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    async fn validate(&self, payload: Bytes, target: ValidationTarget) -> Result<(), ValidationError> {
        let validator = self.validator.clone();
        tokio::task::spawn_blocking(move || validator.validate(&payload, &target))
            .await
            .unwrap_or_else(|e| Err(ValidationError::Corrupt(format!("validator failed: {e}"))))
    }

    /// Check a payload that was not validated for this caller against its own digest
    async fn verify_checksum(
        &self,
        payload: &Bytes,
        target: ValidationTarget,
    ) -> Result<(), ValidationError> {
        if target.checksum.is_none() {
            return Ok(());
        }
        let payload = payload.clone();
        tokio::task::spawn_blocking(move || ChecksumValidator.validate(&payload, &target))
            .await
            .unwrap_or_else(|e| Err(ValidationError::Corrupt(format!("validator failed: {e}"))))
    }

    async fn discard(&self, key: &Fingerprint) {
        if let Err(e) = self.cache.invalidate(key).await {
            warn!(fingerprint = %key.short(), error = %e, "Failed to invalidate cache entry");
        }
    }

    /// Cached entry for `key` if it satisfies the request's checksum; a mismatching entry is evicted
    async fn cached(&self, key: &Fingerprint, request: &RequestDescriptor) -> Option<CacheEntry> {
        let entry = self.lookup(key).await?;
        match self
            .verify_checksum(&entry.payload, ValidationTarget::from(request))
            .await
        {
            Ok(()) => Some(entry),
            Err(e) => {
                warn!(
                    fingerprint = %key.short(),
                    error = %e,
                    "Cached payload does not match the expected checksum, refetching"
                );
                self.discard(key).await;
                None
            }
        }
    }

    /// The single fetch shared by every waiter of one fingerprint
    async fn flight(
        self: Arc<Self>,
        id: u64,
        key: Fingerprint,
        request: RequestDescriptor,
    ) -> FlightResult {
        let _guard = FlightGuard {
            inner: self.clone(),
            id,
            fingerprint: key.clone(),
        };

        // The previous flight may have stored it after our lookup
        if let Some(entry) = self.cached(&key, &request).await {
            return Ok(Artifact::from_entry(key, entry, Origin::Cache));
        }

        let cancel = self.shutdown.child_token();
        let target = ValidationTarget::from(&request);
        let mut attempts = 0;
        let mut rejection = ValidationError::Empty;

        for round in 1..=VALIDATION_ROUNDS {
            let outcome = self.retry.run(&*self.transport, &request, &cancel).await;
            attempts += outcome.attempts_made();
            self.counters
                .fetches
                .fetch_add(outcome.attempts_made() as u64, Ordering::Relaxed);

            let payload = outcome
                .result
                .map_err(|e| DownloadError::from_fetch(e, attempts))?;

            match self.validate(payload.clone(), target.clone()).await {
                Ok(()) => {
                    let entry = CacheEntry::new(request.format, payload, self.ttl);
                    if let Err(e) = self.cache.put(key.clone(), entry.clone()).await {
                        self.counters
                            .cache_write_errors
                            .fetch_add(1, Ordering::Relaxed);
                        warn!(fingerprint = %key.short(), error = %e, "Failed to cache artifact");
                    }
                    debug!(
                        fingerprint = %key.short(),
                        size = entry.metadata.size,
                        attempts,
                        "Downloaded"
                    );
                    return Ok(Artifact::from_entry(key, entry, Origin::Network));
                }
                Err(e) => {
                    warn!(
                        fingerprint = %key.short(),
                        resource = %request.resource,
                        round,
                        error = %e,
                        "Payload rejected"
                    );
                    self.discard(&key).await;
                    rejection = e;
                }
            }
        }

        Err(DownloadError::ValidationFailed {
            attempts,
            cause: rejection,
        })
    }
}

/// Cache-first, single-flight downloader
pub struct DownloadManager {
    inner: Arc<Inner>,
    deadline: Option<Duration>,
}

impl DownloadManager {
    /// Create a manager fetching over HTTP with the given client settings
    pub async fn new(
        downloader: &DownloaderConfig,
        config: DownloadManagerConfig,
    ) -> Result<Self, DownloadError> {
        let transport = Arc::new(HttpTransport::new(downloader)?);
        Self::with_transport(transport, config).await
    }

    /// Create a manager over any transport, with the default validators
    pub async fn with_transport(
        transport: Arc<dyn Transport>,
        config: DownloadManagerConfig,
    ) -> Result<Self, DownloadError> {
        let cache = match &config.cache_config {
            Some(cache_config) => CacheManager::new(cache_config.clone()).await?,
            None => CacheManager::disabled(),
        };
        Ok(Self::from_parts(
            transport,
            Arc::new(cache),
            Arc::new(ValidatorChain::default()),
            config,
        ))
    }

    /// Assemble a manager from explicit collaborators
    pub fn from_parts(
        transport: Arc<dyn Transport>,
        cache: Arc<dyn CacheProvider>,
        validator: Arc<dyn Validator>,
        config: DownloadManagerConfig,
    ) -> Self {
        let ttl = config.cache_config.as_ref().and_then(|c| c.default_ttl);
        Self {
            inner: Arc::new(Inner {
                transport,
                cache,
                validator,
                retry: RetryPolicy::new(config.retry),
                ttl,
                in_flight: Mutex::new(HashMap::new()),
                next_flight: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
                counters: Counters::default(),
            }),
            deadline: config.deadline,
        }
    }

    /// Download a request, from the cache when possible
    pub async fn download(&self, request: RequestDescriptor) -> Result<Artifact, DownloadError> {
        self.download_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Like [`download`](Self::download), abandoning the wait when `cancel` fires.
    ///
    /// Cancelling only stops this caller; a fetch shared with other callers keeps
    /// running until all of them are gone.
    pub async fn download_with_cancel(
        &self,
        request: RequestDescriptor,
        cancel: CancellationToken,
    ) -> Result<Artifact, DownloadError> {
        let wait = async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(DownloadError::Cancelled),
                result = self.download_inner(request) => result,
            }
        };

        match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, wait)
                .await
                .unwrap_or(Err(DownloadError::DeadlineExceeded(deadline))),
            None => wait.await,
        }
    }

    async fn download_inner(&self, request: RequestDescriptor) -> Result<Artifact, DownloadError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let key = fingerprint(&request)?;

        if let Some(entry) = self.inner.cached(&key, &request).await {
            self.inner
                .counters
                .cache_hits
                .fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %key.short(), "Cache hit");
            return Ok(Artifact::from_entry(key, entry, Origin::Cache));
        }
        self.inner
            .counters
            .cache_misses
            .fetch_add(1, Ordering::Relaxed);

        let target = ValidationTarget::from(&request);
        let (flight, joined) = self.join_or_start(key, request);
        let artifact = flight.await?;

        // A joined flight was validated against its starter's checksum, not ours
        if joined {
            if let Err(cause) = self.inner.verify_checksum(&artifact.payload, target).await {
                warn!(
                    fingerprint = %artifact.fingerprint.short(),
                    error = %cause,
                    "Shared payload does not match the expected checksum"
                );
                return Err(DownloadError::ValidationFailed { attempts: 0, cause });
            }
        }
        Ok(artifact)
    }

    /// The running flight for `key` and `true`, or a new flight and `false`
    fn join_or_start(&self, key: Fingerprint, request: RequestDescriptor) -> (Flight, bool) {
        let mut in_flight = self.inner.in_flight.lock();

        if let Some(flight) = in_flight.get(&key).and_then(|(_, weak)| weak.upgrade()) {
            self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %key.short(), "Joining in-flight download");
            return (flight, true);
        }

        let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
        debug!(fingerprint = %key.short(), resource = %request.resource, "Starting download");
        let flight = self
            .inner
            .clone()
            .flight(id, key.clone(), request)
            .boxed()
            .shared();
        if let Some(weak) = flight.downgrade() {
            in_flight.insert(key, (id, weak));
        }
        (flight, false)
    }

    /// Cancel every in-flight fetch; later downloads fail with `Cancelled`
    pub fn shutdown(&self) {
        info!(
            in_flight = self.in_flight_count(),
            "Shutting down download manager"
        );
        self.inner.shutdown.cancel();
    }

    pub fn stats(&self) -> DownloadStats {
        let c = &self.inner.counters;
        DownloadStats {
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            cache_misses: c.cache_misses.load(Ordering::Relaxed),
            fetches: c.fetches.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            cache_write_errors: c.cache_write_errors.load(Ordering::Relaxed),
        }
    }

    /// Fingerprints with a fetch currently running
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// The cache store, for maintenance
    pub fn cache(&self) -> &Arc<dyn CacheProvider> {
        &self.inner.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheResult;
    use crate::error::ErrorKind;
    use crate::format::MimeType;
    use crate::validate::Checksum;
    use crate::request::{RequestBuilder, RequestParams, ServiceEndpoint, WmsRequestBuilder};
    use crate::testing::{ScriptedTransport, Step};

    const PNG_A: &[u8] = b"\x89PNG\r\n\x1a\nimage-A";
    const PNG_B: &[u8] = b"\x89PNG\r\n\x1a\nimage-B";

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    }

    fn config(dir: &std::path::Path) -> DownloadManagerConfig {
        DownloadManagerConfig {
            cache_config: Some(CacheConfig {
                disk_cache_path: Some(dir.to_path_buf()),
                ..CacheConfig::default()
            }),
            retry: RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                jitter: true,
                attempt_timeout: None,
            },
            deadline: None,
        }
    }

    async fn manager(
        transport: Arc<ScriptedTransport>,
        dir: &std::path::Path,
    ) -> DownloadManager {
        DownloadManager::with_transport(transport, config(dir))
            .await
            .unwrap()
    }

    fn png_request() -> RequestDescriptor {
        RequestDescriptor::service("https://example.com/ogc/wms/id", "TRUE_COLOR", MimeType::Png)
            .with_param("BBOX", "10,45,11,46")
    }

    #[tokio::test]
    async fn test_true_color_scenario() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new(
            vec![Step::ok(PNG_A)],
            Step::ok(PNG_B),
        ));
        let manager = manager(transport.clone(), dir.path()).await;

        let request = WmsRequestBuilder::new(ServiceEndpoint::new("instance"))
            .build(
                &RequestParams::new()
                    .layer("TRUE_COLOR")
                    .bbox("10,45,11,46".parse().unwrap())
                    .time("2020-01-01".parse().unwrap())
                    .size(512, 512),
            )
            .unwrap();

        let first = manager.download(request.clone()).await.unwrap();
        assert_eq!(first.origin, Origin::Network);
        assert_eq!(first.payload, Bytes::from_static(PNG_A));
        assert_eq!(transport.calls(), 1);

        let second = manager.download(request).await.unwrap();
        assert_eq!(second.origin, Origin::Cache);
        assert_eq!(second.payload, first.payload);
        assert_eq!(second.fingerprint, first.fingerprint);
        assert_eq!(transport.calls(), 1);

        let stats = manager.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.fetches, 1);
    }

    #[tokio::test]
    async fn test_concurrent_downloads_share_one_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(
            ScriptedTransport::always(Step::ok(PNG_A)).with_latency(Duration::from_millis(100)),
        );
        let manager = Arc::new(manager(transport.clone(), dir.path()).await);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.download(png_request()).await })
            })
            .collect();

        let mut artifacts = Vec::new();
        for handle in handles {
            artifacts.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(transport.calls(), 1);
        assert!(artifacts.iter().all(|a| a.payload == artifacts[0].payload));
        assert!(artifacts.iter().all(|a| a.fingerprint == artifacts[0].fingerprint));
        assert_eq!(manager.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_failure_is_shared() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(
            ScriptedTransport::always(Step::Permanent).with_latency(Duration::from_millis(50)),
        );
        let manager = Arc::new(manager(transport.clone(), dir.path()).await);

        let (a, b) = tokio::join!(
            manager.download(png_request()),
            manager.download(png_request())
        );
        assert_eq!(a.unwrap_err().kind(), ErrorKind::Permanent);
        assert_eq!(b.unwrap_err().kind(), ErrorKind::Permanent);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::always(Step::Transient));
        let manager = manager(transport.clone(), dir.path()).await;

        let err = manager.download(png_request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(err.attempts(), Some(3));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_fetches_once() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::always(Step::Permanent));
        let manager = manager(transport.clone(), dir.path()).await;

        let err = manager.download(png_request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_refetches_once() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::always(Step::ok(b"<ServiceException/>")));
        let manager = manager(transport.clone(), dir.path()).await;

        let err = manager.download(png_request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        assert_eq!(err.attempts(), Some(2));
        assert_eq!(transport.calls(), 2);

        let key = fingerprint(&png_request()).unwrap();
        assert!(!manager.cache().contains(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_refetch_after_rejection_can_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new(
            vec![Step::ok(b"truncated")],
            Step::ok(PNG_A),
        ));
        let manager = manager(transport.clone(), dir.path()).await;

        let artifact = manager.download(png_request()).await.unwrap();
        assert_eq!(artifact.payload, Bytes::from_static(PNG_A));
        assert_eq!(transport.calls(), 2);
        assert!(manager.cache().contains(&artifact.fingerprint).await.unwrap());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_a_validation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::always(Step::ok(PNG_A)));
        let manager = manager(transport.clone(), dir.path()).await;

        let request = png_request().with_checksum(wrong_md5());
        let err = manager.download(request).await.unwrap_err();
        assert!(matches!(
            err,
            DownloadError::ValidationFailed {
                cause: ValidationError::ChecksumMismatch { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_request_never_fetches() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::always(Step::ok(PNG_A)));
        let manager = manager(transport.clone(), dir.path()).await;

        let request = RequestDescriptor::service("https://example.com", "", MimeType::Png);
        let err = manager.download(request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_cache_survives_new_manager() {
        let dir = tempfile::tempdir().unwrap();
        let first = manager(Arc::new(ScriptedTransport::always(Step::ok(PNG_A))), dir.path()).await;
        first.download(png_request()).await.unwrap();

        let offline = Arc::new(ScriptedTransport::always(Step::Permanent));
        let second = manager(offline.clone(), dir.path()).await;
        let artifact = second.download(png_request()).await.unwrap();
        assert_eq!(artifact.origin, Origin::Cache);
        assert_eq!(offline.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelling_one_waiter_keeps_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(
            ScriptedTransport::always(Step::ok(PNG_A)).with_latency(Duration::from_millis(200)),
        );
        let manager = Arc::new(manager(transport.clone(), dir.path()).await);

        let cancel = CancellationToken::new();
        let cancelled = {
            let manager = manager.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { manager.download_with_cancel(png_request(), cancel).await })
        };
        let patient = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.download(png_request()).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        assert!(matches!(
            cancelled.await.unwrap(),
            Err(DownloadError::Cancelled)
        ));
        let artifact = patient.await.unwrap().unwrap();
        assert_eq!(artifact.payload, Bytes::from_static(PNG_A));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelling_every_waiter_drops_the_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![Step::Hang], Step::ok(PNG_A)));
        let manager = Arc::new(manager(transport.clone(), dir.path()).await);

        let cancel = CancellationToken::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let manager = manager.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { manager.download_with_cancel(png_request(), cancel).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.in_flight_count(), 1);
        cancel.cancel();
        for waiter in waiters {
            assert!(matches!(waiter.await.unwrap(), Err(DownloadError::Cancelled)));
        }
        assert_eq!(manager.in_flight_count(), 0);

        // A new caller starts a fresh fetch
        let artifact = manager.download(png_request()).await.unwrap();
        assert_eq!(artifact.origin, Origin::Network);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_deadline_bounds_the_wait() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::always(Step::Hang));
        let manager = DownloadManager::with_transport(
            transport,
            DownloadManagerConfig {
                deadline: Some(Duration::from_millis(50)),
                ..config(dir.path())
            },
        )
        .await
        .unwrap();

        let err = manager.download(png_request()).await.unwrap_err();
        assert!(matches!(err, DownloadError::DeadlineExceeded(_)));
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::always(Step::Hang));
        let manager = Arc::new(manager(transport, dir.path()).await);

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.download(png_request()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.shutdown();

        assert!(matches!(waiter.await.unwrap(), Err(DownloadError::Cancelled)));
        assert!(matches!(
            manager.download(png_request()).await,
            Err(DownloadError::Cancelled)
        ));
    }

    fn sha256_of(payload: &[u8]) -> Checksum {
        use sha2::Digest;
        Checksum::sha256(hex::encode(sha2::Sha256::digest(payload)))
    }

    fn wrong_md5() -> Checksum {
        Checksum::md5("00000000000000000000000000000000")
    }

    #[tokio::test]
    async fn test_cache_hit_is_checked_against_expected_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::always(Step::ok(PNG_A)));
        let manager = manager(transport.clone(), dir.path()).await;

        manager.download(png_request()).await.unwrap();
        assert_eq!(transport.calls(), 1);

        let matching = manager
            .download(png_request().with_checksum(sha256_of(PNG_A)))
            .await
            .unwrap();
        assert_eq!(matching.origin, Origin::Cache);
        assert_eq!(transport.calls(), 1);

        // The stale entry is dropped and both refetch rounds reject the bytes
        let err = manager
            .download(png_request().with_checksum(wrong_md5()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DownloadError::ValidationFailed {
                attempts: 2,
                cause: ValidationError::ChecksumMismatch { .. },
            }
        ));
        assert_eq!(transport.calls(), 3);
        let key = fingerprint(&png_request()).unwrap();
        assert!(!manager.cache().contains(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_cached_entry_replaced_when_checksum_differs() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new(
            vec![Step::ok(PNG_A)],
            Step::ok(PNG_B),
        ));
        let manager = manager(transport.clone(), dir.path()).await;

        manager.download(png_request()).await.unwrap();
        let fresh = manager
            .download(png_request().with_checksum(sha256_of(PNG_B)))
            .await
            .unwrap();
        assert_eq!(fresh.origin, Origin::Network);
        assert_eq!(fresh.payload, Bytes::from_static(PNG_B));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_joined_flight_is_checked_against_own_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(
            ScriptedTransport::always(Step::ok(PNG_A)).with_latency(Duration::from_millis(150)),
        );
        let manager = manager(transport.clone(), dir.path()).await;

        let late = |checksum: Checksum| {
            let manager = &manager;
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                manager.download(png_request().with_checksum(checksum)).await
            }
        };
        let (plain, wrong, right) = tokio::join!(
            manager.download(png_request()),
            late(wrong_md5()),
            late(sha256_of(PNG_A))
        );

        assert_eq!(plain.unwrap().payload, Bytes::from_static(PNG_A));
        assert!(matches!(
            wrong,
            Err(DownloadError::ValidationFailed {
                cause: ValidationError::ChecksumMismatch { .. },
                ..
            })
        ));
        assert_eq!(right.unwrap().payload, Bytes::from_static(PNG_A));
        assert_eq!(transport.calls(), 1);
        assert_eq!(manager.stats().coalesced, 2);
    }

    /// Accepts nothing: every write fails
    struct FullDisk;

    #[async_trait::async_trait]
    impl CacheProvider for FullDisk {
        async fn contains(&self, _key: &Fingerprint) -> CacheResult<bool> {
            Ok(false)
        }
        async fn get(&self, _key: &Fingerprint) -> CacheResult<Option<CacheEntry>> {
            Ok(None)
        }
        async fn put(&self, _key: Fingerprint, _entry: CacheEntry) -> CacheResult<()> {
            Err(std::io::Error::other("no space left on device"))
        }
        async fn invalidate(&self, _key: &Fingerprint) -> CacheResult<()> {
            Ok(())
        }
        async fn clear(&self) -> CacheResult<()> {
            Ok(())
        }
        async fn sweep(&self) -> CacheResult<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_cache_write_failure_still_returns_artifact() {
        let transport = Arc::new(ScriptedTransport::always(Step::ok(PNG_A)));
        let manager = DownloadManager::from_parts(
            transport.clone(),
            Arc::new(FullDisk),
            Arc::new(ValidatorChain::default()),
            DownloadManagerConfig::default(),
        );

        let artifact = manager.download(png_request()).await.unwrap();
        assert_eq!(artifact.origin, Origin::Network);
        assert_eq!(artifact.payload, Bytes::from_static(PNG_A));
        assert_eq!(manager.stats().cache_write_errors, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new(
            vec![Step::ok(PNG_A)],
            Step::ok(PNG_B),
        ));
        let mut config = config(dir.path());
        if let Some(cache) = config.cache_config.as_mut() {
            cache.default_ttl = Some(Duration::from_millis(30));
        }
        let manager = DownloadManager::with_transport(transport.clone(), config)
            .await
            .unwrap();

        manager.download(png_request()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        let artifact = manager.download(png_request()).await.unwrap();
        assert_eq!(artifact.origin, Origin::Network);
        assert_eq!(artifact.payload, Bytes::from_static(PNG_B));
        assert_eq!(transport.calls(), 2);
        assert_eq!(manager.stats().cache_misses, 2);
    }

    #[tokio::test]
    async fn test_without_cache_every_download_fetches() {
        let transport = Arc::new(ScriptedTransport::always(Step::ok(PNG_A)));
        let manager = DownloadManager::with_transport(
            transport.clone(),
            DownloadManagerConfig {
                cache_config: None,
                ..DownloadManagerConfig::default()
            },
        )
        .await
        .unwrap();

        manager.download(png_request()).await.unwrap();
        manager.download(png_request()).await.unwrap();
        assert_eq!(transport.calls(), 2);
    }
}
