//! # Retry Policy
//!
//! Drives a [`Transport`] through bounded attempts with exponential backoff.
//! Only transient failures are retried; a permanent failure or cancellation
//! ends the run immediately.

use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::FetchError;
use crate::request::RequestDescriptor;
use crate::transport::Transport;

/// Retry settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound of any single delay
    pub max_delay: Duration,
    /// Randomize each delay between half and all of its nominal value
    pub jitter: bool,
    /// Bound of a single attempt when the descriptor sets none
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
            attempt_timeout: None,
        }
    }
}

/// Where a run currently is
#[derive(Debug)]
pub enum RetryState {
    Idle,
    Attempting(u32),
    Retrying { attempt: u32, delay: Duration },
    Success(Bytes),
    Failed(FetchError),
}

/// One transport call
#[derive(Debug, Clone, PartialEq)]
pub struct FetchAttempt {
    /// 1-based
    pub attempt: u32,
    pub outcome: Result<(), FetchError>,
    pub latency: Duration,
}

/// Result of a run with every attempt it made
#[derive(Debug)]
pub struct RetryOutcome {
    pub result: Result<Bytes, FetchError>,
    pub attempts: Vec<FetchAttempt>,
}

impl RetryOutcome {
    pub fn attempts_made(&self) -> u32 {
        self.attempts.len() as u32
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Nominal delay after failed attempt `attempt`: `min(base * 2^(attempt-1), max)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.config
            .base_delay
            .saturating_mul(factor)
            .min(self.config.max_delay)
    }

    /// Equal jitter: half fixed, half random
    fn jittered(&self, delay: Duration) -> Duration {
        if !self.config.jitter || delay.is_zero() {
            return delay;
        }
        let half = delay / 2;
        let spread = rand::rng().random_range(0..=half.as_millis() as u64);
        half + Duration::from_millis(spread)
    }

    async fn attempt(
        &self,
        transport: &dyn Transport,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        let Some(limit) = request.timeout.or(self.config.attempt_timeout) else {
            return transport.fetch(request, cancel).await;
        };

        // The transport bounds its own I/O by the descriptor's timeout
        let bounded;
        let request = if request.timeout.is_some() {
            request
        } else {
            bounded = request.clone().with_timeout(limit);
            &bounded
        };

        tokio::time::timeout(limit, transport.fetch(request, cancel))
            .await
            .unwrap_or_else(|_| {
                Err(FetchError::Transient(format!(
                    "attempt timed out after {limit:?}"
                )))
            })
    }

    /// Run the request until it succeeds, fails permanently, runs out of
    /// attempts or is cancelled
    pub async fn run(
        &self,
        transport: &dyn Transport,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> RetryOutcome {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = Vec::new();
        let mut state = RetryState::Idle;

        let result = loop {
            state = match state {
                RetryState::Idle => RetryState::Attempting(1),

                RetryState::Attempting(attempt) => {
                    trace!(resource = %request.resource, attempt, "Attempting fetch");
                    let started = Instant::now();
                    let outcome = if cancel.is_cancelled() {
                        Err(FetchError::Cancelled)
                    } else {
                        self.attempt(transport, request, cancel).await
                    };
                    attempts.push(FetchAttempt {
                        attempt,
                        outcome: outcome.as_ref().map(|_| ()).map_err(|e| e.clone()),
                        latency: started.elapsed(),
                    });

                    match outcome {
                        Ok(bytes) => RetryState::Success(bytes),
                        Err(e) if e.is_retryable() && attempt < max_attempts => {
                            let delay = self.jittered(self.backoff_delay(attempt));
                            debug!(
                                resource = %request.resource,
                                attempt,
                                max_attempts,
                                ?delay,
                                error = %e,
                                "Transient failure, retrying"
                            );
                            RetryState::Retrying { attempt, delay }
                        }
                        Err(e) => {
                            if e.is_retryable() {
                                warn!(
                                    resource = %request.resource,
                                    attempts = attempt,
                                    error = %e,
                                    "Giving up after transient failures"
                                );
                            }
                            RetryState::Failed(e)
                        }
                    }
                }

                RetryState::Retrying { attempt, delay } => {
                    tokio::select! {
                        _ = cancel.cancelled() => RetryState::Failed(FetchError::Cancelled),
                        _ = tokio::time::sleep(delay) => RetryState::Attempting(attempt + 1),
                    }
                }

                RetryState::Success(bytes) => break Ok(bytes),
                RetryState::Failed(e) => break Err(e),
            };
        };

        RetryOutcome { result, attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::MimeType;
    use crate::testing::{ScriptedTransport, Step};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: true,
            attempt_timeout: None,
        })
    }

    fn request() -> RequestDescriptor {
        RequestDescriptor::service("https://example.com/wms", "TRUE_COLOR", MimeType::Png)
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::new(RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            ..RetryConfig::default()
        });
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(800));
        assert_eq!(policy.backoff_delay(5), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(200), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_half_and_full_delay() {
        let policy = RetryPolicy::default();
        let delay = Duration::from_millis(800);
        for _ in 0..50 {
            let jittered = policy.jittered(delay);
            assert!(jittered >= delay / 2 && jittered <= delay);
        }
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_attempts() {
        let transport = ScriptedTransport::always(Step::Transient);
        let outcome = policy(4)
            .run(&transport, &request(), &CancellationToken::new())
            .await;

        assert!(matches!(outcome.result, Err(FetchError::Transient(_))));
        assert_eq!(outcome.attempts_made(), 4);
        assert_eq!(transport.calls(), 4);
        assert_eq!(outcome.attempts.last().unwrap().attempt, 4);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let transport = ScriptedTransport::always(Step::Permanent);
        let outcome = policy(5)
            .run(&transport, &request(), &CancellationToken::new())
            .await;

        assert!(matches!(outcome.result, Err(FetchError::Permanent(_))));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let transport =
            ScriptedTransport::new(vec![Step::Transient, Step::Transient], Step::ok(b"ok"));
        let outcome = policy(3)
            .run(&transport, &request(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.attempts_made(), 3);
        assert_eq!(outcome.result.as_ref().unwrap(), &Bytes::from_static(b"ok"));
        assert!(outcome.attempts[0].outcome.is_err());
        assert!(outcome.attempts[2].outcome.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_aborts() {
        let transport = ScriptedTransport::always(Step::Transient);
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            jitter: false,
            ..RetryConfig::default()
        });
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let outcome = policy.run(&transport, &request(), &cancel).await;

        assert_eq!(outcome.result.unwrap_err(), FetchError::Cancelled);
        assert_eq!(transport.calls(), 1);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_attempt_timeout_counts_as_transient() {
        let transport = ScriptedTransport::always(Step::Hang);
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            attempt_timeout: Some(Duration::from_millis(20)),
            ..RetryConfig::default()
        });

        let outcome = policy
            .run(&transport, &request(), &CancellationToken::new())
            .await;
        assert!(matches!(outcome.result, Err(FetchError::Transient(_))));
        assert_eq!(transport.calls(), 2);

        // the descriptor's own timeout wins over the default
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 1,
            attempt_timeout: Some(Duration::from_secs(60)),
            ..RetryConfig::default()
        });
        let started = Instant::now();
        let outcome = policy
            .run(
                &ScriptedTransport::always(Step::Hang),
                &request().with_timeout(Duration::from_millis(20)),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(outcome.result, Err(FetchError::Transient(_))));
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_attempt_timeout_reaches_the_transport() {
        let transport = ScriptedTransport::always(Step::ok(b"ok"));
        let policy = RetryPolicy::new(RetryConfig {
            attempt_timeout: Some(Duration::from_secs(600)),
            ..RetryConfig::default()
        });

        policy
            .run(&transport, &request(), &CancellationToken::new())
            .await
            .result
            .unwrap();
        assert_eq!(transport.last_timeout(), Some(Duration::from_secs(600)));

        policy
            .run(
                &transport,
                &request().with_timeout(Duration::from_secs(5)),
                &CancellationToken::new(),
            )
            .await
            .result
            .unwrap();
        assert_eq!(transport.last_timeout(), Some(Duration::from_secs(5)));
    }
}
