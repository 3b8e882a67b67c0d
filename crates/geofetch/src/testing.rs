//! Scripted transport shared by the engine's unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::request::RequestDescriptor;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Ok(Bytes),
    Transient,
    Permanent,
    /// Never answers; only cancellation or a timeout ends the attempt
    Hang,
}

impl Step {
    pub(crate) fn ok(bytes: &'static [u8]) -> Self {
        Step::Ok(Bytes::from_static(bytes))
    }
}

/// Plays back `script`, then repeats `fallback` forever
pub(crate) struct ScriptedTransport {
    calls: AtomicU32,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    latency: Duration,
    last_timeout: Mutex<Option<Duration>>,
}

impl ScriptedTransport {
    pub(crate) fn always(step: Step) -> Self {
        Self::new(Vec::new(), step)
    }

    pub(crate) fn new(script: Vec<Step>, fallback: Step) -> Self {
        Self {
            calls: AtomicU32::new(0),
            script: Mutex::new(script.into()),
            fallback,
            latency: Duration::ZERO,
            last_timeout: Mutex::new(None),
        }
    }

    /// Delay every answer, so concurrent callers overlap
    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Timeout carried by the most recent request
    pub(crate) fn last_timeout(&self) -> Option<Duration> {
        *self.last_timeout.lock()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_timeout.lock() = request.timeout;
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let answer = async {
            tokio::time::sleep(self.latency).await;
            match step {
                Step::Ok(bytes) => Ok(bytes),
                Step::Transient => Err(FetchError::Transient("HTTP 503".to_string())),
                Step::Permanent => Err(FetchError::Permanent("HTTP 404".to_string())),
                Step::Hang => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = answer => result,
        }
    }
}
