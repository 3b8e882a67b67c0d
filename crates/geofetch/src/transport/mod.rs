//! # Transport
//!
//! A single outbound fetch of a fully-formed [`RequestDescriptor`]. No retries
//! happen at this layer; failures are classified so the retry policy can
//! decide what to do with them.

mod http;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::request::RequestDescriptor;

pub use http::{HttpTransport, create_client};

/// Performs one fetch attempt
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the response bytes, or fail with [`FetchError::Cancelled`] as soon
    /// as `cancel` fires
    async fn fetch(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Bytes, FetchError>;
}
