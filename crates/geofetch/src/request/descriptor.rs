//! # Request Descriptor
//!
//! The fully-formed, provider-neutral description of one fetch.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::format::MimeType;
use crate::validate::Checksum;

/// Identity of the remote resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resource {
    /// An OGC-style service endpoint serving the named layer
    Service { endpoint: String, layer: String },
    /// An object in a cloud object store bucket
    Object {
        bucket: String,
        key: String,
        region: Option<String>,
    },
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Service { endpoint, layer } => write!(f, "{endpoint} [{layer}]"),
            Resource::Object { bucket, key, .. } => write!(f, "s3://{bucket}/{key}"),
        }
    }
}

/// Immutable description of a download request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub resource: Resource,
    /// Spatial/temporal filters and other parameters that shape the response
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    pub format: MimeType,
    /// Per-attempt timeout override; does not affect the response bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Digest known a priori (fixed product archives); does not affect the response bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
}

impl RequestDescriptor {
    pub fn new(resource: Resource, format: MimeType) -> Self {
        Self {
            resource,
            params: BTreeMap::new(),
            format,
            timeout: None,
            checksum: None,
        }
    }

    /// Descriptor for a service layer.
    ///
    /// The request URL is `endpoint` plus `params` and nothing else: `layer` and
    /// `format` name the artifact for caching but are only sent when `params`
    /// carries them (`LAYERS`, `COVERAGE` or `LAYER`, plus `FORMAT` where the
    /// service takes one). The [`RequestBuilder`](crate::RequestBuilder)s add them.
    pub fn service(endpoint: impl Into<String>, layer: impl Into<String>, format: MimeType) -> Self {
        Self::new(
            Resource::Service {
                endpoint: endpoint.into(),
                layer: layer.into(),
            },
            format,
        )
    }

    /// Descriptor for an object store key
    pub fn object(bucket: impl Into<String>, key: impl Into<String>, format: MimeType) -> Self {
        Self::new(
            Resource::Object {
                bucket: bucket.into(),
                key: key.into(),
                region: None,
            },
            format,
        )
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        if let Resource::Object { region: r, .. } = &mut self.resource {
            *r = Some(region.into());
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }
}
