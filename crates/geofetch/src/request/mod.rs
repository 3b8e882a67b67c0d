//! # Requests
//!
//! Descriptors, fingerprints and the provider builders that produce them.

mod builder;
mod descriptor;
mod fingerprint;
mod params;

pub use builder::{
    AwsRequestBuilder, DEFAULT_AWS_REGION, DEFAULT_L1C_BUCKET, DEFAULT_SERVICE_URL,
    FisRequestBuilder, Provider, RequestBuilder, ServiceEndpoint, WcsRequestBuilder,
    WmsRequestBuilder,
};
pub use descriptor::{RequestDescriptor, Resource};
pub use fingerprint::{Fingerprint, fingerprint};
pub use params::{BBox, Crs, RequestParams, TimeRange};
