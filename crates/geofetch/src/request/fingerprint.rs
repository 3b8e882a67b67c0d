//! # Request Fingerprinting
//!
//! Derives the cache key of a request from the fields that determine the
//! response bytes. Parameter order, key case, surrounding whitespace and
//! numeric formatting do not change the fingerprint; the per-attempt timeout
//! and the expected checksum are excluded entirely.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::DownloadError;
use crate::request::{RequestDescriptor, Resource};

/// Stable identifier of a request's semantic content (hex SHA-256)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines and file names
    pub fn short(&self) -> &str {
        &self.0[..16.min(self.0.len())]
    }

    #[cfg(test)]
    pub(crate) fn from_hex(hex: impl Into<String>) -> Option<Self> {
        let hex = hex.into();
        let valid = hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit());
        valid.then(|| Self(hex.to_ascii_lowercase()))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the fingerprint of a descriptor
pub fn fingerprint(request: &RequestDescriptor) -> Result<Fingerprint, DownloadError> {
    let mut hasher = Sha256::new();

    match &request.resource {
        Resource::Service { endpoint, layer } => {
            let endpoint = required("endpoint", endpoint)?;
            let layer = required("layer", layer)?;
            field(&mut hasher, "service");
            field(&mut hasher, endpoint.trim_end_matches('/'));
            field(&mut hasher, layer);
        }
        Resource::Object {
            bucket,
            key,
            region,
        } => {
            let bucket = required("bucket", bucket)?;
            let key = required("key", key)?;
            field(&mut hasher, "object");
            field(&mut hasher, bucket);
            field(&mut hasher, key.trim_start_matches('/'));
            let region = region
                .as_deref()
                .map(|r| r.trim().to_ascii_lowercase())
                .unwrap_or_default();
            field(&mut hasher, &region);
        }
    }

    field(&mut hasher, request.format.mime_str());

    let params = canonical_params(&request.params)?;
    hasher.update((params.len() as u64).to_be_bytes());
    for (name, value) in &params {
        field(&mut hasher, name);
        field(&mut hasher, value);
    }

    Ok(Fingerprint(format!("{:x}", hasher.finalize())))
}

/// Hash one length-prefixed field
fn field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, DownloadError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DownloadError::InvalidRequest(format!(
            "missing required field `{field}`"
        )));
    }
    Ok(value)
}

/// Normalise parameter names and values; sorted by name
fn canonical_params(
    params: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, DownloadError> {
    let mut canonical = BTreeMap::new();
    for (name, value) in params {
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(DownloadError::InvalidRequest(
                "parameter with empty name".to_string(),
            ));
        }
        if canonical.insert(name.clone(), canonical_value(value)).is_some() {
            return Err(DownloadError::InvalidRequest(format!(
                "parameter `{name}` given more than once"
            )));
        }
    }
    Ok(canonical)
}

/// Numeric lists are re-rendered so that `10,45` and `10.0, 45.0` agree.
/// Zero-padded integers such as `007` are identifiers and stay as given.
fn canonical_value(value: &str) -> String {
    let value = value.trim();
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let numbers: Option<Vec<f64>> = parts
        .iter()
        .map(|p| if zero_padded(p) { None } else { p.parse::<f64>().ok() })
        .collect();

    match numbers {
        Some(numbers) if numbers.iter().all(|n| n.is_finite()) => numbers
            .iter()
            .map(|n| if *n == 0.0 { "0".to_string() } else { n.to_string() })
            .collect::<Vec<_>>()
            .join(","),
        _ => parts.join(","),
    }
}

fn zero_padded(number: &str) -> bool {
    let digits = number.trim_start_matches(['-', '+']).as_bytes();
    digits.len() > 1 && digits[0] == b'0' && digits[1].is_ascii_digit()
}
