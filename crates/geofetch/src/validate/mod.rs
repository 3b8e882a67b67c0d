//! # Payload Validation
//!
//! Fetched payloads pass through a [`Validator`] before they are accepted into
//! the cache. Validators are plain synchronous strategies; several of them can
//! be combined with a [`ValidatorChain`].

mod checksum;
mod format;
mod safe;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::format::MimeType;
use crate::request::RequestDescriptor;
use crate::DownloadError;

pub use checksum::ChecksumValidator;
pub use format::{FormatValidator, jp2_bit_depth};
pub use safe::SafeArchiveValidator;

/// Digest algorithms accepted for a-priori checksums
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha256,
    Md5,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Md5 => "md5",
        }
    }

    fn hex_len(&self) -> usize {
        match self {
            ChecksumAlgorithm::Sha256 => 64,
            ChecksumAlgorithm::Md5 => 32,
        }
    }
}

/// Expected digest of a payload, lower-case hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    pub hex: String,
}

impl Checksum {
    pub fn new(algorithm: ChecksumAlgorithm, hex: impl AsRef<str>) -> Self {
        Self {
            algorithm,
            hex: hex.as_ref().trim().to_ascii_lowercase(),
        }
    }

    pub fn sha256(hex: impl AsRef<str>) -> Self {
        Self::new(ChecksumAlgorithm::Sha256, hex)
    }

    pub fn md5(hex: impl AsRef<str>) -> Self {
        Self::new(ChecksumAlgorithm::Md5, hex)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.hex)
    }
}

impl FromStr for Checksum {
    type Err = DownloadError;

    /// `sha256:<hex>` or `md5:<hex>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DownloadError::InvalidRequest(format!("invalid checksum: {s}"));
        let (algorithm, hex) = s.split_once(':').ok_or_else(invalid)?;
        let algorithm = match algorithm.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => ChecksumAlgorithm::Sha256,
            "md5" => ChecksumAlgorithm::Md5,
            _ => return Err(invalid()),
        };
        let checksum = Checksum::new(algorithm, hex);
        if checksum.hex.len() != algorithm.hex_len()
            || !checksum.hex.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(invalid());
        }
        Ok(checksum)
    }
}

/// What a payload is expected to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationTarget {
    pub format: MimeType,
    pub checksum: Option<Checksum>,
}

impl ValidationTarget {
    pub fn new(format: MimeType) -> Self {
        Self {
            format,
            checksum: None,
        }
    }

    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }
}

impl From<&RequestDescriptor> for ValidationTarget {
    fn from(request: &RequestDescriptor) -> Self {
        Self {
            format: request.format,
            checksum: request.checksum.clone(),
        }
    }
}

/// A payload acceptance rule
pub trait Validator: Send + Sync {
    fn validate(&self, bytes: &[u8], target: &ValidationTarget) -> Result<(), ValidationError>;
}

/// Runs validators in order, stopping at the first rejection
#[derive(Clone)]
pub struct ValidatorChain {
    validators: Vec<Arc<dyn Validator>>,
}

impl ValidatorChain {
    pub fn empty() -> Self {
        Self {
            validators: Vec::new(),
        }
    }

    pub fn with(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }
}

impl Default for ValidatorChain {
    /// Structure, a-priori digest, then SAFE archive contents
    fn default() -> Self {
        Self::empty()
            .with(FormatValidator)
            .with(ChecksumValidator)
            .with(SafeArchiveValidator::default())
    }
}

impl fmt::Debug for ValidatorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorChain")
            .field("validators", &self.validators.len())
            .finish()
    }
}

impl Validator for ValidatorChain {
    fn validate(&self, bytes: &[u8], target: &ValidationTarget) -> Result<(), ValidationError> {
        self.validators
            .iter()
            .try_for_each(|validator| validator.validate(bytes, target))
    }
}
