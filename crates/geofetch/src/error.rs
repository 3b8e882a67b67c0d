use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Classified failure of a single transport attempt
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Timeouts, connection resets, 5xx-like responses; worth retrying
    #[error("transient fetch failure: {0}")]
    Transient(String),
    /// 4xx-like responses and malformed requests; retrying cannot help
    #[error("permanent fetch failure: {0}")]
    Permanent(String),
    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Reason a fetched payload was rejected before caching
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("payload is empty")]
    Empty,
    #[error("payload is not valid {expected}: {detail}")]
    FormatMismatch { expected: String, detail: String },
    #[error("corrupt payload: {0}")]
    Corrupt(String),
    #[error("{algorithm} checksum mismatch (expected {expected}, got {actual})")]
    ChecksumMismatch {
        algorithm: String,
        expected: String,
        actual: String,
    },
}

/// Failure category surfaced to callers and the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidRequest,
    Transient,
    Permanent,
    ValidationFailed,
    Cancelled,
    /// Engine setup failures (configuration, cache directory, HTTP client)
    Setup,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidRequest => "invalid request",
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::ValidationFailed => "validation failed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Setup => "setup",
        };
        f.write_str(name)
    }
}

// Cloneable so a single in-flight result can be handed to every waiter.
#[derive(Debug, thiserror::Error, Clone)]
pub enum DownloadError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transient failure after {attempts} attempt(s): {cause}")]
    Transient { attempts: u32, cause: String },

    #[error("Permanent failure after {attempts} attempt(s): {cause}")]
    Permanent { attempts: u32, cause: String },

    #[error("Validation failed after {attempts} fetch attempt(s): {cause}")]
    ValidationFailed {
        attempts: u32,
        cause: ValidationError,
    },

    #[error("Download cancelled")]
    Cancelled,

    #[error("Download deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid proxy configuration: {0}")]
    ProxyError(String),

    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("I/O error: {source}")]
    IoError {
        #[from]
        source: Arc<std::io::Error>,
    },
}

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            DownloadError::Transient { .. } => ErrorKind::Transient,
            DownloadError::Permanent { .. } => ErrorKind::Permanent,
            DownloadError::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            // A deadline only aborts the waiting caller, never the shared fetch
            DownloadError::Cancelled | DownloadError::DeadlineExceeded(_) => ErrorKind::Cancelled,
            DownloadError::Config(_)
            | DownloadError::ProxyError(_)
            | DownloadError::Client(_)
            | DownloadError::IoError { .. } => ErrorKind::Setup,
        }
    }

    /// Number of fetch attempts made before giving up, when known
    pub fn attempts(&self) -> Option<u32> {
        match self {
            DownloadError::Transient { attempts, .. }
            | DownloadError::Permanent { attempts, .. }
            | DownloadError::ValidationFailed { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Build the caller-facing error from the last transport failure
    pub(crate) fn from_fetch(err: FetchError, attempts: u32) -> Self {
        match err {
            FetchError::Transient(cause) => DownloadError::Transient { attempts, cause },
            FetchError::Permanent(cause) => DownloadError::Permanent { attempts, cause },
            FetchError::Cancelled => DownloadError::Cancelled,
        }
    }
}

// Manual implementation of From<std::io::Error> for DownloadError
// because of the Arc wrapping.
impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        DownloadError::IoError {
            source: Arc::new(err),
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        DownloadError::Client(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_errors_keep_their_class() {
        let transient = DownloadError::from_fetch(FetchError::Transient("503".into()), 3);
        assert_eq!(transient.kind(), ErrorKind::Transient);
        assert_eq!(transient.attempts(), Some(3));

        let permanent = DownloadError::from_fetch(FetchError::Permanent("404".into()), 1);
        assert_eq!(permanent.kind(), ErrorKind::Permanent);

        let cancelled = DownloadError::from_fetch(FetchError::Cancelled, 2);
        assert_eq!(cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(cancelled.attempts(), None);
    }

    #[test]
    fn test_display_reports_attempts_and_cause() {
        let err = DownloadError::ValidationFailed {
            attempts: 2,
            cause: ValidationError::Empty,
        };
        assert_eq!(
            err.to_string(),
            "Validation failed after 2 fetch attempt(s): payload is empty"
        );
    }
}
