//! Error types for callguard.
//!
//! Every user-visible failure is either a value (possibly a fallback) or one
//! of the variants of [`CallGuardError`]. Transport failures never escape as
//! raw errors: the retry executor converts them into a later success, a
//! fallback, or [`CallGuardError::ExhaustedRetries`].

use std::time::Duration;
use thiserror::Error;

/// The main error type for callguard operations.
#[derive(Error, Debug)]
pub enum CallGuardError {
    /// Admission denied by the rate limiter.
    #[error("Rate limit exceeded: {limit} requests per {window:?}")]
    RateLimitExceeded {
        /// Configured admissions per window.
        limit: u32,
        /// Window length.
        window: Duration,
        /// Time until the oldest admission leaves the window, when known.
        retry_after: Option<Duration>,
    },

    /// Cache read/write or persistence failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Transport failure that was surfaced without going through retries.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// All attempts failed and no fallback is configured.
    #[error("Exhausted {attempts} attempts: {last_error}")]
    ExhaustedRetries {
        /// Number of attempts made.
        attempts: u32,
        /// Display form of the last failure.
        last_error: String,
    },

    /// The request-level deadline elapsed.
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    /// The call was cancelled between attempts or waits.
    #[error("Call cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CallGuardError {
    /// Create a rate limit error.
    pub fn rate_limited(limit: u32, window: Duration, retry_after: Option<Duration>) -> Self {
        Self::RateLimitExceeded {
            limit,
            window,
            retry_after,
        }
    }

    /// Create an exhausted retries error.
    pub fn exhausted(attempts: u32, last_error: impl Into<String>) -> Self {
        Self::ExhaustedRetries {
            attempts,
            last_error: last_error.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if this is a rate limit denial.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }
}

/// Result type alias using CallGuardError.
pub type Result<T> = std::result::Result<T, CallGuardError>;

/// Cache and persistence storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression or decompression failed.
    #[error("Compression error: {0}")]
    Compression(String),

    /// Backend-specific failure (connection, protocol).
    #[error("Backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Create a backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a compression error.
    pub fn compression(msg: impl Into<String>) -> Self {
        Self::Compression(msg.into())
    }
}

/// Errors produced by a transport performing one HTTP exchange.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP error with status code.
    #[error("HTTP error {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
        /// Retry-After header value.
        retry_after: Option<Duration>,
    },

    /// Timeout.
    #[error("Timeout")]
    Timeout,

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Other error.
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl TransportError {
    /// Create an HTTP error.
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Get the suggested retry-after duration.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether the failure is transient (429, 5xx, timeouts, connection).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || (500..=599).contains(status),
            Self::Timeout => true,
            Self::Connection(_) => true,
            Self::Other(_) => false,
        }
    }

    /// Get the HTTP status if this is an HTTP error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_transport_errors() {
        assert!(TransportError::Timeout.is_retryable());
        assert!(TransportError::connection("refused").is_retryable());
        assert!(TransportError::http(503, "unavailable").is_retryable());
        assert!(TransportError::http(429, "slow down").is_retryable());
        assert!(!TransportError::http(404, "missing").is_retryable());
    }

    #[test]
    fn test_transport_status() {
        assert_eq!(TransportError::http(502, "").status(), Some(502));
        assert_eq!(TransportError::Timeout.status(), None);
    }

    #[test]
    fn test_error_display() {
        let err = CallGuardError::exhausted(3, "HTTP error 500: boom");
        assert_eq!(err.to_string(), "Exhausted 3 attempts: HTTP error 500: boom");

        let err = CallGuardError::rate_limited(2, Duration::from_secs(1), None);
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_storage_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: CallGuardError = StorageError::from(io).into();
        assert!(matches!(err, CallGuardError::Storage(StorageError::Io(_))));
    }
}
