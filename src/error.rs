//! Unified error handling for the armada crate
//!
//! All recoverable conditions in the orchestration core are returned as typed
//! results; only genuinely unexpected faults are logged with full context and
//! normalized at the service boundary. The [`ErrorCategory`] classification
//! drives retry decisions in the proxy path: transport-level errors are
//! retryable, everything else is terminal.

use std::io;
use thiserror::Error;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing or malformed caller input
    Validation,
    /// Unknown or disabled crawler configuration
    Configuration,
    /// Outbound request exceeded its deadline
    Timeout,
    /// Connection-level failure (refused, reset, DNS)
    Network,
    /// Crawler answered with a non-success HTTP status
    Http,
    /// Job store or cache failure
    Storage,
    /// Everything else
    Internal,
}

impl ErrorCategory {
    /// Category label used in structured responses and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Configuration => "configuration",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Http => "http",
            Self::Storage => "storage",
            Self::Internal => "unknown",
        }
    }

    /// Whether errors of this category may succeed on retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the armada crate
#[derive(Error, Debug)]
pub enum Error {
    /// Caller supplied invalid input (blank crawler id, empty request)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Crawler id is not present in the registry
    #[error("Unknown crawler: {0}")]
    UnknownCrawler(String),

    /// Crawler exists but is disabled in the registry
    #[error("Crawler is disabled: {0}")]
    CrawlerDisabled(String),

    /// Registry file could not be loaded or validated
    #[error("Registry error: {0}")]
    Registry(String),

    /// Circuit breaker denied the request
    #[error("Circuit breaker is open for crawler {0}")]
    CircuitOpen(String),

    /// Outbound call exceeded its deadline
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Connection-level failure to a crawler instance
    #[error("Network error: {0}")]
    Network(String),

    /// Crawler answered with a non-success HTTP status
    #[error("HTTP error ({status}): {message}")]
    Http { status: u16, message: String },

    /// Job store failure
    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),

    /// Shared cache failure
    #[error("Cache error: {0}")]
    Cache(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Classify this error for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::UnknownCrawler(_) | Self::CrawlerDisabled(_) | Self::Registry(_) => {
                ErrorCategory::Configuration
            }
            Self::CircuitOpen(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Network(_) => ErrorCategory::Network,
            Self::Http { .. } => ErrorCategory::Http,
            Self::Storage(_) | Self::Cache(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) | Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Check if this error is recoverable (worth retrying)
    pub fn is_recoverable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Create an internal error with context
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            Self::Network(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(anyhow::Error::new(err))
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_labels() {
        assert_eq!(ErrorCategory::Validation.as_str(), "validation");
        assert_eq!(ErrorCategory::Configuration.as_str(), "configuration");
        assert_eq!(ErrorCategory::Timeout.as_str(), "timeout");
        assert_eq!(ErrorCategory::Internal.as_str(), "unknown");
    }

    #[test]
    fn test_retryable_categories() {
        assert!(ErrorCategory::Timeout.is_retryable());
        assert!(ErrorCategory::Network.is_retryable());
        assert!(!ErrorCategory::Validation.is_retryable());
        assert!(!ErrorCategory::Http.is_retryable());
    }

    #[test]
    fn test_error_classification() {
        let err = Error::Validation("crawler id is blank".to_string());
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(!err.is_recoverable());

        let err = Error::UnknownCrawler("ghost".to_string());
        assert_eq!(err.category(), ErrorCategory::Configuration);

        let err = Error::Timeout("deadline exceeded".to_string());
        assert!(err.is_recoverable());

        let err = Error::Http {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Http);
        assert!(!err.is_recoverable());
    }
}
