//! Error types for the MIUI search SDK
//!
//! Every failure that ends an assistant query surfaces as an [`SdkError`].
//! Malformed individual stream records are *not* errors: the parser skips
//! them and keeps reading.

use thiserror::Error;

/// Main error type for the MIUI search SDK
#[derive(Error, Debug)]
pub enum SdkError {
    /// The HTTP request could not be sent or the connection failed
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Upstream answered with a non-success status code
    #[error("Upstream returned HTTP {status}")]
    UpstreamStatus {
        /// Status code returned by the upstream
        status: u16,
    },

    /// Upstream answered with something other than an event stream
    #[error("Unexpected content type from upstream: {0}")]
    UnexpectedContentType(String),

    /// The event stream broke before it was complete
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// History blob could not be compressed or decompressed
    #[error("History codec error: {0}")]
    HistoryCodec(#[from] std::io::Error),

    /// Invalid client configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for SDK operations
pub type Result<T> = std::result::Result<T, SdkError>;

impl SdkError {
    /// Create a new StreamInterrupted error
    pub fn interrupted(reason: impl Into<String>) -> Self {
        Self::StreamInterrupted(reason.into())
    }

    /// Whether the failure happened before any answer could be produced
    pub fn is_connect_failure(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_connect() || e.is_timeout(),
            Self::UpstreamStatus { .. } | Self::UnexpectedContentType(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_display() {
        let err = SdkError::UpstreamStatus { status: 503 };
        assert_eq!(err.to_string(), "Upstream returned HTTP 503");
        assert!(err.is_connect_failure());
    }

    #[test]
    fn test_interrupted_is_not_connect_failure() {
        let err = SdkError::interrupted("connection reset");
        assert!(err.to_string().contains("connection reset"));
        assert!(!err.is_connect_failure());
    }
}
