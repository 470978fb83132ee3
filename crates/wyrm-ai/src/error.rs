//! Error types for wyrm-ai

use thiserror::Error;

/// Result type alias using wyrm-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to an inference server
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O failure (downloads, installer handling)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Server returned a non-success status
    #[error("server error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// Unexpected response shape
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// A model pull reported a failure record
    #[error("model pull failed: {0}")]
    PullFailed(String),

    /// Installer path failed validation
    #[error("access denied: {0}")]
    AccessDenied(String),
}

impl Error {
    /// Create an API error from a status code and message body
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::Sse(_) => true,
            Error::Api { status, .. } => {
                matches!(status, 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_server_statuses() {
        assert!(Error::api(429, "slow down").is_retryable());
        assert!(Error::api(503, "unavailable").is_retryable());
        assert!(Error::Sse("connection reset".into()).is_retryable());
    }

    #[test]
    fn test_not_retryable() {
        assert!(!Error::api(400, "bad request").is_retryable());
        assert!(!Error::api(404, "no such model").is_retryable());
        assert!(!Error::AccessDenied("outside staging dir".into()).is_retryable());
        assert!(!Error::PullFailed("manifest unknown".into()).is_retryable());
    }
}
