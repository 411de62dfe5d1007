//! Transport error types

use thiserror::Error;

/// Errors a transport call can settle with
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The transport call panicked or was cancelled before answering
    #[error("Transport task failed: {0}")]
    TaskFailed(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport dropped the request without responding")]
    Dropped,
}

impl TransportError {
    /// HTTP status code if the server answered with an error status
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            TransportError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Check if this error is worth retrying
    ///
    /// The coordinator never retries on its own; this is for callers that do.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Status { status, .. } => matches!(*status, 408 | 429 | 500 | 502 | 503 | 504),
            TransportError::Network(_) => true,
            TransportError::Dropped => true,
            TransportError::InvalidRequest(_) => false,
            TransportError::TaskFailed(_) => false,
            TransportError::Json(_) => false,
        }
    }
}
