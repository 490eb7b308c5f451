//! Error types for the sync client.

use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while talking to the budget server.
#[derive(Debug, Error)]
pub enum SyncError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-success response from the server
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The server rejected the session key (401)
    #[error("Session expired")]
    AuthExpired,

    /// The server answered with something other than JSON
    #[error("Unexpected content type: {0}")]
    UnexpectedContentType(String),

    /// The duplex channel could not be opened or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// The configured server URL cannot be used
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Invalid request (missing required data, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Domain error from the core crate
    #[error(transparent)]
    Core(#[from] relief_budget_core::Error),
}

impl SyncError {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::InvalidUrl(message.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Whether the failure is a transport problem rather than a rejection.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Http(_)
            | SyncError::UnexpectedContentType(_)
            | SyncError::Connection(_)
            | SyncError::WebSocket(_) => true,
            SyncError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SyncError::connection("refused").is_transient());
        assert!(SyncError::api(503, "unavailable").is_transient());
        assert!(!SyncError::api(422, "bad amount").is_transient());
        assert!(!SyncError::AuthExpired.is_transient());
    }

    #[test]
    fn test_url_parse_error_converts() {
        let err: SyncError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, SyncError::InvalidUrl(_)));
    }
}
