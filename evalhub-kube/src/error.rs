//! Error types for the cluster client

use thiserror::Error;

/// Result type alias for cluster operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur when talking to the cluster API
#[derive(Debug, Error)]
pub enum KubeError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("cluster API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Request was rejected before it was sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// In-cluster configuration could not be loaded
    #[error("cluster configuration error: {0}")]
    Config(String),
}

impl KubeError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// The resource does not exist (404)
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ApiError { status: 404, .. })
    }

    /// The resource already exists (409)
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::ApiError { status: 409, .. })
    }
}
