//! Error types for the media server provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Media server provider errors
#[derive(Error, Debug)]
pub enum MediaServerError {
    /// Server answered with a non-success status
    #[error("Media server error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Failed to parse a server response
    #[error("Failed to parse media server response: {0}")]
    ParseError(String),

    /// A candidate answered, but it is a different server
    #[error("Unexpected server identity: expected {expected}, got {actual}")]
    IdentityMismatch { expected: String, actual: String },

    /// Bridge error
    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for media server operations
pub type Result<T> = std::result::Result<T, MediaServerError>;

impl From<MediaServerError> for BridgeError {
    fn from(error: MediaServerError) -> Self {
        match error {
            MediaServerError::ApiError {
                status_code,
                message,
            } => BridgeError::from_status(status_code, message),
            MediaServerError::ParseError(msg) => BridgeError::InvalidResponse(msg),
            e @ MediaServerError::IdentityMismatch { .. } => {
                BridgeError::OperationFailed(e.to_string())
            }
            MediaServerError::BridgeError(e) => e,
        }
    }
}
