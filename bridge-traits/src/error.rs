use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Name resolution failed: {0}")]
    DnsFailure(String),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the failure is a transient network condition worth retrying.
    ///
    /// Only timeouts, name-resolution failures, refused connections and
    /// generic I/O errors qualify. HTTP status failures, parse errors and
    /// capability problems are permanent for the purposes of retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::Timeout(_)
                | BridgeError::DnsFailure(_)
                | BridgeError::ConnectionRefused(_)
                | BridgeError::Io(_)
        )
    }

    /// Builds an error from a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        BridgeError::HttpStatus {
            status,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
