use thiserror::Error;

/// Errors raised while configuring the runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or incomplete configuration; the message names the field
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A required host bridge was neither injected nor available as a default
    #[error("Missing capability {capability}: {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Runtime error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
