//! # Playback Error Types
//!
//! Error types for connection selection, stream URL resolution and playback
//! state management.

use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur in the playback core.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Position Errors
    // ========================================================================
    /// Track index does not address a track of the loaded list.
    #[error("Track index {index} out of range (track count {len})")]
    TrackIndexOutOfRange { index: usize, len: usize },

    /// Playback speed must be a finite value greater than zero.
    #[error("Invalid playback speed: {0}")]
    InvalidSpeed(f32),

    // ========================================================================
    // Stream Errors
    // ========================================================================
    /// The server refused to produce a playable URL for this media part.
    #[error("Media is not playable: {path}")]
    NotPlayable { path: String },

    /// No server URL has been selected yet.
    #[error("No active server connection")]
    NoActiveServer,

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// The candidate set is empty.
    #[error("No server connection candidates")]
    NoConnectionCandidates,

    /// Every candidate failed its health check.
    #[error("No viable server connection{}", reason_suffix(.last_reason))]
    NoViableConnection { last_reason: Option<String> },

    /// The race did not produce a winner in time.
    #[error("Timed out selecting a server connection{}", reason_suffix(.last_reason))]
    ConnectionTimeout { last_reason: Option<String> },

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// Failure reported by a host bridge.
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(": {}", reason),
        None => String::new(),
    }
}

impl PlaybackError {
    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            PlaybackError::Bridge(err) => err.is_transient(),
            PlaybackError::NoViableConnection { .. } | PlaybackError::ConnectionTimeout { .. } => {
                true
            }
            _ => false,
        }
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
