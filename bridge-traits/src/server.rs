//! Remote Media Server Abstraction
//!
//! The playback core talks to the user's media server through two calls:
//! a cheap reachability probe used while selecting a connection, and a
//! playback negotiation that turns a media path into a streamable URL.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Bitrate limits advertised to the server during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitrateHints {
    /// Preferred bitrate in kbps.
    pub preferred_kbps: u32,
    /// Upper bound the client can sustain, in kbps.
    pub max_kbps: u32,
}

impl Default for BitrateHints {
    fn default() -> Self {
        Self {
            preferred_kbps: 128,
            max_kbps: 320,
        }
    }
}

/// Input to [`MediaServer::negotiate_playback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationRequest {
    /// Base URL of the currently active server connection.
    pub server_url: String,
    /// Server-side media path of the part to play.
    pub path: String,
    /// Streaming protocol requested, e.g. `http`.
    pub protocol: String,
    pub bitrate_hints: BitrateHints,
}

/// Result of a playback negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackDecision {
    /// Whether the server can deliver the media in any playable form.
    pub playable: bool,
    /// Stream URL; may be absolute or relative to the server URL.
    pub url: Option<String>,
}

/// Remote media server trait
///
/// Implementations perform exactly one network round trip per call and map
/// transport failures onto the transient [`BridgeError`](crate::BridgeError)
/// variants so callers can decide whether to retry.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::server::{MediaServer, NegotiationRequest};
///
/// async fn stream_url(server: &dyn MediaServer, req: NegotiationRequest) -> Option<String> {
///     let decision = server.negotiate_playback(&req).await.ok()?;
///     decision.playable.then_some(decision.url).flatten()
/// }
/// ```
#[async_trait]
pub trait MediaServer: Send + Sync {
    /// Probe a candidate base URI. `Ok(())` means the server answered and
    /// identified itself.
    async fn check_server(&self, uri: &str) -> Result<()>;

    /// Ask the server how to play a media path.
    async fn negotiate_playback(&self, request: &NegotiationRequest) -> Result<PlaybackDecision>;
}
