//! Media server response types

use serde::{Deserialize, Serialize};

/// Response of `GET /identity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityResponse {
    /// Stable identifier of the server installation
    pub machine_identifier: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// How the server intends to deliver a media part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryDecision {
    DirectPlay,
    Copy,
    Transcode,
    Unavailable,
}

/// Response of the playback decision endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResponse {
    pub decision: DeliveryDecision,

    /// Stream URL, absolute or relative to the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Human-readable explanation, mostly for unavailable media
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DecisionResponse {
    pub fn is_playable(&self) -> bool {
        self.decision != DeliveryDecision::Unavailable
    }
}
