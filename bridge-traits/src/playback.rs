//! Media engine bridge.
//!
//! The host's audio engine exposes a multi-track timeline addressed by
//! `(track index, offset)` pairs. The core never decodes audio; it only
//! issues seeks and transport commands and receives position ticks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Position reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnginePosition {
    pub track_index: usize,
    pub offset_ms: u64,
}

/// Trait for platform media engines (ExoPlayer, AVPlayer, GStreamer, ...).
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Seek to `offset_ms` within the track at `track_index`.
    async fn seek_to(&self, track_index: usize, offset_ms: u64) -> Result<()>;

    /// Begin or resume playback.
    async fn play(&self) -> Result<()>;

    /// Pause playback without releasing the loaded media.
    async fn pause(&self) -> Result<()>;

    /// Query the current engine position.
    async fn position(&self) -> Result<EnginePosition>;
}
