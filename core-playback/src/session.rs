//! Session commands tying the media engine to the playback owners.
//!
//! The controller and the tracker each keep their own copy of the position.
//! Engine ticks go to both; relative skips are computed by the tracker and
//! turned into an absolute engine seek.

use crate::error::Result;
use crate::position_tracker::{TrackListPositionTracker, TrackListState};
use crate::state_controller::PlaybackStateController;
use bridge_traits::{EnginePosition, MediaEngine};
use core_library::models::{Audiobook, Chapter, Track};
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct PlaybackSession {
    controller: Arc<PlaybackStateController>,
    tracker: Arc<TrackListPositionTracker>,
    engine: Arc<dyn MediaEngine>,
}

impl PlaybackSession {
    pub fn new(
        controller: Arc<PlaybackStateController>,
        tracker: Arc<TrackListPositionTracker>,
        engine: Arc<dyn MediaEngine>,
    ) -> Self {
        Self {
            controller,
            tracker,
            engine,
        }
    }

    pub fn controller(&self) -> &Arc<PlaybackStateController> {
        &self.controller
    }

    pub fn tracker(&self) -> &Arc<TrackListPositionTracker> {
        &self.tracker
    }

    /// Load an audiobook at an explicit position and cue the engine there.
    pub async fn load(
        &self,
        audiobook: Audiobook,
        tracks: Vec<Track>,
        chapters: Vec<Chapter>,
        start_track_index: usize,
        start_position_ms: u64,
    ) -> Result<()> {
        self.controller
            .load_audiobook(
                audiobook,
                tracks.clone(),
                chapters,
                start_track_index,
                start_position_ms,
            )
            .await?;
        self.cue(tracks).await
    }

    /// Load an audiobook at its stored position and cue the engine there.
    pub async fn resume(
        &self,
        audiobook: Audiobook,
        tracks: Vec<Track>,
        chapters: Vec<Chapter>,
    ) -> Result<()> {
        self.controller
            .resume_audiobook(audiobook, tracks.clone(), chapters)
            .await?;
        self.cue(tracks).await
    }

    /// Engine tick: `(track_index, position_ms)` goes to both owners.
    pub async fn on_engine_position(&self, track_index: usize, position_ms: u64) -> Result<()> {
        self.controller
            .update_position(track_index, position_ms)
            .await?;
        if self.controller.current_state().is_loaded() {
            self.tracker.update_position(track_index, position_ms)?;
        }
        Ok(())
    }

    /// Poll the engine for its position and forward it.
    pub async fn sync_from_engine(&self) -> Result<EnginePosition> {
        let position = self.engine.position().await?;
        self.on_engine_position(position.track_index, position.offset_ms)
            .await?;
        Ok(position)
    }

    /// Skip forward (positive) or back (negative) across track boundaries.
    #[instrument(skip(self))]
    pub async fn skip_by(&self, delta_ms: i64) -> Result<Arc<TrackListState>> {
        let target = self.tracker.seek_by_relative(delta_ms);
        if target.tracks().is_empty() {
            return Ok(target);
        }

        let index = target.current_track_index();
        let offset = target.current_track_progress_ms();
        debug!(index, offset, "Seeking engine");
        self.engine.seek_to(index, offset).await?;
        self.controller.update_position(index, offset).await?;
        Ok(target)
    }

    pub async fn play(&self) -> Result<()> {
        self.engine.play().await?;
        self.controller.update_playing_state(true).await;
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        self.engine.pause().await?;
        self.controller.update_playing_state(false).await;
        Ok(())
    }

    /// Pause the engine and unload, saving the final position.
    pub async fn stop(&self) -> Result<()> {
        self.engine.pause().await?;
        self.controller.clear().await;
        self.tracker.set_track_list(Vec::new());
        Ok(())
    }

    async fn cue(&self, tracks: Vec<Track>) -> Result<()> {
        let state = self.controller.current_state();
        let index = state.current_track_index();
        let offset = state.position_ms();

        self.tracker.set_track_list(tracks);
        self.tracker.update_position(index, offset)?;
        self.engine.seek_to(index, offset).await?;
        Ok(())
    }
}
