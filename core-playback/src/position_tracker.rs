//! # Track List Position Tracker
//!
//! Synchronous seek math over a list of variable-length tracks, queried by
//! session commands such as "skip back 30 seconds".
//!
//! All transitions are pure functions on [`TrackListState`]; the tracker only
//! swaps whole snapshots under its lock. This position is a second, command
//! side copy of what the media engine reports to the state controller. The
//! two are kept apart on purpose.

use crate::chapters;
use crate::error::{PlaybackError, Result};
use core_library::models::Track;
use parking_lot::Mutex;
use std::sync::Arc;

/// Immutable position snapshot over a track list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackListState {
    tracks: Arc<[Track]>,
    current_track_index: usize,
    current_track_progress_ms: u64,
}

impl Default for TrackListState {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl TrackListState {
    /// A snapshot positioned at the start of the first track.
    pub fn new(tracks: Vec<Track>) -> Self {
        Self {
            tracks: Arc::from(tracks),
            current_track_index: 0,
            current_track_progress_ms: 0,
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn current_track_index(&self) -> usize {
        self.current_track_index
    }

    pub fn current_track_progress_ms(&self) -> u64 {
        self.current_track_progress_ms
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.tracks.get(self.current_track_index)
    }

    pub fn total_duration_ms(&self) -> u64 {
        chapters::book_position_ms(&self.tracks, self.tracks.len(), 0)
    }

    /// Durations of all tracks before the current one plus the current offset.
    ///
    /// Not authoritative: track durations are reported by the server and are
    /// not verified against the media itself.
    pub fn current_book_position_ms(&self) -> u64 {
        chapters::book_position_ms(
            &self.tracks,
            self.current_track_index,
            self.current_track_progress_ms,
        )
    }

    /// Same track list at a new position.
    pub fn with_position(&self, index: usize, offset_ms: u64) -> Result<Self> {
        if index >= self.tracks.len() {
            return Err(PlaybackError::TrackIndexOutOfRange {
                index,
                len: self.tracks.len(),
            });
        }

        Ok(Self {
            tracks: self.tracks.clone(),
            current_track_index: index,
            current_track_progress_ms: offset_ms,
        })
    }

    /// Move by `delta_ms` across track boundaries.
    ///
    /// Forward moves clamp at the end of the last track; a move landing
    /// exactly on a boundary lands at the start of the later track. Backward
    /// moves clamp at the start of the first track.
    pub fn seek_by_relative(&self, delta_ms: i64) -> Self {
        if self.tracks.is_empty() || delta_ms == 0 {
            return self.clone();
        }

        let (index, offset) = if delta_ms > 0 {
            self.walk_forward(delta_ms.unsigned_abs())
        } else {
            self.walk_backward(delta_ms.unsigned_abs())
        };

        Self {
            tracks: self.tracks.clone(),
            current_track_index: index,
            current_track_progress_ms: offset,
        }
    }

    /// Position on the most recently viewed track, at its recorded progress.
    ///
    /// Ties go to the earlier track; a list nobody has listened to yet
    /// starts at the first track.
    pub fn seek_to_active_track(&self) -> Self {
        let active = self
            .tracks
            .iter()
            .enumerate()
            .fold(None::<(usize, &Track)>, |best, (index, track)| match best {
                Some((_, current)) if current.last_viewed_at >= track.last_viewed_at => best,
                _ => Some((index, track)),
            });

        match active {
            Some((index, track)) => Self {
                tracks: self.tracks.clone(),
                current_track_index: index,
                current_track_progress_ms: track.progress_ms,
            },
            None => self.clone(),
        }
    }

    fn walk_forward(&self, delta_ms: u64) -> (usize, u64) {
        let last = self.tracks.len() - 1;
        let mut index = self.current_track_index.min(last);
        let mut offset = self.current_track_progress_ms;
        let mut remaining = delta_ms;

        loop {
            let duration = self.tracks[index].duration_ms;
            let room = duration.saturating_sub(offset);

            if remaining < room {
                return (index, offset + remaining);
            }
            if index == last {
                return (index, duration);
            }

            remaining -= room;
            index += 1;
            offset = 0;
        }
    }

    fn walk_backward(&self, delta_ms: u64) -> (usize, u64) {
        let last = self.tracks.len() - 1;
        let mut index = self.current_track_index.min(last);
        let mut offset = self.current_track_progress_ms;
        let mut remaining = delta_ms;

        loop {
            if remaining <= offset {
                return (index, offset - remaining);
            }
            if index == 0 {
                return (0, 0);
            }

            remaining -= offset;
            index -= 1;
            offset = self.tracks[index].duration_ms;
        }
    }
}

/// Thread-safe holder of the command-side position.
#[derive(Debug, Default)]
pub struct TrackListPositionTracker {
    state: Mutex<Arc<TrackListState>>,
}

impl TrackListPositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the track list and reset to its start.
    pub fn set_track_list(&self, tracks: Vec<Track>) -> Arc<TrackListState> {
        let next = Arc::new(TrackListState::new(tracks));
        *self.state.lock() = next.clone();
        next
    }

    /// Record an engine-reported position.
    pub fn update_position(&self, index: usize, offset_ms: u64) -> Result<Arc<TrackListState>> {
        self.swap(|state| state.with_position(index, offset_ms))
    }

    pub fn seek_by_relative(&self, delta_ms: i64) -> Arc<TrackListState> {
        let mut guard = self.state.lock();
        let next = Arc::new(guard.seek_by_relative(delta_ms));
        *guard = next.clone();
        next
    }

    pub fn seek_to_active_track(&self) -> Arc<TrackListState> {
        let mut guard = self.state.lock();
        let next = Arc::new(guard.seek_to_active_track());
        *guard = next.clone();
        next
    }

    pub fn snapshot(&self) -> Arc<TrackListState> {
        self.state.lock().clone()
    }

    /// See [`TrackListState::current_book_position_ms`]; approximate only.
    pub fn current_book_position_ms(&self) -> u64 {
        self.state.lock().current_book_position_ms()
    }

    fn swap<F>(&self, transition: F) -> Result<Arc<TrackListState>>
    where
        F: FnOnce(&TrackListState) -> Result<TrackListState>,
    {
        let mut guard = self.state.lock();
        let next = Arc::new(transition(&guard)?);
        *guard = next.clone();
        Ok(next)
    }
}
