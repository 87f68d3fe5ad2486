//! # Playback State Controller
//!
//! Single source of truth for what is playing: the loaded audiobook, its
//! tracks and chapters, the current position, the playing flag and speed.
//!
//! Every transition replaces the state with a new immutable
//! [`PlaybackState`] and publishes it on a `watch` channel. Transitions are
//! serialized by an async mutex, so readers always observe the most recently
//! completed one.
//!
//! ## Progress persistence
//!
//! Position updates schedule a debounced write of the book position. A new
//! update cancels the pending write and starts the quiet period over, so a
//! burst of updates produces one write carrying the last position. Debounced
//! writes that would move the stored position by less than
//! [`PersistenceConfig::min_persist_delta`] are skipped.
//!
//! Loading, pausing and clearing force an immediate write. Writes are ordered
//! by a generation number taken while the transition holds the state lock; a
//! write whose generation is older than the last committed one is dropped.
//! Persistence failures are logged and never surface to callers.

use crate::chapters::{book_position_ms, chapter_at, locate_book_position};
use crate::config::PersistenceConfig;
use crate::error::{PlaybackError, Result};
use crate::position_tracker::TrackListState;
use bridge_traits::{Clock, ProgressStore, SettingsStore};
use core_async::sync::{watch, CancellationToken, Mutex};
use core_async::time::sleep;
use core_library::models::{Audiobook, AudiobookId, Chapter, Track};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const DEFAULT_SPEED: f32 = 1.0;

/// Immutable snapshot of playback.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    audiobook: Option<Arc<Audiobook>>,
    tracks: Arc<[Track]>,
    chapters: Arc<[Chapter]>,
    current_track_index: usize,
    position_ms: u64,
    is_playing: bool,
    speed: f32,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            audiobook: None,
            tracks: Arc::from(Vec::new()),
            chapters: Arc::from(Vec::new()),
            current_track_index: 0,
            position_ms: 0,
            is_playing: false,
            speed: DEFAULT_SPEED,
        }
    }
}

impl PlaybackState {
    pub fn audiobook(&self) -> Option<&Audiobook> {
        self.audiobook.as_deref()
    }

    pub fn audiobook_id(&self) -> Option<AudiobookId> {
        self.audiobook.as_ref().map(|book| book.id)
    }

    pub fn is_loaded(&self) -> bool {
        self.audiobook.is_some()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn current_track_index(&self) -> usize {
        self.current_track_index
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.tracks.get(self.current_track_index)
    }

    /// Offset within the current track, milliseconds.
    pub fn position_ms(&self) -> u64 {
        self.position_ms
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Position on the whole-book timeline, milliseconds.
    pub fn book_position_ms(&self) -> u64 {
        book_position_ms(&self.tracks, self.current_track_index, self.position_ms)
    }

    pub fn current_chapter(&self) -> Option<&Chapter> {
        chapter_at(&self.chapters, self.book_position_ms()).map(|(_, chapter)| chapter)
    }

    pub fn current_chapter_index(&self) -> Option<usize> {
        chapter_at(&self.chapters, self.book_position_ms()).map(|(index, _)| index)
    }

    fn with_position(&self, track_index: usize, position_ms: u64) -> Self {
        Self {
            current_track_index: track_index,
            position_ms,
            ..self.clone()
        }
    }
}

/// A change of the chapter under the playhead.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterChange {
    pub audiobook_id: Option<AudiobookId>,
    pub previous: Option<Chapter>,
    pub current: Option<Chapter>,
    /// Index of `current` within the audiobook's chapter list
    pub index: Option<usize>,
}

/// Observer for chapter changes.
///
/// Called synchronously while the controller holds its state lock. Must not
/// block and must not call back into the controller.
pub trait ChapterChangeListener: Send + Sync {
    fn on_chapter_changed(&self, change: &ChapterChange);
}

#[derive(Debug, Clone, Copy)]
struct PersistedPosition {
    audiobook_id: AudiobookId,
    position_ms: u64,
}

#[derive(Debug, Default)]
struct Ledger {
    committed_generation: u64,
    last: Option<PersistedPosition>,
}

/// Serialized writer for listening progress.
struct ProgressWriter {
    store: Arc<dyn ProgressStore>,
    clock: Arc<dyn Clock>,
    min_delta_ms: u64,
    generation: AtomicU64,
    ledger: Mutex<Ledger>,
    event_bus: Option<Arc<EventBus>>,
}

impl ProgressWriter {
    fn new(
        store: Arc<dyn ProgressStore>,
        clock: Arc<dyn Clock>,
        min_delta_ms: u64,
        event_bus: Option<Arc<EventBus>>,
    ) -> Self {
        Self {
            store,
            clock,
            min_delta_ms,
            generation: AtomicU64::new(0),
            ledger: Mutex::new(Ledger::default()),
            event_bus,
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn write(
        &self,
        generation: u64,
        audiobook_id: AudiobookId,
        position_ms: u64,
        forced: bool,
    ) {
        let mut ledger = self.ledger.lock().await;

        if generation <= ledger.committed_generation {
            debug!(generation, "Progress write superseded by a later write");
            return;
        }

        if !forced {
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!(generation, "Debounced progress write superseded");
                return;
            }
            if let Some(last) = ledger.last {
                if last.audiobook_id == audiobook_id
                    && last.position_ms.abs_diff(position_ms) < self.min_delta_ms
                {
                    debug!(
                        audiobook_id = audiobook_id.0,
                        position_ms, "Position barely moved, skipping write"
                    );
                    return;
                }
            }
        }

        let timestamp_ms = self.clock.unix_timestamp_millis();
        match self
            .store
            .update_progress(audiobook_id.0, timestamp_ms, position_ms)
            .await
        {
            Ok(()) => {
                ledger.committed_generation = generation;
                ledger.last = Some(PersistedPosition {
                    audiobook_id,
                    position_ms,
                });
                debug!(
                    audiobook_id = audiobook_id.0,
                    position_ms, forced, "Listening progress saved"
                );
                self.emit(PlaybackEvent::ProgressPersisted {
                    audiobook_id: audiobook_id.0,
                    position_ms,
                    forced,
                });
            }
            Err(e) => {
                warn!(
                    audiobook_id = audiobook_id.0,
                    position_ms,
                    error = %e,
                    "Failed to save listening progress"
                );
                self.emit(PlaybackEvent::PersistFailed {
                    audiobook_id: audiobook_id.0,
                    message: e.to_string(),
                });
            }
        }
    }

    fn emit(&self, event: PlaybackEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Playback(event));
        }
    }
}

/// A write requested by a transition, executed after the state lock is released.
struct ForcedWrite {
    generation: u64,
    audiobook_id: AudiobookId,
    position_ms: u64,
}

/// Owns [`PlaybackState`] and its persistence.
pub struct PlaybackStateController {
    state: Mutex<Arc<PlaybackState>>,
    state_tx: watch::Sender<Arc<PlaybackState>>,
    listeners: parking_lot::Mutex<Vec<Arc<dyn ChapterChangeListener>>>,
    pending_write: parking_lot::Mutex<Option<CancellationToken>>,
    writer: Arc<ProgressWriter>,
    settings: Arc<dyn SettingsStore>,
    config: PersistenceConfig,
    event_bus: Option<Arc<EventBus>>,
}

impl PlaybackStateController {
    pub fn new(
        progress_store: Arc<dyn ProgressStore>,
        settings: Arc<dyn SettingsStore>,
        clock: Arc<dyn Clock>,
        config: PersistenceConfig,
    ) -> Self {
        let initial = Arc::new(PlaybackState::default());
        let (state_tx, _) = watch::channel(initial.clone());
        let writer = ProgressWriter::new(progress_store, clock, config.min_persist_delta_ms(), None);

        Self {
            state: Mutex::new(initial),
            state_tx,
            listeners: parking_lot::Mutex::new(Vec::new()),
            pending_write: parking_lot::Mutex::new(None),
            writer: Arc::new(writer),
            settings,
            config,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.writer = Arc::new(ProgressWriter::new(
            self.writer.store.clone(),
            self.writer.clock.clone(),
            self.writer.min_delta_ms,
            Some(event_bus.clone()),
        ));
        self.event_bus = Some(event_bus);
        self
    }

    pub fn add_chapter_change_listener(&self, listener: Arc<dyn ChapterChangeListener>) {
        self.listeners.lock().push(listener);
    }

    /// Latest published state.
    pub fn current_state(&self) -> Arc<PlaybackState> {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<PlaybackState>> {
        self.state_tx.subscribe()
    }

    /// Load an audiobook at an explicit position and persist that position.
    ///
    /// Empty `chapters` falls back to the audiobook's own chapters, then to
    /// one synthetic chapter per track.
    #[instrument(skip(self, audiobook, tracks, chapters), fields(audiobook_id = audiobook.id.0))]
    pub async fn load_audiobook(
        &self,
        audiobook: Audiobook,
        tracks: Vec<Track>,
        chapters: Vec<Chapter>,
        start_track_index: usize,
        start_position_ms: u64,
    ) -> Result<()> {
        if start_track_index >= tracks.len() {
            return Err(PlaybackError::TrackIndexOutOfRange {
                index: start_track_index,
                len: tracks.len(),
            });
        }

        let chapters = if chapters.is_empty() {
            audiobook.effective_chapters(&tracks)
        } else {
            chapters
        };

        let mut state = self.state.lock().await;
        self.cancel_pending_write();

        let next = Arc::new(PlaybackState {
            audiobook: Some(Arc::new(audiobook)),
            tracks: Arc::from(tracks),
            chapters: Arc::from(chapters),
            current_track_index: start_track_index,
            position_ms: start_position_ms,
            is_playing: false,
            speed: state.speed,
        });
        let write = self.forced_write(&next);
        self.commit(&mut state, next.clone());
        drop(state);

        info!(
            track_count = next.tracks().len(),
            chapter_count = next.chapters().len(),
            track_index = start_track_index,
            position_ms = start_position_ms,
            "Audiobook loaded"
        );
        if let Some(id) = next.audiobook_id() {
            self.emit(PlaybackEvent::AudiobookLoaded {
                audiobook_id: id.0,
                track_count: next.tracks().len(),
                chapter_count: next.chapters().len(),
            });
        }

        self.run_forced(write).await;
        Ok(())
    }

    /// Load an audiobook at its last persisted position.
    ///
    /// Without stored progress, starts at the most recently viewed track.
    pub async fn resume_audiobook(
        &self,
        audiobook: Audiobook,
        tracks: Vec<Track>,
        chapters: Vec<Chapter>,
    ) -> Result<()> {
        let stored = match self.writer.store.read_last_position(audiobook.id.0).await {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    audiobook_id = audiobook.id.0,
                    error = %e,
                    "Failed to read stored progress, starting from track history"
                );
                None
            }
        };

        let (index, offset) = match stored {
            Some(record) => locate_book_position(&tracks, record.position_ms),
            None => {
                let active = TrackListState::new(tracks.clone()).seek_to_active_track();
                (active.current_track_index(), active.current_track_progress_ms())
            }
        };

        self.load_audiobook(audiobook, tracks, chapters, index, offset)
            .await
    }

    /// Record the engine-reported position.
    ///
    /// A no-op when nothing is loaded. Schedules a debounced progress write.
    pub async fn update_position(&self, track_index: usize, position_ms: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.is_loaded() {
            return Ok(());
        }
        if track_index >= state.tracks.len() {
            return Err(PlaybackError::TrackIndexOutOfRange {
                index: track_index,
                len: state.tracks.len(),
            });
        }

        let next = Arc::new(state.with_position(track_index, position_ms));
        self.schedule_write(&next);
        self.commit(&mut state, next);
        Ok(())
    }

    /// Set the playing flag. Pausing forces a progress write.
    pub async fn update_playing_state(&self, is_playing: bool) {
        let mut state = self.state.lock().await;
        let Some(id) = state.audiobook_id() else {
            return;
        };
        if state.is_playing == is_playing {
            return;
        }

        let next = Arc::new(PlaybackState {
            is_playing,
            ..PlaybackState::clone(&state)
        });
        let write = if is_playing {
            None
        } else {
            self.cancel_pending_write();
            self.forced_write(&next)
        };
        let position_ms = next.book_position_ms();
        self.commit(&mut state, next);
        drop(state);

        self.emit(PlaybackEvent::PlayingChanged {
            audiobook_id: id.0,
            is_playing,
            position_ms,
        });
        self.run_forced(write).await;
    }

    /// Change the playback speed and remember it as a preference.
    pub async fn update_playback_speed(&self, speed: f32) -> Result<()> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(PlaybackError::InvalidSpeed(speed));
        }

        self.apply_speed(speed).await;

        if let Err(e) = self
            .settings
            .set_f64(&self.config.speed_key, f64::from(speed))
            .await
        {
            warn!(speed, error = %e, "Failed to save playback speed");
        }
        self.emit(PlaybackEvent::SpeedChanged { speed });
        Ok(())
    }

    /// Apply the stored speed preference, if any. Returns the speed in effect.
    pub async fn restore_playback_speed(&self) -> f32 {
        match self.settings.get_f64(&self.config.speed_key).await {
            Ok(Some(stored)) if stored.is_finite() && stored > 0.0 => {
                let speed = stored as f32;
                self.apply_speed(speed).await;
                debug!(speed, "Restored playback speed");
                speed
            }
            Ok(Some(stored)) => {
                warn!(stored, "Ignoring invalid stored playback speed");
                self.current_state().speed()
            }
            Ok(None) => self.current_state().speed(),
            Err(e) => {
                warn!(error = %e, "Failed to read playback speed");
                self.current_state().speed()
            }
        }
    }

    /// Unload the audiobook, saving its final position first.
    ///
    /// The speed preference survives.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        self.cancel_pending_write();

        let audiobook_id = state.audiobook_id();
        let write = self.forced_write(&state);
        let next = Arc::new(PlaybackState {
            speed: state.speed,
            ..PlaybackState::default()
        });
        self.commit(&mut state, next);
        drop(state);

        self.run_forced(write).await;
        self.emit(PlaybackEvent::Cleared {
            audiobook_id: audiobook_id.map(|id| id.0),
        });
    }

    /// Former entry point for pushing UI state into the controller.
    #[deprecated(note = "position and playing state flow through update_position and update_playing_state")]
    pub fn push_legacy_state(&self, track_index: usize, position_ms: u64, is_playing: bool) {
        warn!(
            track_index,
            position_ms, is_playing, "push_legacy_state is a no-op"
        );
    }

    async fn apply_speed(&self, speed: f32) {
        let mut state = self.state.lock().await;
        if state.speed == speed {
            return;
        }
        let next = Arc::new(PlaybackState {
            speed,
            ..PlaybackState::clone(&state)
        });
        self.commit(&mut state, next);
    }

    /// Install `next`, fire chapter listeners and publish. Caller holds the lock.
    fn commit(&self, state: &mut Arc<PlaybackState>, next: Arc<PlaybackState>) {
        if let Some(change) = chapter_change(state, &next) {
            let listeners = self.listeners.lock().clone();
            for listener in &listeners {
                listener.on_chapter_changed(&change);
            }
            if let Some(id) = change.audiobook_id.or_else(|| state.audiobook_id()) {
                self.emit(PlaybackEvent::ChapterChanged {
                    audiobook_id: id.0,
                    previous_chapter_id: change.previous.as_ref().map(|c| c.id.0),
                    chapter_id: change.current.as_ref().map(|c| c.id.0),
                    chapter_index: change.index,
                });
            }
        }

        *state = next.clone();
        self.state_tx.send_replace(next);
    }

    fn forced_write(&self, state: &PlaybackState) -> Option<ForcedWrite> {
        let audiobook_id = state.audiobook_id()?;
        Some(ForcedWrite {
            generation: self.writer.next_generation(),
            audiobook_id,
            position_ms: state.book_position_ms(),
        })
    }

    async fn run_forced(&self, write: Option<ForcedWrite>) {
        if let Some(write) = write {
            self.writer
                .write(write.generation, write.audiobook_id, write.position_ms, true)
                .await;
        }
    }

    fn schedule_write(&self, state: &PlaybackState) {
        let Some(audiobook_id) = state.audiobook_id() else {
            return;
        };
        let generation = self.writer.next_generation();
        let position_ms = state.book_position_ms();
        let cancel = CancellationToken::new();

        if let Some(previous) = self.pending_write.lock().replace(cancel.clone()) {
            previous.cancel();
        }

        let writer = self.writer.clone();
        let debounce = self.config.debounce;
        core_async::task::spawn(async move {
            core_async::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = sleep(debounce) => {}
            }
            writer.write(generation, audiobook_id, position_ms, false).await;
        });
    }

    fn cancel_pending_write(&self) {
        if let Some(pending) = self.pending_write.lock().take() {
            pending.cancel();
        }
    }

    fn emit(&self, event: PlaybackEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Playback(event));
        }
    }
}

impl Drop for PlaybackStateController {
    fn drop(&mut self) {
        self.cancel_pending_write();
    }
}

fn chapter_change(previous: &PlaybackState, next: &PlaybackState) -> Option<ChapterChange> {
    let before = previous.current_chapter();
    let after = next.current_chapter();

    let same_book = previous.audiobook_id() == next.audiobook_id();
    let same_chapter = before.map(|c| c.start_offset_ms) == after.map(|c| c.start_offset_ms);
    if same_book && same_chapter {
        return None;
    }
    if before.is_none() && after.is_none() {
        return None;
    }

    Some(ChapterChange {
        audiobook_id: next.audiobook_id(),
        previous: before.cloned(),
        current: after.cloned(),
        index: next.current_chapter_index(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{BridgeError, ManualClock, ProgressRecord};
    use core_async::time::Duration;
    use core_library::models::{ChapterId, TrackId};
    use std::collections::HashMap;

    #[derive(Default)]
    struct RecordingProgressStore {
        writes: parking_lot::Mutex<Vec<(i64, i64, u64)>>,
        stored: parking_lot::Mutex<HashMap<i64, ProgressRecord>>,
        fail: std::sync::atomic::AtomicBool,
    }

    impl RecordingProgressStore {
        fn writes(&self) -> Vec<(i64, i64, u64)> {
            self.writes.lock().clone()
        }

        fn positions(&self) -> Vec<u64> {
            self.writes().into_iter().map(|(_, _, pos)| pos).collect()
        }
    }

    #[async_trait]
    impl ProgressStore for RecordingProgressStore {
        async fn update_progress(
            &self,
            audiobook_id: i64,
            timestamp_ms: i64,
            position_ms: u64,
        ) -> BridgeResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(BridgeError::DatabaseError("disk full".to_string()));
            }
            self.writes
                .lock()
                .push((audiobook_id, timestamp_ms, position_ms));
            self.stored.lock().insert(
                audiobook_id,
                ProgressRecord {
                    audiobook_id,
                    timestamp_ms,
                    position_ms,
                },
            );
            Ok(())
        }

        async fn read_last_position(&self, audiobook_id: i64) -> BridgeResult<Option<ProgressRecord>> {
            Ok(self.stored.lock().get(&audiobook_id).copied())
        }
    }

    #[derive(Default)]
    struct MemorySettings {
        floats: parking_lot::Mutex<HashMap<String, f64>>,
    }

    #[async_trait]
    impl SettingsStore for MemorySettings {
        async fn set_string(&self, _key: &str, _value: &str) -> BridgeResult<()> {
            Ok(())
        }
        async fn get_string(&self, _key: &str) -> BridgeResult<Option<String>> {
            Ok(None)
        }
        async fn set_bool(&self, _key: &str, _value: bool) -> BridgeResult<()> {
            Ok(())
        }
        async fn get_bool(&self, _key: &str) -> BridgeResult<Option<bool>> {
            Ok(None)
        }
        async fn set_i64(&self, _key: &str, _value: i64) -> BridgeResult<()> {
            Ok(())
        }
        async fn get_i64(&self, _key: &str) -> BridgeResult<Option<i64>> {
            Ok(None)
        }
        async fn set_f64(&self, key: &str, value: f64) -> BridgeResult<()> {
            self.floats.lock().insert(key.to_string(), value);
            Ok(())
        }
        async fn get_f64(&self, key: &str) -> BridgeResult<Option<f64>> {
            Ok(self.floats.lock().get(key).copied())
        }
        async fn delete(&self, key: &str) -> BridgeResult<()> {
            self.floats.lock().remove(key);
            Ok(())
        }
        async fn has_key(&self, key: &str) -> BridgeResult<bool> {
            Ok(self.floats.lock().contains_key(key))
        }
        async fn list_keys(&self) -> BridgeResult<Vec<String>> {
            Ok(self.floats.lock().keys().cloned().collect())
        }
        async fn clear_all(&self) -> BridgeResult<()> {
            self.floats.lock().clear();
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        changes: parking_lot::Mutex<Vec<ChapterChange>>,
    }

    impl ChapterChangeListener for RecordingListener {
        fn on_chapter_changed(&self, change: &ChapterChange) {
            self.changes.lock().push(change.clone());
        }
    }

    struct Fixture {
        controller: PlaybackStateController,
        progress: Arc<RecordingProgressStore>,
        settings: Arc<MemorySettings>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let progress = Arc::new(RecordingProgressStore::default());
        let settings = Arc::new(MemorySettings::default());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let controller = PlaybackStateController::new(
            progress.clone(),
            settings.clone(),
            clock.clone(),
            PersistenceConfig::default(),
        );
        Fixture {
            controller,
            progress,
            settings,
            clock,
        }
    }

    fn book(id: i64) -> Audiobook {
        Audiobook::new(AudiobookId(id), format!("Book {}", id))
    }

    fn tracks(durations: &[u64]) -> Vec<Track> {
        durations
            .iter()
            .enumerate()
            .map(|(i, &d)| {
                Track::new(
                    TrackId(i as i64 + 1),
                    AudiobookId(1),
                    i as u32 + 1,
                    d,
                    format!("/parts/{}", i),
                )
            })
            .collect()
    }

    fn chapter(id: i64, start: u64, end: u64) -> Chapter {
        Chapter {
            id: ChapterId(id),
            title: format!("Chapter {}", id),
            index: id as u32,
            start_offset_ms: start,
            end_offset_ms: end,
            track_id: TrackId(1),
        }
    }

    fn two_chapters() -> Vec<Chapter> {
        vec![chapter(1, 0, 60_000), chapter(2, 60_000, 120_000)]
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_publishes_state_and_forces_write() {
        let f = fixture();
        let mut rx = f.controller.subscribe();

        f.controller
            .load_audiobook(book(7), tracks(&[60_000, 60_000]), two_chapters(), 1, 5_000)
            .await
            .unwrap();

        assert!(rx.has_changed().unwrap());
        let state = rx.borrow_and_update().clone();
        assert_eq!(state.audiobook_id(), Some(AudiobookId(7)));
        assert_eq!(state.current_track_index(), 1);
        assert_eq!(state.book_position_ms(), 65_000);
        assert_eq!(state.current_chapter_index(), Some(1));
        assert!(!state.is_playing());

        assert_eq!(f.progress.writes(), vec![(7, 1_700_000_000_000, 65_000)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_rejects_bad_start_index() {
        let f = fixture();
        let err = f
            .controller
            .load_audiobook(book(1), tracks(&[1_000]), Vec::new(), 3, 0)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PlaybackError::TrackIndexOutOfRange { index: 3, len: 1 }
        ));
        assert!(!f.controller.current_state().is_loaded());
        assert!(f.progress.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_synthesizes_chapters_from_tracks() {
        let f = fixture();
        f.controller
            .load_audiobook(book(1), tracks(&[1_000, 2_000, 3_000]), Vec::new(), 0, 0)
            .await
            .unwrap();

        let state = f.controller.current_state();
        let starts: Vec<u64> = state.chapters().iter().map(|c| c.start_offset_ms).collect();
        assert_eq!(starts, vec![0, 1_000, 3_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chapter_listener_fires_on_load_and_boundary_only() {
        let f = fixture();
        let listener = Arc::new(RecordingListener::default());
        f.controller.add_chapter_change_listener(listener.clone());

        f.controller
            .load_audiobook(book(1), tracks(&[120_000]), two_chapters(), 0, 0)
            .await
            .unwrap();
        {
            let changes = listener.changes.lock();
            assert_eq!(changes.len(), 1);
            assert!(changes[0].previous.is_none());
            assert_eq!(changes[0].current.as_ref().map(|c| c.id), Some(ChapterId(1)));
        }

        f.controller.update_position(0, 59_000).await.unwrap();
        assert_eq!(listener.changes.lock().len(), 1);

        f.controller.update_position(0, 61_000).await.unwrap();
        let changes = listener.changes.lock().clone();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1].previous.as_ref().map(|c| c.id), Some(ChapterId(1)));
        assert_eq!(changes[1].current.as_ref().map(|c| c.id), Some(ChapterId(2)));
        assert_eq!(changes[1].index, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_updates_writes_once_with_last_position() {
        let f = fixture();
        f.controller
            .load_audiobook(book(1), tracks(&[600_000]), Vec::new(), 0, 0)
            .await
            .unwrap();

        for second in 1..=10u64 {
            f.controller
                .update_position(0, second * 1_000)
                .await
                .unwrap();
            sleep(Duration::from_millis(500)).await;
        }
        assert_eq!(f.progress.positions(), vec![0]);

        f.clock.advance_millis(10_000);
        sleep(Duration::from_secs(4)).await;
        assert_eq!(f.progress.positions(), vec![0, 10_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_write_skipped_below_threshold() {
        let f = fixture();
        f.controller
            .load_audiobook(book(1), tracks(&[600_000]), Vec::new(), 0, 10_000)
            .await
            .unwrap();

        f.controller.update_position(0, 10_400).await.unwrap();
        sleep(Duration::from_secs(4)).await;
        assert_eq!(f.progress.positions(), vec![10_000]);

        f.controller.update_position(0, 11_500).await.unwrap();
        sleep(Duration::from_secs(4)).await;
        assert_eq!(f.progress.positions(), vec![10_000, 11_500]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_forces_write_and_cancels_pending() {
        let f = fixture();
        f.controller
            .load_audiobook(book(1), tracks(&[600_000]), Vec::new(), 0, 0)
            .await
            .unwrap();
        f.controller.update_playing_state(true).await;
        f.controller.update_position(0, 300).await.unwrap();

        // Below the threshold, but pausing always writes
        f.controller.update_playing_state(false).await;
        assert_eq!(f.progress.positions(), vec![0, 300]);
        assert!(!f.controller.current_state().is_playing());

        sleep(Duration::from_secs(10)).await;
        assert_eq!(f.progress.positions(), vec![0, 300]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playing_does_not_force_write() {
        let f = fixture();
        f.controller
            .load_audiobook(book(1), tracks(&[600_000]), Vec::new(), 0, 0)
            .await
            .unwrap();
        f.controller.update_playing_state(true).await;
        f.controller.update_playing_state(true).await;

        assert!(f.controller.current_state().is_playing());
        assert_eq!(f.progress.writes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_position_without_book_is_noop() {
        let f = fixture();
        f.controller.update_position(4, 1_000).await.unwrap();
        f.controller.update_playing_state(true).await;

        let state = f.controller.current_state();
        assert!(!state.is_loaded());
        assert!(!state.is_playing());
        sleep(Duration::from_secs(5)).await;
        assert!(f.progress.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_position_out_of_range() {
        let f = fixture();
        f.controller
            .load_audiobook(book(1), tracks(&[1_000, 1_000]), Vec::new(), 0, 0)
            .await
            .unwrap();

        let err = f.controller.update_position(2, 0).await.unwrap_err();
        assert!(matches!(
            err,
            PlaybackError::TrackIndexOutOfRange { index: 2, len: 2 }
        ));
        assert_eq!(f.controller.current_state().current_track_index(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_persists_and_keeps_speed() {
        let f = fixture();
        let listener = Arc::new(RecordingListener::default());
        f.controller.add_chapter_change_listener(listener.clone());

        f.controller.update_playback_speed(1.5).await.unwrap();
        f.controller
            .load_audiobook(book(3), tracks(&[60_000, 60_000]), Vec::new(), 0, 0)
            .await
            .unwrap();
        f.controller.update_position(1, 2_000).await.unwrap();

        f.controller.clear().await;

        let state = f.controller.current_state();
        assert!(!state.is_loaded());
        assert_eq!(state.speed(), 1.5);
        assert_eq!(f.progress.positions(), vec![0, 62_000]);

        let last = listener.changes.lock().last().cloned().unwrap();
        assert!(last.current.is_none());

        sleep(Duration::from_secs(5)).await;
        assert_eq!(f.progress.positions(), vec![0, 62_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_validation_and_persistence() {
        let f = fixture();

        for bad in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            assert!(matches!(
                f.controller.update_playback_speed(bad).await,
                Err(PlaybackError::InvalidSpeed(_))
            ));
        }

        f.controller.update_playback_speed(1.25).await.unwrap();
        assert_eq!(f.controller.current_state().speed(), 1.25);
        assert_eq!(
            f.settings.floats.lock().get("playback_speed").copied(),
            Some(1.25)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_playback_speed() {
        let f = fixture();
        assert_eq!(f.controller.restore_playback_speed().await, 1.0);

        f.settings
            .floats
            .lock()
            .insert("playback_speed".to_string(), 1.75);
        assert_eq!(f.controller.restore_playback_speed().await, 1.75);
        assert_eq!(f.controller.current_state().speed(), 1.75);

        f.settings
            .floats
            .lock()
            .insert("playback_speed".to_string(), -2.0);
        assert_eq!(f.controller.restore_playback_speed().await, 1.75);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_uses_stored_position() {
        let f = fixture();
        f.progress.stored.lock().insert(
            9,
            ProgressRecord {
                audiobook_id: 9,
                timestamp_ms: 1,
                position_ms: 75_000,
            },
        );

        f.controller
            .resume_audiobook(book(9), tracks(&[60_000, 60_000]), Vec::new())
            .await
            .unwrap();

        let state = f.controller.current_state();
        assert_eq!(state.current_track_index(), 1);
        assert_eq!(state.position_ms(), 15_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_without_progress_uses_track_history() {
        let f = fixture();
        let mut tracks = tracks(&[60_000, 60_000, 60_000]);
        tracks[2] = tracks[2].clone().with_progress(4_000, 500);

        f.controller
            .resume_audiobook(book(2), tracks, Vec::new())
            .await
            .unwrap();

        let state = f.controller.current_state();
        assert_eq!(state.current_track_index(), 2);
        assert_eq!(state.position_ms(), 4_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_failure_is_swallowed() {
        let f = fixture();
        f.progress.fail.store(true, Ordering::SeqCst);

        f.controller
            .load_audiobook(book(1), tracks(&[60_000]), Vec::new(), 0, 0)
            .await
            .unwrap();
        f.controller.update_position(0, 30_000).await.unwrap();
        sleep(Duration::from_secs(4)).await;
        f.controller.clear().await;

        assert!(f.progress.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_emitted() {
        let bus = Arc::new(EventBus::new(16));
        let mut events = bus.subscribe();
        let progress = Arc::new(RecordingProgressStore::default());
        let controller = PlaybackStateController::new(
            progress,
            Arc::new(MemorySettings::default()),
            Arc::new(ManualClock::new(0)),
            PersistenceConfig::default(),
        )
        .with_event_bus(bus.clone());

        controller
            .load_audiobook(book(4), tracks(&[60_000]), Vec::new(), 0, 0)
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.iter().any(|e| matches!(
            e,
            CoreEvent::Playback(PlaybackEvent::AudiobookLoaded { audiobook_id: 4, .. })
        )));
        assert!(seen.iter().any(|e| matches!(
            e,
            CoreEvent::Playback(PlaybackEvent::ChapterChanged { audiobook_id: 4, .. })
        )));
        assert!(seen.iter().any(|e| matches!(
            e,
            CoreEvent::Playback(PlaybackEvent::ProgressPersisted { forced: true, .. })
        )));
    }

    #[tokio::test(start_paused = true)]
    #[allow(deprecated)]
    async fn test_legacy_push_is_noop() {
        let f = fixture();
        f.controller.push_legacy_state(3, 9_000, true);
        assert_eq!(*f.controller.current_state(), PlaybackState::default());
    }
}
