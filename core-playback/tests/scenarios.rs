//! End-to-end scenarios across the playback components.

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    BridgeError, ManualClock, MediaServer, NegotiationRequest, PlaybackDecision, ProgressRecord,
    ProgressStore, SettingsStore,
};
use core_async::time::{sleep, Duration, Instant};
use core_library::db::create_test_pool;
use core_library::models::{Audiobook, AudiobookId, Chapter, ChapterId, ServerConnection, Track, TrackId};
use core_library::repositories::progress::SqliteProgressRepository;
use core_playback::{
    ChapterChange, ChapterChangeListener, ConnectionConfig, ConnectionSelector, ConnectionState,
    PersistenceConfig, PlaybackStateController, StreamUrlConfig, StreamUrlResolver,
    TrackListPositionTracker,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

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
                format!("/library/parts/{}/file.m4b", i + 1),
            )
        })
        .collect()
}

// ============================================================================
// Test bridges
// ============================================================================

/// Media server whose probe latency and outcome is fixed per URI.
#[derive(Default)]
struct FakeServer {
    probes: HashMap<String, (u64, bool)>,
    negotiations: AtomicUsize,
}

impl FakeServer {
    fn with_probe(mut self, uri: &str, delay_ms: u64, ok: bool) -> Self {
        self.probes.insert(uri.to_string(), (delay_ms, ok));
        self
    }
}

#[async_trait]
impl MediaServer for FakeServer {
    async fn check_server(&self, uri: &str) -> BridgeResult<()> {
        let Some(&(delay_ms, ok)) = self.probes.get(uri) else {
            return Err(BridgeError::ConnectionRefused(uri.to_string()));
        };
        sleep(Duration::from_millis(delay_ms)).await;
        if ok {
            Ok(())
        } else {
            Err(BridgeError::ConnectionRefused(uri.to_string()))
        }
    }

    async fn negotiate_playback(&self, request: &NegotiationRequest) -> BridgeResult<PlaybackDecision> {
        let n = self.negotiations.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PlaybackDecision {
            playable: true,
            url: Some(format!("/stream{}?session={}", request.path, n)),
        })
    }
}

#[derive(Default)]
struct MemoryProgress {
    writes: Mutex<Vec<u64>>,
}

#[async_trait]
impl ProgressStore for MemoryProgress {
    async fn update_progress(&self, _id: i64, _ts: i64, position_ms: u64) -> BridgeResult<()> {
        self.writes.lock().push(position_ms);
        Ok(())
    }

    async fn read_last_position(&self, _id: i64) -> BridgeResult<Option<ProgressRecord>> {
        Ok(None)
    }
}

#[derive(Default)]
struct NoSettings;

#[async_trait]
impl SettingsStore for NoSettings {
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
    async fn set_f64(&self, _key: &str, _value: f64) -> BridgeResult<()> {
        Ok(())
    }
    async fn get_f64(&self, _key: &str) -> BridgeResult<Option<f64>> {
        Ok(None)
    }
    async fn delete(&self, _key: &str) -> BridgeResult<()> {
        Ok(())
    }
    async fn has_key(&self, _key: &str) -> BridgeResult<bool> {
        Ok(false)
    }
    async fn list_keys(&self) -> BridgeResult<Vec<String>> {
        Ok(Vec::new())
    }
    async fn clear_all(&self) -> BridgeResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct ChapterLog(Mutex<Vec<ChapterChange>>);

impl ChapterChangeListener for ChapterLog {
    fn on_chapter_changed(&self, change: &ChapterChange) {
        self.0.lock().push(change.clone());
    }
}

fn controller(progress: Arc<dyn ProgressStore>) -> PlaybackStateController {
    PlaybackStateController::new(
        progress,
        Arc::new(NoSettings),
        Arc::new(ManualClock::new(1_000)),
        PersistenceConfig::default(),
    )
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn chapter_boundary_fires_exactly_one_notification() {
    let chapters = vec![
        Chapter {
            id: ChapterId(10),
            title: "Opening".to_string(),
            index: 0,
            start_offset_ms: 0,
            end_offset_ms: 100,
            track_id: TrackId(1),
        },
        Chapter {
            id: ChapterId(11),
            title: "Second".to_string(),
            index: 1,
            start_offset_ms: 100,
            end_offset_ms: 250,
            track_id: TrackId(1),
        },
    ];
    let controller = controller(Arc::new(MemoryProgress::default()));
    controller
        .load_audiobook(
            Audiobook::new(AudiobookId(1), "Book"),
            tracks(&[250]),
            chapters,
            0,
            0,
        )
        .await
        .unwrap();

    let log = Arc::new(ChapterLog::default());
    controller.add_chapter_change_listener(log.clone());

    controller.update_position(0, 0).await.unwrap();
    assert_eq!(controller.current_state().current_chapter_index(), Some(0));
    assert!(log.0.lock().is_empty());

    controller.update_position(0, 100).await.unwrap();
    assert_eq!(controller.current_state().current_chapter_index(), Some(1));

    let changes = log.0.lock().clone();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].previous.as_ref().map(|c| c.id), Some(ChapterId(10)));
    assert_eq!(changes[0].current.as_ref().map(|c| c.id), Some(ChapterId(11)));
}

#[test]
fn relative_seek_crosses_into_next_track() {
    let tracker = TrackListPositionTracker::new();
    tracker.set_track_list(tracks(&[100, 200]));
    tracker.update_position(0, 80).unwrap();

    let state = tracker.seek_by_relative(150);
    assert_eq!(state.current_track_index(), 1);
    // 80 + 150 - 100
    assert_eq!(state.current_track_progress_ms(), 130);
    assert_eq!(tracker.current_book_position_ms(), 230);
}

#[tokio::test(start_paused = true)]
async fn fastest_healthy_connection_wins() {
    let server = Arc::new(
        FakeServer::default()
            .with_probe("http://192.168.1.20:32400", 200, false)
            .with_probe("https://relay.example.net", 200, false)
            .with_probe("https://remote.example.net", 50, true),
    );
    let selector = ConnectionSelector::new(server, ConnectionConfig::default());
    let candidates = vec![
        ServerConnection::local("http://192.168.1.20:32400"),
        ServerConnection::remote("https://relay.example.net"),
        ServerConnection::remote("https://remote.example.net"),
    ];

    let started = Instant::now();
    let url = selector.choose_viable_connection(&candidates).await.unwrap();

    assert_eq!(url, "https://remote.example.net");
    assert!(started.elapsed() < Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn server_change_forces_fresh_negotiation() {
    let server = Arc::new(
        FakeServer::default()
            .with_probe("http://10.0.0.5:32400", 10, true)
            .with_probe("https://far.example.net", 10, true),
    );
    let selector = ConnectionSelector::new(server.clone(), ConnectionConfig::default());
    let resolver = Arc::new(StreamUrlResolver::new(server.clone(), StreamUrlConfig::default()));
    selector.add_server_url_listener(resolver.clone());

    selector.set_connections(vec![ServerConnection::local("http://10.0.0.5:32400")]);
    assert_eq!(selector.connect().await.as_deref(), Some("http://10.0.0.5:32400"));
    assert_eq!(selector.state(), ConnectionState::Connected);

    let track = tracks(&[60_000]).remove(0);
    let first = resolver.resolve(&track, false).await.unwrap();
    assert!(first.starts_with("http://10.0.0.5:32400/stream"));
    assert_eq!(resolver.resolve(&track, false).await.unwrap(), first);
    assert_eq!(server.negotiations.load(Ordering::SeqCst), 1);

    selector.set_connections(vec![ServerConnection::remote("https://far.example.net")]);
    selector.connect().await.unwrap();

    let second = resolver.resolve(&track, false).await.unwrap();
    assert_eq!(server.negotiations.load(Ordering::SeqCst), 2);
    assert!(second.starts_with("https://far.example.net/stream"));
    assert_ne!(first, second);
}

#[tokio::test(start_paused = true)]
async fn burst_of_position_updates_is_written_once() {
    let progress = Arc::new(MemoryProgress::default());
    let controller = controller(progress.clone());
    controller
        .load_audiobook(
            Audiobook::new(AudiobookId(1), "Book"),
            tracks(&[3_600_000]),
            Vec::new(),
            0,
            0,
        )
        .await
        .unwrap();

    for step in 1..=20u64 {
        controller.update_position(0, step * 250).await.unwrap();
        sleep(Duration::from_millis(100)).await;
    }
    sleep(Duration::from_secs(5)).await;

    // The first write is the forced one from loading
    assert_eq!(*progress.writes.lock(), vec![0, 5_000]);
}

#[tokio::test]
async fn progress_survives_in_sqlite_across_controllers() {
    let pool = create_test_pool().await.unwrap();
    let store = Arc::new(SqliteProgressRepository::new(pool));
    let book_tracks = tracks(&[60_000, 60_000, 60_000]);

    let first = controller(store.clone());
    first
        .load_audiobook(
            Audiobook::new(AudiobookId(42), "Book"),
            book_tracks.clone(),
            Vec::new(),
            0,
            0,
        )
        .await
        .unwrap();
    first.update_position(2, 12_345).await.unwrap();
    first.clear().await;

    let second = controller(store);
    second
        .resume_audiobook(Audiobook::new(AudiobookId(42), "Book"), book_tracks, Vec::new())
        .await
        .unwrap();

    let state = second.current_state();
    assert_eq!(state.current_track_index(), 2);
    assert_eq!(state.position_ms(), 12_345);
}
