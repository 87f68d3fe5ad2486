//! Service wiring tests with in-memory bridges.

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    EnginePosition, ManualClock, MediaEngine, MediaServer, NegotiationRequest, NetworkChangeStream,
    NetworkInfo, NetworkMonitor, NetworkType, PlaybackDecision, ProgressRecord, ProgressStore,
    SettingsStore,
};
use core_async::sync::mpsc;
use core_async::time::{sleep, Duration};
use core_library::models::{Audiobook, AudiobookId, ServerConnection, Track, TrackId};
use core_playback::ConnectionState;
use core_runtime::config::{CoreConfig, FeatureFlags, SyncTimings};
use core_service::{CoreDependencies, CoreError, CoreService};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const SERVER: &str = "http://10.0.0.2:32400";

#[derive(Default)]
struct FakeServer {
    negotiations: AtomicUsize,
}

#[async_trait]
impl MediaServer for FakeServer {
    async fn check_server(&self, _uri: &str) -> BridgeResult<()> {
        Ok(())
    }

    async fn negotiate_playback(&self, request: &NegotiationRequest) -> BridgeResult<PlaybackDecision> {
        self.negotiations.fetch_add(1, Ordering::SeqCst);
        Ok(PlaybackDecision {
            playable: true,
            url: Some(format!("/stream{}", request.path)),
        })
    }
}

#[derive(Default)]
struct MemoryProgress {
    writes: Mutex<Vec<(i64, u64)>>,
}

#[async_trait]
impl ProgressStore for MemoryProgress {
    async fn update_progress(&self, id: i64, _ts: i64, position_ms: u64) -> BridgeResult<()> {
        self.writes.lock().unwrap().push((id, position_ms));
        Ok(())
    }

    async fn read_last_position(&self, _id: i64) -> BridgeResult<Option<ProgressRecord>> {
        Ok(None)
    }
}

#[derive(Default)]
struct MemorySettings {
    floats: Mutex<HashMap<String, f64>>,
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
        self.floats.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }
    async fn get_f64(&self, key: &str) -> BridgeResult<Option<f64>> {
        Ok(self.floats.lock().unwrap().get(key).copied())
    }
    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.floats.lock().unwrap().remove(key);
        Ok(())
    }
    async fn has_key(&self, key: &str) -> BridgeResult<bool> {
        Ok(self.floats.lock().unwrap().contains_key(key))
    }
    async fn list_keys(&self) -> BridgeResult<Vec<String>> {
        Ok(self.floats.lock().unwrap().keys().cloned().collect())
    }
    async fn clear_all(&self) -> BridgeResult<()> {
        self.floats.lock().unwrap().clear();
        Ok(())
    }
}

/// Network monitor whose change stream is fed by the test.
struct ScriptedMonitor {
    changes: Mutex<Option<mpsc::UnboundedReceiver<NetworkInfo>>>,
}

struct ScriptedStream(mpsc::UnboundedReceiver<NetworkInfo>);

#[async_trait]
impl NetworkChangeStream for ScriptedStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        self.0.recv().await
    }
}

#[async_trait]
impl NetworkMonitor for ScriptedMonitor {
    async fn get_network_info(&self) -> BridgeResult<NetworkInfo> {
        Ok(NetworkInfo::connected(Some(NetworkType::WiFi)))
    }

    async fn subscribe_changes(&self) -> BridgeResult<Box<dyn NetworkChangeStream>> {
        let rx = self
            .changes
            .lock()
            .unwrap()
            .take()
            .expect("subscribed once");
        Ok(Box::new(ScriptedStream(rx)))
    }
}

#[derive(Default)]
struct RecordingEngine {
    seeks: Mutex<Vec<(usize, u64)>>,
}

#[async_trait]
impl MediaEngine for RecordingEngine {
    async fn seek_to(&self, track_index: usize, offset_ms: u64) -> BridgeResult<()> {
        self.seeks.lock().unwrap().push((track_index, offset_ms));
        Ok(())
    }
    async fn play(&self) -> BridgeResult<()> {
        Ok(())
    }
    async fn pause(&self) -> BridgeResult<()> {
        Ok(())
    }
    async fn position(&self) -> BridgeResult<EnginePosition> {
        Ok(EnginePosition {
            track_index: 0,
            offset_ms: 0,
        })
    }
}

fn tracks(count: usize) -> Vec<Track> {
    (0..count)
        .map(|i| {
            Track::new(
                TrackId(i as i64 + 1),
                AudiobookId(7),
                i as u32 + 1,
                60_000,
                format!("/library/parts/{}/file.m4b", i + 1),
            )
        })
        .collect()
}

fn config(settings: Arc<dyn SettingsStore>, features: FeatureFlags) -> CoreConfig {
    CoreConfig {
        database_path: PathBuf::from("/tmp/audiobook-core-test/library.db"),
        server_connections: vec![ServerConnection::local(SERVER)],
        http_client: None,
        settings_store: settings,
        network_monitor: None,
        features,
        timings: SyncTimings::default(),
    }
}

fn quiet_features() -> FeatureFlags {
    FeatureFlags {
        enable_network_awareness: false,
        enable_url_prefetch: false,
    }
}

fn deps(server: Arc<FakeServer>, progress: Arc<MemoryProgress>) -> CoreDependencies {
    CoreDependencies::default()
        .with_media_server(server)
        .with_progress_store(progress)
        .with_clock(Arc::new(ManualClock::new(1_000)))
}

#[tokio::test(start_paused = true)]
async fn test_connect_then_resolve_current_track() {
    let server = Arc::new(FakeServer::default());
    let service = CoreService::bootstrap(
        config(Arc::new(MemorySettings::default()), quiet_features()),
        deps(server.clone(), Arc::new(MemoryProgress::default())),
    )
    .await
    .unwrap();

    assert_eq!(service.connect().await.as_deref(), Some(SERVER));
    assert_eq!(
        service.connection_selector().state(),
        ConnectionState::Connected
    );
    assert_eq!(
        service.stream_url_resolver().current_server_url().as_deref(),
        Some(SERVER)
    );

    // Nothing loaded yet
    assert_eq!(service.current_stream_url().await, None);

    service
        .playback_controller()
        .load_audiobook(Audiobook::new(AudiobookId(7), "Book"), tracks(2), Vec::new(), 1, 0)
        .await
        .unwrap();

    let url = service.current_stream_url().await.unwrap();
    assert!(url.starts_with(SERVER), "unexpected url {url}");
    assert!(url.contains("/library/parts/2/file.m4b"));
    assert_eq!(server.negotiations.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_config_is_rejected() {
    let mut config = config(Arc::new(MemorySettings::default()), quiet_features());
    config.database_path = PathBuf::new();

    let result = CoreService::bootstrap(
        config,
        deps(Arc::new(FakeServer::default()), Arc::new(MemoryProgress::default())),
    )
    .await;

    assert!(matches!(result, Err(CoreError::Config(_))));
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_restores_saved_speed() {
    let settings = Arc::new(MemorySettings::default());
    settings
        .floats
        .lock()
        .unwrap()
        .insert("playback_speed".to_string(), 1.5);

    let service = CoreService::bootstrap(
        config(settings, quiet_features()),
        deps(Arc::new(FakeServer::default()), Arc::new(MemoryProgress::default())),
    )
    .await
    .unwrap();

    assert_eq!(service.playback_controller().current_state().speed(), 1.5);
}

#[tokio::test(start_paused = true)]
async fn test_connection_prefetches_loaded_tracks() {
    let server = Arc::new(FakeServer::default());
    let features = FeatureFlags {
        enable_network_awareness: false,
        enable_url_prefetch: true,
    };
    let service = CoreService::bootstrap(
        config(Arc::new(MemorySettings::default()), features),
        deps(server.clone(), Arc::new(MemoryProgress::default())),
    )
    .await
    .unwrap();

    service
        .playback_controller()
        .load_audiobook(Audiobook::new(AudiobookId(7), "Book"), tracks(3), Vec::new(), 0, 0)
        .await
        .unwrap();

    service.connect().await.unwrap();
    sleep(Duration::from_millis(100)).await;

    assert_eq!(service.stream_url_resolver().cached_len(), 3);
    assert_eq!(server.negotiations.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_network_changes_drive_connection_state() {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut config = config(
        Arc::new(MemorySettings::default()),
        FeatureFlags {
            enable_network_awareness: true,
            enable_url_prefetch: false,
        },
    );
    config.network_monitor = Some(Arc::new(ScriptedMonitor {
        changes: Mutex::new(Some(rx)),
    }));

    let service = CoreService::bootstrap(
        config,
        deps(Arc::new(FakeServer::default()), Arc::new(MemoryProgress::default())),
    )
    .await
    .unwrap();
    let selector = service.connection_selector().clone();

    tx.send(NetworkInfo::connected(Some(NetworkType::WiFi))).unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(selector.state(), ConnectionState::Connected);

    tx.send(NetworkInfo::disconnected()).unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(selector.state(), ConnectionState::NotConnected);
    assert_eq!(selector.active_server_url().as_deref(), Some(SERVER));
}

#[tokio::test(start_paused = true)]
async fn test_session_requires_media_engine() {
    let without = CoreService::bootstrap(
        config(Arc::new(MemorySettings::default()), quiet_features()),
        deps(Arc::new(FakeServer::default()), Arc::new(MemoryProgress::default())),
    )
    .await
    .unwrap();
    assert!(without.session().is_none());

    let engine = Arc::new(RecordingEngine::default());
    let progress = Arc::new(MemoryProgress::default());
    let with = CoreService::bootstrap(
        config(Arc::new(MemorySettings::default()), quiet_features()),
        deps(Arc::new(FakeServer::default()), progress.clone()).with_media_engine(engine.clone()),
    )
    .await
    .unwrap();

    let session = with.session().unwrap();
    session
        .load(Audiobook::new(AudiobookId(7), "Book"), tracks(2), Vec::new(), 1, 500)
        .await
        .unwrap();

    assert_eq!(*engine.seeks.lock().unwrap(), vec![(1, 500)]);
    assert_eq!(with.position_tracker().snapshot().current_book_position_ms(), 60_500);
    assert_eq!(*progress.writes.lock().unwrap(), vec![(7, 60_500)]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_background_work() {
    let server = Arc::new(FakeServer::default());
    let mut service = CoreService::bootstrap(
        config(Arc::new(MemorySettings::default()), FeatureFlags::default()),
        deps(server.clone(), Arc::new(MemoryProgress::default())),
    )
    .await
    .unwrap();

    service
        .playback_controller()
        .load_audiobook(Audiobook::new(AudiobookId(7), "Book"), tracks(2), Vec::new(), 0, 0)
        .await
        .unwrap();
    service.shutdown();

    service.connect().await.unwrap();
    sleep(Duration::from_millis(100)).await;

    assert_eq!(server.negotiations.load(Ordering::SeqCst), 0);
}
