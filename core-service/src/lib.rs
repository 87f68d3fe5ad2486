//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (media server,
//! progress storage, settings, network monitor, media engine) into the
//! playback core. Desktop apps typically enable the `desktop-shims` feature,
//! which supplies a `reqwest` HTTP client and a SQLite settings store from
//! `bridge-desktop` when the host provides none.
//!
//! ```text
//! NetworkMonitor ──> ConnectionSelector ──(server URL)──> StreamUrlResolver
//!                          │                                      ^
//!                          └──(Connected)── URL refresh ──────────┘
//! MediaEngine ──> PlaybackSession ──> PlaybackStateController ──> ProgressStore
//!                        └──────────> TrackListPositionTracker
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::{Clock, HttpClient, MediaEngine, MediaServer, ProgressStore, SystemClock};
use core_async::sync::CancellationToken;
use core_async::task::JoinHandle;
use core_library::db::{create_pool, DatabaseConfig};
use core_library::models::Track;
use core_library::SqliteProgressRepository;
use core_playback::{
    ConnectionConfig, ConnectionSelector, ConnectionState, PersistenceConfig, PlaybackSession,
    PlaybackStateController, ServerUrlListener, StreamUrlConfig, StreamUrlResolver,
    TrackListPositionTracker,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus};
use provider_media_server::{ConnectorOptions, MediaServerConnector};
use tracing::{debug, info, warn};

/// Host-provided collaborators that are not part of [`CoreConfig`].
///
/// Anything left as `None` falls back to a default built from the
/// configuration where one exists.
pub struct CoreDependencies {
    /// Media server bridge; defaults to the HTTP connector over the configured client
    pub media_server: Option<Arc<dyn MediaServer>>,
    /// Progress persistence; defaults to SQLite at `CoreConfig::database_path`
    pub progress_store: Option<Arc<dyn ProgressStore>>,
    /// Audio engine; without one no [`PlaybackSession`] is created
    pub media_engine: Option<Arc<dyn MediaEngine>>,
    pub clock: Arc<dyn Clock>,
}

impl Default for CoreDependencies {
    fn default() -> Self {
        Self {
            media_server: None,
            progress_store: None,
            media_engine: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl CoreDependencies {
    pub fn with_media_server(mut self, server: Arc<dyn MediaServer>) -> Self {
        self.media_server = Some(server);
        self
    }

    pub fn with_progress_store(mut self, store: Arc<dyn ProgressStore>) -> Self {
        self.progress_store = Some(store);
        self
    }

    pub fn with_media_engine(mut self, engine: Arc<dyn MediaEngine>) -> Self {
        self.media_engine = Some(engine);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Primary façade exposed to host applications.
pub struct CoreService {
    config: CoreConfig,
    event_bus: Arc<EventBus>,
    selector: Arc<ConnectionSelector>,
    resolver: Arc<StreamUrlResolver>,
    tracker: Arc<TrackListPositionTracker>,
    controller: Arc<PlaybackStateController>,
    session: Option<Arc<PlaybackSession>>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl CoreService {
    /// Validate `config`, build every component and start background work.
    ///
    /// Background work is the network watcher (network awareness enabled and
    /// a monitor configured) and the stream URL refresh after each successful
    /// connection (URL prefetch enabled). Connecting is left to the caller.
    pub async fn bootstrap(config: CoreConfig, deps: CoreDependencies) -> Result<Self> {
        config.validate()?;
        info!(
            connections = config.server_connections.len(),
            "Bootstrapping playback core"
        );

        let event_bus = Arc::new(EventBus::default());
        let server = match deps.media_server {
            Some(server) => server,
            None => default_media_server(&config)?,
        };

        let selector = Arc::new(
            ConnectionSelector::new(server.clone(), ConnectionConfig::from_timings(&config.timings))
                .with_event_bus(event_bus.clone()),
        );
        selector.set_connections(config.server_connections.clone());

        let resolver = Arc::new(
            StreamUrlResolver::new(server, StreamUrlConfig::from_timings(&config.timings))
                .with_event_bus(event_bus.clone()),
        );
        selector.add_server_url_listener(resolver.clone());

        let progress_store = match deps.progress_store {
            Some(store) => store,
            None => {
                let pool = create_pool(DatabaseConfig::new(&config.database_path)).await?;
                Arc::new(SqliteProgressRepository::new(pool)) as Arc<dyn ProgressStore>
            }
        };

        let controller = Arc::new(
            PlaybackStateController::new(
                progress_store,
                config.settings_store.clone(),
                deps.clock,
                PersistenceConfig::from_timings(&config.timings),
            )
            .with_event_bus(event_bus.clone()),
        );
        controller.restore_playback_speed().await;

        let tracker = Arc::new(TrackListPositionTracker::new());
        let session = deps.media_engine.map(|engine| {
            Arc::new(PlaybackSession::new(
                controller.clone(),
                tracker.clone(),
                engine,
            ))
        });

        let mut service = Self {
            config,
            event_bus,
            selector,
            resolver,
            tracker,
            controller,
            session,
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
        };
        service.start_background_tasks().await;

        Ok(service)
    }

    async fn start_background_tasks(&mut self) {
        if self.config.features.enable_network_awareness {
            if let Some(monitor) = &self.config.network_monitor {
                match monitor.subscribe_changes().await {
                    Ok(changes) => {
                        self.tasks.push(self.selector.clone().watch_network(changes));
                    }
                    Err(e) => warn!(error = %e, "Network change subscription failed"),
                }
            }
        }

        if self.config.features.enable_url_prefetch {
            self.tasks.push(spawn_url_refresh(
                self.selector.clone(),
                self.resolver.clone(),
                self.controller.clone(),
                self.shutdown.clone(),
            ));
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn subscribe_events(&self) -> core_async::sync::broadcast::Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    pub fn connection_selector(&self) -> &Arc<ConnectionSelector> {
        &self.selector
    }

    pub fn stream_url_resolver(&self) -> &Arc<StreamUrlResolver> {
        &self.resolver
    }

    pub fn position_tracker(&self) -> &Arc<TrackListPositionTracker> {
        &self.tracker
    }

    pub fn playback_controller(&self) -> &Arc<PlaybackStateController> {
        &self.controller
    }

    /// Present only when a media engine was provided.
    pub fn session(&self) -> Option<&Arc<PlaybackSession>> {
        self.session.as_ref()
    }

    /// Select a server connection now. See [`ConnectionSelector::connect`].
    pub async fn connect(&self) -> Option<String> {
        self.selector.connect().await
    }

    /// Stream URL for the track currently loaded in the controller.
    pub async fn current_stream_url(&self) -> Option<String> {
        let state = self.controller.current_state();
        let track = state.current_track()?;
        self.resolver.resolve(track, false).await
    }

    /// Stop background work. Pending progress writes are not flushed;
    /// call `clear()` on the controller first to persist the final position.
    pub fn shutdown(&mut self) {
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        debug!("Playback core shut down");
    }
}

impl Drop for CoreService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn default_media_server(config: &CoreConfig) -> Result<Arc<dyn MediaServer>> {
    let http_client = match &config.http_client {
        Some(client) => client.clone(),
        None => default_http_client()?,
    };
    Ok(Arc::new(MediaServerConnector::new(
        http_client,
        ConnectorOptions::default(),
    )))
}

#[cfg(feature = "desktop-shims")]
fn default_http_client() -> Result<Arc<dyn HttpClient>> {
    Ok(Arc::new(bridge_desktop::ReqwestHttpClient::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(CoreError::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "No media server or HTTP client provided. Enable the `desktop-shims` \
                  feature or pass one in."
            .to_string(),
    })
}

/// Re-resolve stream URLs for the loaded audiobook after every successful connection.
fn spawn_url_refresh(
    selector: Arc<ConnectionSelector>,
    resolver: Arc<StreamUrlResolver>,
    controller: Arc<PlaybackStateController>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let mut states = selector.subscribe_state();

    core_async::task::spawn(async move {
        loop {
            core_async::select! {
                _ = shutdown.cancelled() => break,
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            if *states.borrow_and_update() != ConnectionState::Connected {
                continue;
            }

            // The selector notifies listeners after publishing the state
            let Some(server_url) = selector.active_server_url() else {
                continue;
            };
            resolver.on_server_url_changed(&server_url);

            let state = controller.current_state();
            let tracks: &[Track] = state.tracks();
            if tracks.is_empty() {
                continue;
            }

            let summary = resolver.refresh_urls_on_network_change(tracks).await;
            debug!(
                resolved = summary.success_count,
                failed = summary.failed_tracks.len(),
                "Refreshed stream URLs after connecting"
            );
        }
    })
}
