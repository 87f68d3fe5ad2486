//! # Stream URL Resolver
//!
//! Turns a track's media path into a playable URL by negotiating with the
//! media server, and caches the result.
//!
//! A cached URL is served only while it is younger than `max_age` and was
//! resolved against the server URL that is active right now. A server change
//! clears the whole cache synchronously, before any later lookup can observe
//! it.

use crate::config::StreamUrlConfig;
use crate::connection::ServerUrlListener;
use crate::error::{PlaybackError, Result};
use crate::retry::{RetryExecutor, RetryOutcome};
use bridge_traits::{MediaServer, NegotiationRequest, PlaybackDecision};
use core_async::sync::Semaphore;
use core_async::time::Instant;
use core_library::models::{Track, TrackId};
use core_runtime::events::{CoreEvent, EventBus, StreamEvent};
use futures::future::join_all;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Notified after the URL cache was cleared because the server changed.
pub trait CacheInvalidationListener: Send + Sync {
    fn on_cache_invalidated(&self, server_url: &str, entries_cleared: usize);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    track_id: TrackId,
    media_path: String,
}

impl CacheKey {
    fn for_track(track: &Track) -> Self {
        Self {
            track_id: track.id,
            media_path: track.media_path.clone(),
        }
    }
}

/// A resolved URL and the server it was negotiated with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedUrl {
    pub url: String,
    pub resolved_at: Instant,
    pub server_url: String,
}

/// Result of a batch pre-resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreResolveSummary {
    pub success_count: usize,
    pub failed_tracks: Vec<TrackId>,
    pub total_tracks: usize,
}

/// Resolves and caches stream URLs for tracks.
pub struct StreamUrlResolver {
    server: Arc<dyn MediaServer>,
    config: StreamUrlConfig,
    retry: RetryExecutor,
    cache: Mutex<LruCache<CacheKey, CachedUrl>>,
    server_url: RwLock<Option<String>>,
    listeners: Mutex<Vec<Arc<dyn CacheInvalidationListener>>>,
    event_bus: Option<Arc<EventBus>>,
}

impl StreamUrlResolver {
    pub fn new(server: Arc<dyn MediaServer>, config: StreamUrlConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        let retry = RetryExecutor::new(config.retry.clone());

        Self {
            server,
            config,
            retry,
            cache: Mutex::new(LruCache::new(capacity)),
            server_url: RwLock::new(None),
            listeners: Mutex::new(Vec::new()),
            event_bus: None,
        }
    }

    /// Set event bus for stream events.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn add_invalidation_listener(&self, listener: Arc<dyn CacheInvalidationListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn current_server_url(&self) -> Option<String> {
        self.server_url.read().clone()
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Resolve a playable URL, logging and swallowing failures.
    pub async fn resolve(&self, track: &Track, force_refresh: bool) -> Option<String> {
        self.try_resolve(track, force_refresh).await.ok()
    }

    /// Resolve a playable URL.
    ///
    /// Serves a valid cache entry unless `force_refresh` is set. Otherwise
    /// negotiates with the server, retrying transient I/O failures only, and
    /// writes the result through to the cache.
    #[instrument(skip(self, track), fields(track_id = %track.id))]
    pub async fn try_resolve(&self, track: &Track, force_refresh: bool) -> Result<String> {
        let Some(server_url) = self.current_server_url() else {
            debug!("No active server; cannot resolve stream URL");
            return Err(PlaybackError::NoActiveServer);
        };

        let key = CacheKey::for_track(track);
        if !force_refresh {
            if let Some(url) = self.cached(&key, &server_url) {
                debug!("Stream URL served from cache");
                return Ok(url);
            }
        }

        let request = NegotiationRequest {
            server_url: server_url.clone(),
            path: track.media_path.clone(),
            protocol: self.config.protocol.clone(),
            bitrate_hints: self.config.bitrate_hints,
        };

        let outcome = self
            .retry
            .execute(
                |_| self.negotiate(&request),
                |err: &PlaybackError| {
                    matches!(err, PlaybackError::Bridge(bridge) if bridge.is_transient())
                },
                |_| {},
            )
            .await;

        match outcome {
            RetryOutcome::Success { value, .. } => {
                self.store(key, &value, server_url);
                Ok(value)
            }
            RetryOutcome::Failure { error, attempts } => {
                warn!(error = %error, attempts, "Stream URL resolution failed");
                self.emit(StreamEvent::ResolveFailed {
                    track_id: track.id.0,
                    message: error.to_string(),
                    recoverable: error.is_transient(),
                });
                Err(error)
            }
        }
    }

    /// Resolve URLs for many tracks with bounded parallelism.
    ///
    /// Failures are collected; they never abort the batch. The limit is
    /// clamped to `1..=tracks.len()`.
    #[instrument(skip(self, tracks), fields(total = tracks.len()))]
    pub async fn pre_resolve_urls(&self, tracks: &[Track], max_concurrency: usize) -> PreResolveSummary {
        let limiter = Semaphore::new(max_concurrency.clamp(1, tracks.len().max(1)));
        let limiter = &limiter;

        let results = join_all(tracks.iter().map(|track| async move {
            let _permit = limiter.acquire().await.ok();
            (track.id, self.try_resolve(track, false).await.is_ok())
        }))
        .await;

        let mut summary = PreResolveSummary {
            total_tracks: tracks.len(),
            ..PreResolveSummary::default()
        };
        for (track_id, ok) in results {
            if ok {
                summary.success_count += 1;
            } else {
                summary.failed_tracks.push(track_id);
            }
        }

        info!(
            success = summary.success_count,
            failed = summary.failed_tracks.len(),
            "Stream URL pre-resolution finished"
        );
        self.emit(StreamEvent::PreResolveCompleted {
            success_count: summary.success_count,
            failed_count: summary.failed_tracks.len(),
            total_tracks: summary.total_tracks,
        });

        summary
    }

    /// Drop expired entries, then pre-resolve the given tracks again.
    pub async fn refresh_urls_on_network_change(&self, tracks: &[Track]) -> PreResolveSummary {
        let purged = self.purge_expired();
        debug!(purged, "Refreshing stream URLs after network change");
        self.pre_resolve_urls(tracks, self.config.max_concurrency)
            .await
    }

    /// Remove entries that are too old or belong to another server.
    pub fn purge_expired(&self) -> usize {
        let current = self.current_server_url();
        let mut cache = self.cache.lock();

        let stale: Vec<CacheKey> = cache
            .iter()
            .filter(|(_, entry)| !self.is_valid(entry, current.as_deref()))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            cache.pop(key);
        }
        stale.len()
    }

    /// Forget the cached URL of one track.
    pub fn invalidate(&self, track: &Track) -> bool {
        self.cache.lock().pop(&CacheKey::for_track(track)).is_some()
    }

    async fn negotiate(&self, request: &NegotiationRequest) -> Result<String> {
        let decision = self.server.negotiate_playback(request).await?;

        match decision {
            PlaybackDecision {
                playable: true,
                url: Some(url),
            } if !url.trim().is_empty() => Ok(join_url(&request.server_url, &url)),
            _ => Err(PlaybackError::NotPlayable {
                path: request.path.clone(),
            }),
        }
    }

    fn cached(&self, key: &CacheKey, server_url: &str) -> Option<String> {
        let mut cache = self.cache.lock();
        let entry = cache.get(key)?;
        if self.is_valid(entry, Some(server_url)) {
            return Some(entry.url.clone());
        }
        cache.pop(key);
        None
    }

    fn is_valid(&self, entry: &CachedUrl, server_url: Option<&str>) -> bool {
        entry.resolved_at.elapsed() < self.config.max_age
            && server_url == Some(entry.server_url.as_str())
    }

    fn store(&self, key: CacheKey, url: &str, server_url: String) {
        // Holding the read lock keeps a concurrent server change from
        // clearing the cache between the check and the insert.
        let current = self.server_url.read();
        if current.as_deref() != Some(server_url.as_str()) {
            debug!("Server changed during negotiation; not caching result");
            return;
        }

        self.cache.lock().put(
            key,
            CachedUrl {
                url: url.to_string(),
                resolved_at: Instant::now(),
                server_url,
            },
        );
    }

    fn emit(&self, event: StreamEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Stream(event));
        }
    }
}

impl ServerUrlListener for StreamUrlResolver {
    /// Record the new server and clear every cached URL.
    fn on_server_url_changed(&self, new_url: &str) {
        let cleared = {
            let mut current = self.server_url.write();
            if current.as_deref() == Some(new_url) {
                return;
            }
            *current = Some(new_url.to_string());

            let mut cache = self.cache.lock();
            let cleared = cache.len();
            cache.clear();
            cleared
        };

        info!(entries_cleared = cleared, "Server changed, stream URL cache cleared");

        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener.on_cache_invalidated(new_url, cleared);
        }

        self.emit(StreamEvent::CacheInvalidated {
            server_url: new_url.to_string(),
            entries_cleared: cleared,
        });
    }
}

fn join_url(base: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        url.trim_start_matches('/')
    )
}
