//! # Core Configuration Module
//!
//! Provides configuration management for the audiobook playback core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds the bridges and tuning values the core needs. It enforces
//! fail-fast validation so that a misconfigured host is rejected before any
//! component is constructed.
//!
//! ## Required Dependencies
//!
//! - `database_path` - Location of the progress database
//! - `SettingsStore` - Required for user preferences (playback speed)
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `HttpClient` - HTTP operations (desktop default: reqwest)
//! - `NetworkMonitor` - Connectivity detection; without it the core never
//!   reconnects on its own
//!
//! When the `desktop-shims` feature is enabled, a SQLite-backed `SettingsStore`
//! is created next to the database if none is provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_library::models::ServerConnection;
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/progress.db")
//!     .server_connection(ServerConnection::local("http://10.0.0.2:32400"))
//!     .server_connection(ServerConnection::remote("https://media.example.com"))
//!     .persist_debounce_ms(5_000)
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // Missing database path
//! let config = CoreConfig::builder()
//!     .build()
//!     .expect("Should fail - missing database path");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{HttpClient, NetworkMonitor, SettingsStore};
use core_library::models::ServerConnection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Core configuration for the playback core
///
/// Built via [`CoreConfig::builder()`]; validated on `build()`.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database holding playback progress
    pub database_path: PathBuf,

    /// Candidate endpoints of the media server; may be set later at runtime
    pub server_connections: Vec<ServerConnection>,

    /// HTTP client used by the media server connector
    pub http_client: Option<Arc<dyn HttpClient>>,

    /// User preference storage
    pub settings_store: Arc<dyn SettingsStore>,

    /// Network change source for automatic reconnects
    pub network_monitor: Option<Arc<dyn NetworkMonitor>>,

    pub features: FeatureFlags,

    pub timings: SyncTimings,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("server_connections", &self.server_connections.len())
            .field(
                "http_client",
                &self.http_client.as_ref().map(|_| "HttpClient { ... }"),
            )
            .field("settings_store", &"SettingsStore { ... }")
            .field(
                "network_monitor",
                &self
                    .network_monitor
                    .as_ref()
                    .map(|_| "NetworkMonitor { ... }"),
            )
            .field("features", &self.features)
            .field("timings", &self.timings)
            .finish()
    }
}

/// Feature toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// React to network availability changes by reconnecting
    pub enable_network_awareness: bool,

    /// Resolve stream URLs for the whole track list ahead of playback
    pub enable_url_prefetch: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_network_awareness: true,
            enable_url_prefetch: true,
        }
    }
}

/// Timing knobs for connection selection, URL caching and persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncTimings {
    /// Per-candidate health check timeout
    pub connection_timeout_ms: u64,

    /// Maximum age of a cached stream URL
    pub url_cache_max_age_secs: u64,

    /// Quiet period before a position update is written
    pub persist_debounce_ms: u64,

    /// Minimum position change that justifies a debounced write
    pub persist_min_delta_ms: u64,

    /// Concurrent URL negotiations during prefetch
    pub prefetch_concurrency: usize,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            connection_timeout_ms: 10_000,
            url_cache_max_age_secs: 300,
            persist_debounce_ms: 3_000,
            persist_min_delta_ms: 1_000,
            prefetch_concurrency: 4,
        }
    }
}

impl SyncTimings {
    pub fn validate(&self) -> Result<()> {
        if self.connection_timeout_ms == 0 {
            return Err(Error::Config(
                "Connection timeout must be greater than zero".to_string(),
            ));
        }

        if self.url_cache_max_age_secs == 0 {
            return Err(Error::Config(
                "URL cache max age must be greater than zero".to_string(),
            ));
        }

        if !(1..=64).contains(&self.prefetch_concurrency) {
            return Err(Error::Config(
                "Prefetch concurrency must be between 1 and 64".to_string(),
            ));
        }

        Ok(())
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// Rejects an empty database path, server connections with an empty or
    /// non-http URI, and out-of-range timings.
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        for connection in &self.server_connections {
            let uri = connection.uri.trim();
            if uri.is_empty() {
                return Err(Error::Config(
                    "Server connection URI cannot be empty".to_string(),
                ));
            }
            if !(uri.starts_with("http://") || uri.starts_with("https://")) {
                return Err(Error::Config(format!(
                    "Server connection URI must use http or https: {}",
                    uri
                )));
            }
        }

        self.timings.validate()?;

        if self.features.enable_network_awareness && self.network_monitor.is_none() {
            tracing::debug!("Network awareness enabled without a NetworkMonitor; reconnects are manual");
        }

        Ok(())
    }
}

#[cfg_attr(feature = "desktop-shims", allow(dead_code))]
fn settings_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SettingsStore".to_string(),
        message: "No settings store provided. Enable the `desktop-shims` feature or call \
                  .settings_store() on the builder."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_settings_store(database_path: &Path) -> Result<Arc<dyn SettingsStore>> {
    use bridge_desktop::SqliteSettingsStore;
    use std::thread;
    use tokio::runtime::{Handle, Runtime};

    let candidate = database_path
        .parent()
        .map(|parent| parent.join("settings.db"))
        .unwrap_or_else(|| PathBuf::from("settings.db"));

    let init_store = |path: PathBuf| -> Result<_> {
        let runtime = Runtime::new().map_err(|e| {
            Error::Internal(format!(
                "Failed to create Tokio runtime for default settings store: {}",
                e
            ))
        })?;

        runtime
            .block_on(SqliteSettingsStore::new(path))
            .map_err(|e| {
                Error::Internal(format!("Failed to initialize default SettingsStore: {}", e))
            })
    };

    // A runtime cannot be nested inside another, so initialise on a fresh thread
    // when the builder runs inside async code.
    let store = match Handle::try_current() {
        Ok(_) => {
            let path = candidate.clone();
            thread::spawn(move || init_store(path))
                .join()
                .map_err(|_| {
                    Error::Internal(
                        "Tokio worker thread panicked while creating default SettingsStore"
                            .to_string(),
                    )
                })??
        }
        Err(_) => init_store(candidate)?,
    };

    let store: Arc<dyn SettingsStore> = Arc::new(store);
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_settings_store(_database_path: &Path) -> Result<Arc<dyn SettingsStore>> {
    Err(settings_store_missing_error())
}

/// Builder for [`CoreConfig`]
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    server_connections: Vec<ServerConnection>,
    http_client: Option<Arc<dyn HttpClient>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    features: FeatureFlags,
    timings: SyncTimings,
}

impl CoreConfigBuilder {
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn server_connection(mut self, connection: ServerConnection) -> Self {
        self.server_connections.push(connection);
        self
    }

    pub fn server_connections(mut self, connections: Vec<ServerConnection>) -> Self {
        self.server_connections = connections;
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn enable_network_awareness(mut self, enabled: bool) -> Self {
        self.features.enable_network_awareness = enabled;
        self
    }

    pub fn enable_url_prefetch(mut self, enabled: bool) -> Self {
        self.features.enable_url_prefetch = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    pub fn timings(mut self, timings: SyncTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn connection_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timings.connection_timeout_ms = timeout_ms;
        self
    }

    pub fn persist_debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.timings.persist_debounce_ms = debounce_ms;
        self
    }

    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let settings_store = match self.settings_store {
            Some(store) => store,
            None => provide_default_settings_store(&database_path)?,
        };

        let config = CoreConfig {
            database_path,
            server_connections: self.server_connections,
            http_client: self.http_client,
            settings_store,
            network_monitor: self.network_monitor,
            features: self.features,
            timings: self.timings,
        };

        config.validate()?;

        Ok(config)
    }
}
