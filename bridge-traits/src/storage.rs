//! Storage Abstractions
//!
//! Key-value preference storage and the listening-progress persistence
//! contract used by the playback state controller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Key-value settings storage trait
///
/// Abstracts platform-specific preferences/settings storage:
/// - iOS: UserDefaults
/// - Android: SharedPreferences / DataStore
/// - Desktop: SQLite-backed key-value table
///
/// The playback speed preference lives here rather than in playback state
/// persistence, so it survives across audiobooks.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn save_preference(store: &dyn SettingsStore) -> Result<()> {
///     store.set_f64("playback_speed", 1.25).await?;
///     store.set_bool("prefetch_on_wifi_only", true).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Store a string value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Store a boolean value
    async fn set_bool(&self, key: &str, value: bool) -> Result<()>;

    /// Retrieve a boolean value
    async fn get_bool(&self, key: &str) -> Result<Option<bool>>;

    /// Store an integer value
    async fn set_i64(&self, key: &str, value: i64) -> Result<()>;

    /// Retrieve an integer value
    async fn get_i64(&self, key: &str) -> Result<Option<i64>>;

    /// Store a floating-point value
    async fn set_f64(&self, key: &str, value: f64) -> Result<()>;

    /// Retrieve a floating-point value
    async fn get_f64(&self, key: &str) -> Result<Option<f64>>;

    /// Delete a setting
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a setting exists
    async fn has_key(&self, key: &str) -> Result<bool>;

    /// List all setting keys
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Clear all settings
    async fn clear_all(&self) -> Result<()>;
}

/// Last persisted listening position for an audiobook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub audiobook_id: i64,
    /// Wall-clock time of the write, unix milliseconds.
    pub timestamp_ms: i64,
    /// Position on the audiobook timeline, milliseconds.
    pub position_ms: u64,
}

/// Listening-progress persistence.
///
/// `update_progress` must store `(timestamp_ms, position_ms)` atomically for
/// the given audiobook; a record is only ever overwritten, never merged.
/// Writes carrying an older timestamp than the stored one may be ignored.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn update_progress(
        &self,
        audiobook_id: i64,
        timestamp_ms: i64,
        position_ms: u64,
    ) -> Result<()>;

    async fn read_last_position(&self, audiobook_id: i64) -> Result<Option<ProgressRecord>>;
}
