//! # Playback Core Configuration
//!
//! Typed configuration for the retry executor, connection selector, stream
//! URL resolver and position persistence.

use bridge_traits::BitrateHints;
use core_runtime::config::SyncTimings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Retry Policy
// ============================================================================

/// Exponential backoff policy.
///
/// Attempt `n` (1-based) that fails waits
/// `min(max_delay, initial_delay * multiplier^(n-1))` before attempt `n + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay")]
    pub initial_delay: Duration,

    #[serde(default = "default_max_delay")]
    pub max_delay: Duration,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Policy used when racing server connections.
    pub fn connection() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

    /// Policy used when negotiating stream URLs.
    pub fn url_resolution() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

    /// A single attempt with no waiting.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be >= 1".to_string());
        }

        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err("multiplier must be a finite value >= 1.0".to_string());
        }

        if self.initial_delay > self.max_delay {
            return Err("initial_delay cannot exceed max_delay".to_string());
        }

        Ok(())
    }
}

// ============================================================================
// Component Configs
// ============================================================================

/// Configuration for [`ConnectionSelector`](crate::connection::ConnectionSelector).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Timeout of the whole health-check race for one attempt
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout: Duration,

    #[serde(default = "RetryPolicy::connection")]
    pub retry: RetryPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: default_attempt_timeout(),
            retry: RetryPolicy::connection(),
        }
    }
}

impl ConnectionConfig {
    pub fn from_timings(timings: &SyncTimings) -> Self {
        Self {
            attempt_timeout: Duration::from_millis(timings.connection_timeout_ms),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.attempt_timeout.is_zero() {
            return Err("attempt_timeout must be > 0".to_string());
        }
        self.retry.validate()
    }
}

/// Configuration for [`StreamUrlResolver`](crate::stream_url::StreamUrlResolver).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamUrlConfig {
    /// Cached URLs older than this are renegotiated
    #[serde(default = "default_url_max_age")]
    pub max_age: Duration,

    #[serde(default = "RetryPolicy::url_resolution")]
    pub retry: RetryPolicy,

    /// Concurrent negotiations during pre-resolution
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_protocol")]
    pub protocol: String,

    #[serde(default)]
    pub bitrate_hints: BitrateHints,
}

impl Default for StreamUrlConfig {
    fn default() -> Self {
        Self {
            max_age: default_url_max_age(),
            retry: RetryPolicy::url_resolution(),
            max_concurrency: default_max_concurrency(),
            cache_capacity: default_cache_capacity(),
            protocol: default_protocol(),
            bitrate_hints: BitrateHints::default(),
        }
    }
}

impl StreamUrlConfig {
    pub fn from_timings(timings: &SyncTimings) -> Self {
        Self {
            max_age: Duration::from_secs(timings.url_cache_max_age_secs),
            max_concurrency: timings.prefetch_concurrency,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_age.is_zero() {
            return Err("max_age must be > 0".to_string());
        }

        if self.cache_capacity == 0 {
            return Err("cache_capacity must be > 0".to_string());
        }

        if !(1..=MAX_PREFETCH_CONCURRENCY).contains(&self.max_concurrency) {
            return Err(format!(
                "max_concurrency must be between 1 and {}",
                MAX_PREFETCH_CONCURRENCY
            ));
        }

        if self.protocol.trim().is_empty() {
            return Err("protocol cannot be empty".to_string());
        }

        self.retry.validate()
    }
}

/// Configuration for debounced progress persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Quiet period after the last position update before writing
    #[serde(default = "default_debounce")]
    pub debounce: Duration,

    /// Debounced writes closer than this to the last persisted position are skipped
    #[serde(default = "default_min_persist_delta")]
    pub min_persist_delta: Duration,

    /// Settings key holding the playback speed preference
    #[serde(default = "default_speed_key")]
    pub speed_key: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            debounce: default_debounce(),
            min_persist_delta: default_min_persist_delta(),
            speed_key: default_speed_key(),
        }
    }
}

impl PersistenceConfig {
    pub fn from_timings(timings: &SyncTimings) -> Self {
        Self {
            debounce: Duration::from_millis(timings.persist_debounce_ms),
            min_persist_delta: Duration::from_millis(timings.persist_min_delta_ms),
            ..Self::default()
        }
    }

    pub(crate) fn min_persist_delta_ms(&self) -> u64 {
        u64::try_from(self.min_persist_delta.as_millis()).unwrap_or(u64::MAX)
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_attempt_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_url_max_age() -> Duration {
    Duration::from_secs(5 * 60)
}

/// Upper bound for concurrent stream URL negotiations.
pub const MAX_PREFETCH_CONCURRENCY: usize = 64;

fn default_max_concurrency() -> usize {
    4
}

fn default_cache_capacity() -> usize {
    512
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_debounce() -> Duration {
    Duration::from_secs(3)
}

fn default_min_persist_delta() -> Duration {
    Duration::from_secs(1)
}

fn default_speed_key() -> String {
    "playback_speed".to_string()
}
