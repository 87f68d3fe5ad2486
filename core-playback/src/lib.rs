//! # Playback Synchronization Module
//!
//! Keeps an audiobook client's view of playback consistent with a remote
//! media server and a local media engine.
//!
//! ## Overview
//!
//! This module handles:
//! - Retrying fallible network operations with exponential backoff
//! - Selecting a reachable server endpoint and following network changes
//! - Resolving and caching stream URLs per server
//! - Tracking the position across a multi-track audiobook
//! - Owning playback state and persisting listening progress

pub mod chapters;
pub mod config;
pub mod connection;
pub mod error;
pub mod position_tracker;
pub mod retry;
pub mod session;
pub mod state_controller;
pub mod stream_url;

pub use config::{ConnectionConfig, PersistenceConfig, RetryPolicy, StreamUrlConfig};
pub use connection::{ConnectionSelector, ConnectionState, ServerUrlListener};
pub use error::{PlaybackError, Result};
pub use position_tracker::{TrackListPositionTracker, TrackListState};
pub use retry::{RetryAttempt, RetryExecutor, RetryOutcome};
pub use session::PlaybackSession;
pub use state_controller::{
    ChapterChange, ChapterChangeListener, PlaybackState, PlaybackStateController,
};
pub use stream_url::{
    CacheInvalidationListener, CachedUrl, PreResolveSummary, StreamUrlResolver,
};
