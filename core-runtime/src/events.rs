//! # Event Bus System
//!
//! Provides an event-driven architecture for the audiobook platform core using
//! `tokio::sync::broadcast`. Components publish typed events; hosts and other
//! modules subscribe without the publishers knowing about them.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: Strongly-typed enum hierarchies per domain
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────┐  emit   ┌───────────┐
//! │ ConnectionSelector ├────────>│           │
//! └────────────────────┘         │           │
//!                                │ EventBus  │  subscribe  ┌────────────┐
//! ┌────────────────────┐  emit   │ (broadcast├────────────>│ Subscriber │
//! │ StreamUrlResolver  ├────────>│  channel) │             └────────────┘
//! └────────────────────┘         │           │
//!                                │           │  subscribe  ┌────────────┐
//! ┌────────────────────┐  emit   │           ├────────────>│ Subscriber │
//! │ PlaybackController ├────────>│           │             └────────────┘
//! └────────────────────┘         └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{ConnectionEvent, CoreEvent, EventBus};
//!
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Connection(ConnectionEvent::Connected {
//!         server_url: "http://10.0.0.2:32400".to_string(),
//!     }))
//!     .ok();
//!
//! assert!(subscriber.try_recv().is_ok());
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! Publishers ignore the "no subscribers" error from [`EventBus::emit`]: an
//! event nobody listens to is not a failure.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default event buffer size.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event type encompassing all domain events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Connection(ConnectionEvent),
    Stream(StreamEvent),
    Playback(PlaybackEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Connection(e) => e.description(),
            CoreEvent::Stream(e) => e.description(),
            CoreEvent::Playback(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Connection(ConnectionEvent::Failed { .. }) => EventSeverity::Warning,
            CoreEvent::Stream(StreamEvent::ResolveFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Playback(PlaybackEvent::PersistFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Connection(ConnectionEvent::Connected { .. }) => EventSeverity::Info,
            CoreEvent::Connection(ConnectionEvent::ServerUrlChanged { .. }) => EventSeverity::Info,
            CoreEvent::Playback(PlaybackEvent::AudiobookLoaded { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Connection Events
// ============================================================================

/// Server connection selection events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ConnectionEvent {
    /// A connection attempt started.
    Connecting { candidate_count: usize },
    /// A candidate answered and is now the active server.
    Connected { server_url: String },
    /// Every attempt failed; the last known URL is kept.
    Failed { reason: String },
    /// The network dropped; the last known URL is kept.
    Lost { last_known_url: Option<String> },
    /// The active base URL was swapped.
    ServerUrlChanged {
        previous: Option<String>,
        current: String,
    },
}

impl ConnectionEvent {
    fn description(&self) -> &str {
        match self {
            ConnectionEvent::Connecting { .. } => "Selecting server connection",
            ConnectionEvent::Connected { .. } => "Server connection established",
            ConnectionEvent::Failed { .. } => "Server connection failed",
            ConnectionEvent::Lost { .. } => "Server connection lost",
            ConnectionEvent::ServerUrlChanged { .. } => "Active server URL changed",
        }
    }
}

// ============================================================================
// Stream URL Events
// ============================================================================

/// Stream URL resolution and cache events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum StreamEvent {
    /// The URL cache was cleared because the server changed.
    CacheInvalidated {
        server_url: String,
        entries_cleared: usize,
    },
    /// A batch pre-resolution finished.
    PreResolveCompleted {
        success_count: usize,
        failed_count: usize,
        total_tracks: usize,
    },
    /// A single resolution gave up.
    ResolveFailed {
        track_id: i64,
        message: String,
        recoverable: bool,
    },
}

impl StreamEvent {
    fn description(&self) -> &str {
        match self {
            StreamEvent::CacheInvalidated { .. } => "Stream URL cache invalidated",
            StreamEvent::PreResolveCompleted { .. } => "Stream URL pre-resolution completed",
            StreamEvent::ResolveFailed { .. } => "Stream URL resolution failed",
        }
    }
}

// ============================================================================
// Playback Events
// ============================================================================

/// Playback state events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    AudiobookLoaded {
        audiobook_id: i64,
        track_count: usize,
        chapter_count: usize,
    },
    ChapterChanged {
        audiobook_id: i64,
        previous_chapter_id: Option<i64>,
        chapter_id: Option<i64>,
        chapter_index: Option<usize>,
    },
    PlayingChanged {
        audiobook_id: i64,
        is_playing: bool,
        position_ms: u64,
    },
    SpeedChanged {
        speed: f32,
    },
    ProgressPersisted {
        audiobook_id: i64,
        position_ms: u64,
        forced: bool,
    },
    PersistFailed {
        audiobook_id: i64,
        message: String,
    },
    Cleared {
        audiobook_id: Option<i64>,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::AudiobookLoaded { .. } => "Audiobook loaded",
            PlaybackEvent::ChapterChanged { .. } => "Chapter changed",
            PlaybackEvent::PlayingChanged { .. } => "Playing state changed",
            PlaybackEvent::SpeedChanged { .. } => "Playback speed changed",
            PlaybackEvent::ProgressPersisted { .. } => "Listening progress saved",
            PlaybackEvent::PersistFailed { .. } => "Saving listening progress failed",
            PlaybackEvent::Cleared { .. } => "Playback cleared",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to core events.
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// Subscribers falling behind by more than `capacity` events receive
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventSeverity, EventStream};
///
/// let bus = EventBus::new(16);
/// let stream = EventStream::new(bus.subscribe())
///     .filter(|event| event.severity() >= EventSeverity::Warning);
/// # drop(stream);
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only yield events matching `predicate`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next matching event.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive a matching event without waiting.
    ///
    /// Returns `None` when no matching event is buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
