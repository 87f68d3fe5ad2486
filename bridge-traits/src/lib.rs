//! # Host Bridge Traits
//!
//! Collaborator contracts that the playback core depends on but never
//! implements itself.
//!
//! ## Overview
//!
//! Each trait represents a capability supplied by the host: a desktop build
//! wires the adapters in `bridge-desktop` and `provider-media-server`, mobile
//! hosts inject their own.
//!
//! ## Traits
//!
//! ### Remote server & networking
//! - [`MediaServer`](server::MediaServer) - Reachability probe and playback negotiation
//! - [`HttpClient`](http::HttpClient) - Single-shot async HTTP
//! - [`NetworkMonitor`](network::NetworkMonitor) - Connectivity and change notifications
//!
//! ### Persistence
//! - [`ProgressStore`](storage::ProgressStore) - Atomic `(timestamp, position)` writes per audiobook
//! - [`SettingsStore`](storage::SettingsStore) - Key-value preferences (playback speed)
//!
//! ### Playback
//! - [`MediaEngine`](playback::MediaEngine) - Seek and transport commands on the host engine
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! must map transport failures onto the transient variants (`Timeout`,
//! `DnsFailure`, `ConnectionRefused`, `Io`) so the core's retry policies can
//! tell them apart from permanent failures.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single adapter can be shared
//! across async tasks behind an `Arc`.

pub mod error;
pub mod http;
pub mod network;
pub mod playback;
pub mod server;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use network::{
    NetworkChangeStream, NetworkEvent, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType,
};
pub use playback::{EnginePosition, MediaEngine};
pub use server::{BitrateHints, MediaServer, NegotiationRequest, PlaybackDecision};
pub use storage::{ProgressRecord, ProgressStore, SettingsStore};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
