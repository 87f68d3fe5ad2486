//! # Media Server Provider
//!
//! Implements the `MediaServer` bridge over HTTP for a Plex-style media
//! server.
//!
//! ## Overview
//!
//! This module provides:
//! - Reachability probes against a candidate connection's identity endpoint
//! - Playback negotiation turning a media path into a stream URL
//! - Mapping of HTTP and parse failures onto `BridgeError`

pub mod connector;
pub mod error;
pub mod types;

pub use connector::{ConnectorOptions, MediaServerConnector};
pub use error::{MediaServerError, Result};
