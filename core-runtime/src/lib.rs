//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the audiobook playback core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the core runtime utilities that other modules depend on.
//! It establishes the logging conventions, configuration validation and event
//! broadcasting used by the connection, stream and playback components.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
