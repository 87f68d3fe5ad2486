//! # Audiobook Library Module
//!
//! Domain models for audiobooks and the persistence layer for listening
//! progress.
//!
//! ## Overview
//!
//! This module manages:
//! - Audiobook, track, chapter and server-connection models with validation
//! - Synthesised 1:1 chapters for books that ship without chapter metadata
//! - SQLite pool configuration and embedded migrations
//! - The progress repository backing the playback core's `ProgressStore`

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use error::{LibraryError, Result};
pub use models::{Audiobook, AudiobookId, Chapter, ChapterId, ServerConnection, Track, TrackId};
pub use repositories::{ProgressRepository, SqliteProgressRepository};
