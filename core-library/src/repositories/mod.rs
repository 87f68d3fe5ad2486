//! # Repository Pattern Implementation
//!
//! Repository traits and their SQLite implementations.
//!
//! ## Architecture
//!
//! - Traits define the interface for each repository
//! - SQLite implementations use sqlx for async database access
//! - All operations return `Result<T>` for error handling
//!
//! ## Available Repositories
//!
//! - `ProgressRepository` - Last listening position per audiobook; the SQLite
//!   implementation also serves as the playback core's `ProgressStore`

pub mod progress;

pub use progress::{ProgressRepository, SqliteProgressRepository};
