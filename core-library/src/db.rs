//! SQLite pool for the progress database.
//!
//! The database holds one small table written every few seconds during
//! playback, so the pool stays small and runs in WAL mode to keep the
//! writer from blocking readers. Migrations are embedded at compile time
//! and applied whenever a pool is created.
//!
//! ```rust,ignore
//! use core_library::db::{create_pool, DatabaseConfig};
//! use core_library::SqliteProgressRepository;
//!
//! let pool = create_pool(DatabaseConfig::new("library/progress.db")).await?;
//! let progress = SqliteProgressRepository::new(pool);
//! ```

use crate::{LibraryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const MEMORY_URL: &str = "sqlite::memory:";

/// Connection settings for [`create_pool`].
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `sqlite:<path>` or `sqlite::memory:`
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Idle connections are closed after this long; `None` keeps them open
    pub idle_timeout: Option<Duration>,
}

impl DatabaseConfig {
    /// File-backed database; the file is created on first use.
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        let path = database_path.into();
        Self {
            database_url: format!("sqlite:{}", path.display()),
            max_connections: 4,
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }

    /// In-memory database pinned to a single connection, since every
    /// connection to `:memory:` opens a database of its own.
    pub fn in_memory() -> Self {
        Self {
            database_url: MEMORY_URL.to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: None,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    fn is_in_memory(&self) -> bool {
        self.database_url == MEMORY_URL
    }
}

/// Open the pool, apply migrations and check the connection.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    info!(
        database_url = %config.database_url,
        max_connections = config.max_connections,
        "Opening progress database"
    );

    let mut options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    if !config.is_in_memory() {
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
    }

    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        // The in-memory database lives exactly as long as its connection
        .max_lifetime(if config.is_in_memory() {
            None
        } else {
            Some(Duration::from_secs(1800))
        })
        .connect_with(options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to open progress database");
            LibraryError::Database(e)
        })?;

    run_migrations(&pool).await?;
    health_check(&pool).await?;

    Ok(pool)
}

/// Migrated in-memory pool for tests.
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    create_pool(DatabaseConfig::in_memory()).await
}

pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Migration failed");
            LibraryError::Migration(e.to_string())
        })?;

    debug!("Progress database migrations applied");
    Ok(())
}

pub async fn health_check(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await?;
    Ok(())
}
