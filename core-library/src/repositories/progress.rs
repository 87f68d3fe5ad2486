//! Progress repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::AudiobookId;
use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::storage::{ProgressRecord, ProgressStore};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, instrument};

/// Progress repository interface for data access operations
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Find the stored progress for an audiobook
    ///
    /// # Returns
    /// - `Ok(Some(record))` if a position was saved
    /// - `Ok(None)` if the audiobook was never played
    async fn find(&self, audiobook_id: AudiobookId) -> Result<Option<ProgressRecord>>;

    /// Write `(updated_at, position_ms)` for an audiobook in one statement
    ///
    /// The row is overwritten only when `updated_at` is not older than the
    /// stored timestamp.
    ///
    /// # Returns
    /// - `Ok(true)` if the row was written
    /// - `Ok(false)` if a newer record was already stored
    async fn upsert(
        &self,
        audiobook_id: AudiobookId,
        updated_at: i64,
        position_ms: u64,
    ) -> Result<bool>;
}

#[derive(Debug, FromRow)]
struct ProgressRow {
    audiobook_id: i64,
    position_ms: i64,
    updated_at: i64,
}

impl From<ProgressRow> for ProgressRecord {
    fn from(row: ProgressRow) -> Self {
        ProgressRecord {
            audiobook_id: row.audiobook_id,
            timestamp_ms: row.updated_at,
            position_ms: row.position_ms.max(0) as u64,
        }
    }
}

/// SQLite implementation of ProgressRepository
#[derive(Clone)]
pub struct SqliteProgressRepository {
    pool: SqlitePool,
}

impl SqliteProgressRepository {
    /// Create a new SQLite progress repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn position_to_db(position_ms: u64) -> Result<i64> {
    i64::try_from(position_ms).map_err(|_| LibraryError::InvalidInput {
        field: "position_ms".to_string(),
        message: format!("{} does not fit in a signed 64-bit column", position_ms),
    })
}

#[async_trait]
impl ProgressRepository for SqliteProgressRepository {
    async fn find(&self, audiobook_id: AudiobookId) -> Result<Option<ProgressRecord>> {
        let row = sqlx::query_as::<_, ProgressRow>(
            "SELECT audiobook_id, position_ms, updated_at FROM playback_progress WHERE audiobook_id = ?",
        )
        .bind(audiobook_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ProgressRecord::from))
    }

    #[instrument(skip(self))]
    async fn upsert(
        &self,
        audiobook_id: AudiobookId,
        updated_at: i64,
        position_ms: u64,
    ) -> Result<bool> {
        let position = position_to_db(position_ms)?;

        let result = sqlx::query(
            r#"
            INSERT INTO playback_progress (audiobook_id, position_ms, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(audiobook_id) DO UPDATE SET
                position_ms = excluded.position_ms,
                updated_at = excluded.updated_at
            WHERE excluded.updated_at >= playback_progress.updated_at
            "#,
        )
        .bind(audiobook_id)
        .bind(position)
        .bind(updated_at)
        .execute(&self.pool)
        .await?;

        let written = result.rows_affected() > 0;
        if !written {
            debug!("Ignored progress write older than stored record");
        }
        Ok(written)
    }
}

#[async_trait]
impl ProgressStore for SqliteProgressRepository {
    async fn update_progress(
        &self,
        audiobook_id: i64,
        timestamp_ms: i64,
        position_ms: u64,
    ) -> BridgeResult<()> {
        self.upsert(AudiobookId(audiobook_id), timestamp_ms, position_ms)
            .await?;
        Ok(())
    }

    async fn read_last_position(&self, audiobook_id: i64) -> BridgeResult<Option<ProgressRecord>> {
        Ok(self.find(AudiobookId(audiobook_id)).await?)
    }
}
