//! Durable state for downloads and their byte-range chunks.
//!
//! Every mutation that has to stay consistent with another one (chunk
//! progress and the parent's aggregate progress, a reset and the chunk
//! deletion it implies) runs inside a single `SQLite` transaction, so a crash
//! can never leave half of it visible.
//!
//! # Overview
//!
//! - [`Store`] - Main interface for download and chunk persistence
//! - [`Download`] / [`NewDownload`] - Download rows and creation input
//! - [`DownloadStatus`] - Lifecycle state machine
//! - [`Chunk`] / [`PlannedChunk`] - Persisted and planned byte ranges
//! - [`StoreError`] - Operation error types
//!
//! # Example
//!
//! ```ignore
//! use chunkdl::store::{NewDownload, Store};
//! use chunkdl::Database;
//! use std::path::Path;
//!
//! let db = Database::new(Path::new("chunkdl.db")).await?;
//! let store = Store::new(db);
//!
//! let id = store
//!     .create(&NewDownload::new("9e107d9d372bb6826bd81d3542a419d6", "https://example.com/a.iso", "/data/a.iso"))
//!     .await?;
//! let download = store.get(id).await?;
//! ```

mod chunk;
mod error;
mod record;
mod repository;

pub use chunk::{Chunk, ChunkStatus, PlannedChunk};
pub use error::{StoreDbErrorKind, StoreError};
pub use record::{Download, DownloadStatus, NewDownload, TEMP_SUFFIX, temp_path_for};
pub use repository::DownloadRepository;

use std::path::Path;
use std::time::Duration;

use sqlx::{Row, Sqlite, Transaction};
use tracing::{debug, instrument};

use crate::db::Database;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Sentinel persisted while the total size is unknown.
const UNKNOWN_SIZE: i64 = -1;

/// Returns `Ok(())` if at least one row was affected; otherwise [`StoreError::NotFound`].
fn check_affected(id: i64, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(StoreError::NotFound(id))
    } else {
        Ok(())
    }
}

fn check_chunk_affected(id: i64, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(StoreError::ChunkNotFound(id))
    } else {
        Ok(())
    }
}

/// Converts a byte count to the signed representation `SQLite` stores.
fn to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// `?, ?, ?` with one placeholder per status.
fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Store for downloads and chunks.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    /// Creates a store over the given database connection.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the underlying database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    // ==================== Downloads ====================

    /// Creates a download in `pending` status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails, including a
    /// constraint violation when the content hash already exists.
    #[instrument(skip(self, new), fields(hash = %new.content_hash, url = %new.download_url))]
    pub async fn create(&self, new: &NewDownload) -> Result<i64> {
        let size = new.size.map_or(UNKNOWN_SIZE, to_db);
        let file_path = new.file_path.to_string_lossy().into_owned();
        let temp_path = temp_path_for(&new.file_path)
            .to_string_lossy()
            .into_owned();
        let mirrors = Download::serialize_mirrors(&new.mirror_urls);

        let row = sqlx::query(
            r"INSERT INTO downloads (
                content_hash,
                title,
                source_ref,
                download_url,
                mirror_urls,
                size,
                file_path,
                temp_path,
                status,
                priority
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
              RETURNING id",
        )
        .bind(new.content_hash.trim().to_ascii_lowercase())
        .bind(new.title.as_deref())
        .bind(new.source_ref.as_deref())
        .bind(&new.download_url)
        .bind(mirrors)
        .bind(size)
        .bind(file_path)
        .bind(temp_path)
        .bind(DownloadStatus::Pending.as_str())
        .bind(new.priority)
        .fetch_one(self.db.pool())
        .await?;

        Ok(row.get("id"))
    }

    /// Gets a download by ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> Result<Option<Download>> {
        let download = sqlx::query_as::<_, Download>(r"SELECT * FROM downloads WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(download)
    }

    /// Gets a download by ID, treating absence as an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no row exists.
    pub async fn require(&self, id: i64) -> Result<Download> {
        self.get(id).await?.ok_or(StoreError::NotFound(id))
    }

    /// Gets a download by its content hash (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_by_hash(&self, content_hash: &str) -> Result<Option<Download>> {
        let download =
            sqlx::query_as::<_, Download>(r"SELECT * FROM downloads WHERE content_hash = ?")
                .bind(content_hash.trim().to_ascii_lowercase())
                .fetch_optional(self.db.pool())
                .await?;

        Ok(download)
    }

    /// Lists downloads, most recently updated first.
    ///
    /// With a status, only that status is returned. Without one, completed
    /// downloads are included only when `include_terminal` is set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        status: Option<DownloadStatus>,
        include_terminal: bool,
    ) -> Result<Vec<Download>> {
        let query = match status {
            Some(status) => sqlx::query_as::<_, Download>(
                r"SELECT * FROM downloads WHERE status = ? ORDER BY updated_at DESC, id DESC",
            )
            .bind(status.as_str()),
            None if include_terminal => sqlx::query_as::<_, Download>(
                r"SELECT * FROM downloads ORDER BY updated_at DESC, id DESC",
            ),
            None => sqlx::query_as::<_, Download>(
                r"SELECT * FROM downloads WHERE status != ? ORDER BY updated_at DESC, id DESC",
            )
            .bind(DownloadStatus::Completed.as_str()),
        };

        Ok(query.fetch_all(self.db.pool()).await?)
    }

    /// Lists downloads a batch resume should pick up: pending, paused and
    /// failed, highest priority first, then oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_resumable(&self) -> Result<Vec<Download>> {
        let downloads = sqlx::query_as::<_, Download>(
            r"SELECT * FROM downloads
              WHERE status IN (?, ?, ?)
              ORDER BY priority DESC, created_at ASC, id ASC",
        )
        .bind(DownloadStatus::Pending.as_str())
        .bind(DownloadStatus::Paused.as_str())
        .bind(DownloadStatus::Failed.as_str())
        .fetch_all(self.db.pool())
        .await?;

        Ok(downloads)
    }

    /// Moves a download to `status`, recording `error` (or clearing it).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] if the current status may not
    /// move to `status`, [`StoreError::NotFound`] if the row does not exist.
    #[instrument(skip(self, error))]
    pub async fn update_status(
        &self,
        id: i64,
        status: DownloadStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let sources = status.allowed_sources();
        let sql = format!(
            r"UPDATE downloads
              SET status = ?,
                  error_message = ?,
                  heartbeat_at = CASE WHEN ? THEN datetime('now') ELSE NULL END,
                  updated_at = datetime('now')
              WHERE id = ? AND status IN ({})",
            placeholders(sources.len())
        );

        let mut query = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(error)
            .bind(status == DownloadStatus::Downloading)
            .bind(id);
        for source in sources {
            query = query.bind(source.as_str());
        }
        let result = query.execute(self.db.pool()).await?;

        if result.rows_affected() == 0 {
            return Err(self.explain_unchanged(id, status).await);
        }
        debug!(status = %status, "status updated");
        Ok(())
    }

    /// Builds the error for a guarded update that matched no row.
    async fn explain_unchanged(&self, id: i64, to: DownloadStatus) -> StoreError {
        match self.get(id).await {
            Ok(Some(current)) => StoreError::InvalidTransition {
                id,
                from: current.status(),
                to,
            },
            Ok(None) => StoreError::NotFound(id),
            Err(e) => e,
        }
    }

    /// Records aggregate progress for a download without touching chunks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no row exists.
    #[instrument(skip(self))]
    pub async fn update_progress(&self, id: i64, downloaded_size: u64) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE downloads
              SET downloaded_size = ?, updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(to_db(downloaded_size))
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Records a probed total size.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no row exists.
    #[instrument(skip(self))]
    pub async fn update_size(&self, id: i64, size: u64) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE downloads SET size = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(to_db(size))
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Records the URL that served a successful transfer.
    ///
    /// The primary `download_url` is left untouched, so later runs still
    /// start from it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no row exists.
    #[instrument(skip(self))]
    pub async fn record_served_url(&self, id: i64, url: &str) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE downloads SET served_url = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(url)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Refreshes the liveness mark of a running download.
    ///
    /// Returns false when the row is no longer `downloading`, for example
    /// because another process paused it; nothing is written then.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self), level = "trace")]
    pub async fn heartbeat(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r"UPDATE downloads SET heartbeat_at = datetime('now') WHERE id = ? AND status = ?",
        )
        .bind(id)
        .bind(DownloadStatus::Downloading.as_str())
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Marks a download completed at `final_path`.
    ///
    /// Clears the temp path and error, stamps the completion time, and sets
    /// the aggregate progress to the full size when it is known.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] unless the download is
    /// downloading or paused.
    #[instrument(skip(self, final_path), fields(path = %final_path.display()))]
    pub async fn mark_completed(&self, id: i64, final_path: &Path) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE downloads
              SET status = ?,
                  file_path = ?,
                  temp_path = NULL,
                  error_message = NULL,
                  downloaded_size = CASE WHEN size >= 0 THEN size ELSE downloaded_size END,
                  completed_at = datetime('now'),
                  heartbeat_at = NULL,
                  updated_at = datetime('now')
              WHERE id = ? AND status IN (?, ?)",
        )
        .bind(DownloadStatus::Completed.as_str())
        .bind(final_path.to_string_lossy().into_owned())
        .bind(id)
        .bind(DownloadStatus::Downloading.as_str())
        .bind(DownloadStatus::Paused.as_str())
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.explain_unchanged(id, DownloadStatus::Completed).await);
        }
        Ok(())
    }

    /// Increments the retry counter and returns the new value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no row exists.
    #[instrument(skip(self))]
    pub async fn increment_retry(&self, id: i64) -> Result<i64> {
        let row = sqlx::query(
            r"UPDATE downloads
              SET retry_count = retry_count + 1, updated_at = datetime('now')
              WHERE id = ?
              RETURNING retry_count",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|r| r.get("retry_count"))
            .ok_or(StoreError::NotFound(id))
    }

    /// Records the outcome of checksum verification.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no row exists.
    #[instrument(skip(self))]
    pub async fn mark_verified(&self, id: i64, verified: bool) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE downloads SET verified = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(verified)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Resets a download for an explicit restart.
    ///
    /// Zeroes progress and retries, clears the error, verified flag and
    /// completion stamp, restores the temp path, sets `pending`, and deletes
    /// every chunk, all in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] while the download is
    /// downloading, [`StoreError::NotFound`] if no row exists.
    #[instrument(skip(self))]
    pub async fn reset(&self, id: i64) -> Result<()> {
        let sources = DownloadStatus::Pending.allowed_sources();
        let sql = format!(
            r"UPDATE downloads
              SET status = ?,
                  downloaded_size = 0,
                  retry_count = 0,
                  error_message = NULL,
                  verified = 0,
                  completed_at = NULL,
                  served_url = NULL,
                  temp_path = file_path || ?,
                  updated_at = datetime('now')
              WHERE id = ? AND status IN ({})",
            placeholders(sources.len())
        );

        let mut tx = self.db.pool().begin().await?;

        let mut query = sqlx::query(&sql)
            .bind(DownloadStatus::Pending.as_str())
            .bind(TEMP_SUFFIX)
            .bind(id);
        for source in sources {
            query = query.bind(source.as_str());
        }
        let result = query.execute(&mut *tx).await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.explain_unchanged(id, DownloadStatus::Pending).await);
        }

        let deleted = sqlx::query(r"DELETE FROM chunks WHERE download_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(chunks_deleted = deleted.rows_affected(), "download reset");
        Ok(())
    }

    /// Returns a paused or failed download to `pending` while keeping its
    /// chunks and progress, so the next start continues where it left off.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] for other statuses.
    #[instrument(skip(self))]
    pub async fn requeue(&self, id: i64) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE downloads
              SET status = ?, error_message = NULL, updated_at = datetime('now')
              WHERE id = ? AND status IN (?, ?, ?)",
        )
        .bind(DownloadStatus::Pending.as_str())
        .bind(id)
        .bind(DownloadStatus::Pending.as_str())
        .bind(DownloadStatus::Paused.as_str())
        .bind(DownloadStatus::Failed.as_str())
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.explain_unchanged(id, DownloadStatus::Pending).await);
        }
        Ok(())
    }

    /// Deletes a download; its chunks go with it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no row exists.
    #[instrument(skip(self))]
    pub async fn delete_download(&self, id: i64) -> Result<()> {
        let result = sqlx::query(r"DELETE FROM downloads WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        check_affected(id, result.rows_affected())
    }

    /// Moves downloads left `downloading` by a dead process to `paused`.
    ///
    /// A running download refreshes `heartbeat_at` periodically; only rows
    /// whose last heartbeat is at least `stale_after` old (or missing) are
    /// recovered, so a download another process is still running keeps its
    /// status.
    ///
    /// # Returns
    ///
    /// The number of downloads recovered.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn recover_interrupted(&self, stale_after: Duration) -> Result<u64> {
        let cutoff = format!("-{} seconds", stale_after.as_secs());
        let result = sqlx::query(
            r"UPDATE downloads
              SET status = ?, heartbeat_at = NULL, updated_at = datetime('now')
              WHERE status = ?
                AND (heartbeat_at IS NULL OR heartbeat_at <= datetime('now', ?))",
        )
        .bind(DownloadStatus::Paused.as_str())
        .bind(DownloadStatus::Downloading.as_str())
        .bind(cutoff)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }

    // ==================== Chunks ====================

    /// Persists a chunk plan in one transaction and returns the rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if any insert fails; nothing is
    /// persisted in that case.
    #[instrument(skip(self, plan), fields(chunks = plan.len()))]
    pub async fn create_chunks(&self, download_id: i64, plan: &[PlannedChunk]) -> Result<Vec<Chunk>> {
        let mut tx = self.db.pool().begin().await?;
        insert_chunks(&mut tx, download_id, plan).await?;
        tx.commit().await?;

        self.get_chunks(download_id).await
    }

    /// Replaces a download's plan after its size changed.
    ///
    /// Deletes the old chunks, records the new size with zero progress, and
    /// inserts the new plan, all in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no row exists.
    #[instrument(skip(self, plan), fields(chunks = plan.len()))]
    pub async fn replace_plan(
        &self,
        download_id: i64,
        size: u64,
        plan: &[PlannedChunk],
    ) -> Result<Vec<Chunk>> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(r"DELETE FROM chunks WHERE download_id = ?")
            .bind(download_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            r"UPDATE downloads
              SET size = ?, downloaded_size = 0, updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(to_db(size))
        .bind(download_id)
        .execute(&mut *tx)
        .await?;
        check_affected(download_id, result.rows_affected())?;

        insert_chunks(&mut tx, download_id, plan).await?;
        tx.commit().await?;

        self.get_chunks(download_id).await
    }

    /// Returns every chunk of a download, ordered by index.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_chunks(&self, download_id: i64) -> Result<Vec<Chunk>> {
        let chunks = sqlx::query_as::<_, Chunk>(
            r"SELECT * FROM chunks WHERE download_id = ? ORDER BY chunk_index ASC",
        )
        .bind(download_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(chunks)
    }

    /// Returns chunks not yet completed, ordered by index.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_incomplete_chunks(&self, download_id: i64) -> Result<Vec<Chunk>> {
        let chunks = sqlx::query_as::<_, Chunk>(
            r"SELECT * FROM chunks
              WHERE download_id = ? AND status != ?
              ORDER BY chunk_index ASC",
        )
        .bind(download_id)
        .bind(ChunkStatus::Completed.as_str())
        .fetch_all(self.db.pool())
        .await?;

        Ok(chunks)
    }

    /// Gets one chunk by row id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ChunkNotFound`] if no row exists.
    #[instrument(skip(self))]
    pub async fn get_chunk(&self, chunk_id: i64) -> Result<Chunk> {
        sqlx::query_as::<_, Chunk>(r"SELECT * FROM chunks WHERE id = ?")
            .bind(chunk_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(StoreError::ChunkNotFound(chunk_id))
    }

    /// Records one chunk's written bytes, leaving the parent untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ChunkNotFound`] if no row exists.
    #[instrument(skip(self))]
    pub async fn update_chunk_progress(&self, chunk_id: i64, downloaded: u64) -> Result<()> {
        let result = sqlx::query(r"UPDATE chunks SET downloaded = ? WHERE id = ?")
            .bind(to_db(downloaded))
            .bind(chunk_id)
            .execute(self.db.pool())
            .await?;

        check_chunk_affected(chunk_id, result.rows_affected())
    }

    /// Records a chunk's written bytes and the parent's aggregate bytes in
    /// one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ChunkNotFound`] / [`StoreError::NotFound`] when
    /// either row is missing; neither write is kept in that case.
    #[instrument(skip(self))]
    pub async fn update_progress_atomic(
        &self,
        chunk_id: i64,
        chunk_downloaded: u64,
        download_id: i64,
        downloaded_size: u64,
    ) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        let chunk = sqlx::query(r"UPDATE chunks SET downloaded = ? WHERE id = ? AND download_id = ?")
            .bind(to_db(chunk_downloaded))
            .bind(chunk_id)
            .bind(download_id)
            .execute(&mut *tx)
            .await?;
        check_chunk_affected(chunk_id, chunk.rows_affected())?;

        let download = sqlx::query(
            r"UPDATE downloads
              SET downloaded_size = ?, updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(to_db(downloaded_size))
        .bind(download_id)
        .execute(&mut *tx)
        .await?;
        check_affected(download_id, download.rows_affected())?;

        tx.commit().await?;
        Ok(())
    }

    /// Marks a chunk completed; its `downloaded` becomes its full length.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ChunkNotFound`] if no row exists.
    #[instrument(skip(self))]
    pub async fn mark_chunk_completed(&self, chunk_id: i64) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE chunks
              SET status = ?, downloaded = end_byte - start_byte + 1
              WHERE id = ?",
        )
        .bind(ChunkStatus::Completed.as_str())
        .bind(chunk_id)
        .execute(self.db.pool())
        .await?;

        check_chunk_affected(chunk_id, result.rows_affected())
    }

    /// Deletes every chunk of a download.
    ///
    /// # Returns
    ///
    /// The number of chunks deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn delete_chunks(&self, download_id: i64) -> Result<u64> {
        let result = sqlx::query(r"DELETE FROM chunks WHERE download_id = ?")
            .bind(download_id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected())
    }
}

async fn insert_chunks(
    tx: &mut Transaction<'_, Sqlite>,
    download_id: i64,
    plan: &[PlannedChunk],
) -> Result<()> {
    for planned in plan {
        sqlx::query(
            r"INSERT INTO chunks (download_id, chunk_index, start_byte, end_byte, downloaded, status)
              VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(download_id)
        .bind(i64::from(planned.index))
        .bind(to_db(planned.start))
        .bind(to_db(planned.end))
        .bind(ChunkStatus::Pending.as_str())
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}
