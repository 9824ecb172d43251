//! Repository seam for the persistence operations the engine depends on.
//!
//! The orchestrator and fetcher talk to this trait instead of [`Store`]
//! directly, so a test can wrap a store and inject failures or observe
//! checkpoints.

use std::path::Path;

use async_trait::async_trait;

use super::{Chunk, Download, DownloadStatus, PlannedChunk, Result, Store};

/// Data-access contract for the download engine.
#[async_trait]
pub trait DownloadRepository: Send + Sync {
    /// Reads a download, failing if it does not exist.
    async fn require(&self, id: i64) -> Result<Download>;

    /// Moves a download to a new status.
    async fn update_status(&self, id: i64, status: DownloadStatus, error: Option<&str>)
    -> Result<()>;

    /// Records a probed size.
    async fn update_size(&self, id: i64, size: u64) -> Result<()>;

    /// Records aggregate progress only.
    async fn update_progress(&self, id: i64, downloaded_size: u64) -> Result<()>;

    /// Records the URL that served a successful transfer.
    async fn record_served_url(&self, id: i64, url: &str) -> Result<()>;

    /// Refreshes the liveness mark; false once the row stopped `downloading`.
    async fn heartbeat(&self, id: i64) -> Result<bool>;

    /// Marks a download completed at its final path.
    async fn mark_completed(&self, id: i64, final_path: &Path) -> Result<()>;

    /// Bumps the retry counter.
    async fn increment_retry(&self, id: i64) -> Result<i64>;

    /// Zeroes progress, clears chunks and returns the download to pending.
    async fn reset(&self, id: i64) -> Result<()>;

    /// Persists a new chunk plan.
    async fn create_chunks(&self, download_id: i64, plan: &[PlannedChunk]) -> Result<Vec<Chunk>>;

    /// Replaces a plan after the size changed.
    async fn replace_plan(
        &self,
        download_id: i64,
        size: u64,
        plan: &[PlannedChunk],
    ) -> Result<Vec<Chunk>>;

    /// Reads all chunks of a download.
    async fn get_chunks(&self, download_id: i64) -> Result<Vec<Chunk>>;

    /// Reads one chunk.
    async fn get_chunk(&self, chunk_id: i64) -> Result<Chunk>;

    /// Checkpoints chunk and aggregate progress together.
    async fn update_progress_atomic(
        &self,
        chunk_id: i64,
        chunk_downloaded: u64,
        download_id: i64,
        downloaded_size: u64,
    ) -> Result<()>;

    /// Marks a chunk completed.
    async fn mark_chunk_completed(&self, chunk_id: i64) -> Result<()>;

    /// Drops a stale chunk plan.
    async fn delete_chunks(&self, download_id: i64) -> Result<u64>;
}

#[async_trait]
impl DownloadRepository for Store {
    async fn require(&self, id: i64) -> Result<Download> {
        Store::require(self, id).await
    }

    async fn update_status(
        &self,
        id: i64,
        status: DownloadStatus,
        error: Option<&str>,
    ) -> Result<()> {
        Store::update_status(self, id, status, error).await
    }

    async fn update_size(&self, id: i64, size: u64) -> Result<()> {
        Store::update_size(self, id, size).await
    }

    async fn update_progress(&self, id: i64, downloaded_size: u64) -> Result<()> {
        Store::update_progress(self, id, downloaded_size).await
    }

    async fn record_served_url(&self, id: i64, url: &str) -> Result<()> {
        Store::record_served_url(self, id, url).await
    }

    async fn heartbeat(&self, id: i64) -> Result<bool> {
        Store::heartbeat(self, id).await
    }

    async fn mark_completed(&self, id: i64, final_path: &Path) -> Result<()> {
        Store::mark_completed(self, id, final_path).await
    }

    async fn increment_retry(&self, id: i64) -> Result<i64> {
        Store::increment_retry(self, id).await
    }

    async fn reset(&self, id: i64) -> Result<()> {
        Store::reset(self, id).await
    }

    async fn create_chunks(&self, download_id: i64, plan: &[PlannedChunk]) -> Result<Vec<Chunk>> {
        Store::create_chunks(self, download_id, plan).await
    }

    async fn replace_plan(
        &self,
        download_id: i64,
        size: u64,
        plan: &[PlannedChunk],
    ) -> Result<Vec<Chunk>> {
        Store::replace_plan(self, download_id, size, plan).await
    }

    async fn get_chunks(&self, download_id: i64) -> Result<Vec<Chunk>> {
        Store::get_chunks(self, download_id).await
    }

    async fn get_chunk(&self, chunk_id: i64) -> Result<Chunk> {
        Store::get_chunk(self, chunk_id).await
    }

    async fn update_progress_atomic(
        &self,
        chunk_id: i64,
        chunk_downloaded: u64,
        download_id: i64,
        downloaded_size: u64,
    ) -> Result<()> {
        Store::update_progress_atomic(self, chunk_id, chunk_downloaded, download_id, downloaded_size)
            .await
    }

    async fn mark_chunk_completed(&self, chunk_id: i64) -> Result<()> {
        Store::mark_chunk_completed(self, chunk_id).await
    }

    async fn delete_chunks(&self, download_id: i64) -> Result<u64> {
        Store::delete_chunks(self, download_id).await
    }
}
