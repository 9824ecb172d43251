//! Drives one download from probe to rename, and supports pause, resume
//! and restart.
//!
//! # Lifecycle
//!
//! ```text
//! Pending ──start──► Downloading ──► Completed
//!    ▲                  │   │
//!    │                  │   └──► Failed ──restart──┐
//!    │                  ▼                          │
//!    │               Paused ──start (resume)──► Downloading
//!    └─────────────────────────────────────────────┘
//! ```
//!
//! Resume is a second `start` over the same rows: completed chunks are
//! skipped and a partial chunk continues from its last checkpoint.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::OpenOptions;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::cancel::CancelScope;
use super::client::HttpClient;
use super::constants::{
    DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_CHUNK_SIZE, DEFAULT_DOWNLOAD_TIMEOUT_SECS,
    HEARTBEAT_INTERVAL_SECS,
};
use super::error::{CancelReason, DownloadError};
use super::fetcher::{self, FetchContext};
use super::planner::{TransferMode, plan_transfer};
use super::registry::ActiveDownloads;
use super::retry::{RetryConfig, retry_operation};
use crate::store::{Chunk, Download, DownloadRepository, DownloadStatus, PlannedChunk, StoreError};

/// Tunables for a single download run.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    /// Bytes per planned chunk.
    pub chunk_size: u64,
    /// Bytes written between persisted checkpoints.
    pub checkpoint_interval: u64,
    /// Retry policy for probes and transfers.
    pub retry: RetryConfig,
    /// Overall limit for one run, independent of retry timing.
    pub download_timeout: Duration,
    /// How often a running download refreshes its liveness mark.
    pub heartbeat_interval: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            retry: RetryConfig::default(),
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
        }
    }
}

/// How a run ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The file is at `path` and the row is completed.
    Completed {
        /// Final destination.
        path: PathBuf,
        /// File size in bytes.
        bytes: u64,
    },
    /// Paused or timed out; the row is paused with its progress kept.
    Cancelled(CancelReason),
}

/// Runs downloads one at a time per id.
pub struct Orchestrator {
    repo: Arc<dyn DownloadRepository>,
    client: HttpClient,
    settings: OrchestratorSettings,
    active: ActiveDownloads,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("settings", &self.settings)
            .field("active", &self.active.active_ids())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator over `repo`.
    #[must_use]
    pub fn new(
        repo: Arc<dyn DownloadRepository>,
        client: HttpClient,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            repo,
            client,
            settings,
            active: ActiveDownloads::new(),
        }
    }

    /// Registry of running downloads.
    #[must_use]
    pub fn active(&self) -> &ActiveDownloads {
        &self.active
    }

    /// Settings applied to every run.
    #[must_use]
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Runs a download against its primary URL only.
    ///
    /// On failure the row stays `downloading`; the caller decides whether to
    /// try elsewhere or call [`Self::mark_failed`]. Pause and timeout return
    /// [`DownloadOutcome::Cancelled`] with the row `paused`.
    ///
    /// # Errors
    ///
    /// Returns the unrecovered [`DownloadError`], or
    /// [`DownloadError::AlreadyActive`] if the id is already running.
    #[instrument(skip(self))]
    pub async fn start(&self, id: i64) -> Result<DownloadOutcome, DownloadError> {
        self.drive(id, false).await
    }

    /// Runs a download over its primary URL then each mirror in order.
    ///
    /// Remote failures (rejections, exhausted retries, HTML pages) move on to
    /// the next URL; local failures stop the walk. When every URL fails the
    /// row is marked `failed` with the last error.
    ///
    /// # Errors
    ///
    /// Returns the last [`DownloadError`].
    #[instrument(skip(self))]
    pub async fn download_with_mirrors(&self, id: i64) -> Result<DownloadOutcome, DownloadError> {
        self.drive(id, true).await
    }

    /// Pauses a download and sets its status `paused`.
    ///
    /// A run in this process is cancelled first; the call waits for it to
    /// flush its last checkpoint and unregister. A row left `downloading`
    /// without a local run (a dead process, or a live one sharing the
    /// database, which stops at its next heartbeat) is marked `paused`
    /// directly. Pending, paused, failed and completed downloads keep their
    /// status, since the state machine has no edge from them to `paused`.
    ///
    /// Returns false when there was nothing to pause.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Store`] if the download does not exist or its
    /// status cannot be read or set.
    #[instrument(skip(self))]
    pub async fn pause(&self, id: i64) -> Result<bool, DownloadError> {
        let was_running = self.active.cancel(id);
        if was_running {
            self.active.wait_released(id).await;
        }

        let paused_row = if self.repo.require(id).await?.status() == DownloadStatus::Downloading {
            self.repo
                .update_status(id, DownloadStatus::Paused, None)
                .await?;
            true
        } else {
            false
        };

        if was_running || paused_row {
            info!(was_running, "download paused");
            Ok(true)
        } else {
            debug!("pause requested for an idle download");
            Ok(false)
        }
    }

    /// Resets a download (progress, chunks, error) and runs it again.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::AlreadyActive`] while it is running, or any
    /// error from the new run.
    #[instrument(skip(self))]
    pub async fn restart(&self, id: i64) -> Result<DownloadOutcome, DownloadError> {
        if self.active.is_active(id) {
            return Err(DownloadError::AlreadyActive { id });
        }
        self.repo.reset(id).await?;
        info!("download reset");
        self.download_with_mirrors(id).await
    }

    /// Marks a download failed, keeping the error text for display.
    ///
    /// Best effort: a failure to record the status is logged.
    pub async fn mark_failed(&self, id: i64, error: &DownloadError) {
        if let Err(e) = self
            .repo
            .update_status(id, DownloadStatus::Failed, Some(&error.to_string()))
            .await
        {
            warn!(download_id = id, error = %e, "failed to mark download failed");
        }
    }

    async fn drive(&self, id: i64, with_mirrors: bool) -> Result<DownloadOutcome, DownloadError> {
        // Held until every status write below is done, so `pause` observes them.
        let guard = self.active.register(id)?;
        let scope =
            CancelScope::new(guard.token()).with_timeout(self.settings.download_timeout);

        let download = self.repo.require(id).await?;
        self.repo
            .update_status(id, DownloadStatus::Downloading, None)
            .await?;

        let urls = if with_mirrors {
            download.candidate_urls()
        } else {
            vec![download.download_url.clone()]
        };
        info!(urls = urls.len(), hash = %download.content_hash, "download started");

        let result = self.walk_with_heartbeat(&scope, id, &urls).await;
        match result {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                if let Some(reason) = error.cancel_reason() {
                    self.record_cancel(id, reason).await;
                    return Ok(DownloadOutcome::Cancelled(reason));
                }
                if with_mirrors {
                    self.mark_failed(id, &error).await;
                }
                Err(error)
            }
        }
    }

    /// Walks `urls` while refreshing the row's liveness mark, so another
    /// process does not mistake this run for one left by a crash. A row
    /// paused by another process cancels the run at the next tick.
    async fn walk_with_heartbeat(
        &self,
        scope: &CancelScope,
        id: i64,
        urls: &[String],
    ) -> Result<DownloadOutcome, DownloadError> {
        let walk = self.walk_urls(scope, id, urls);
        tokio::pin!(walk);

        let period = self.settings.heartbeat_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = &mut walk => return result,
                _ = ticker.tick() => match self.repo.heartbeat(id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        info!(download_id = id, "download paused elsewhere, stopping");
                        scope.token().cancel();
                    }
                    Err(e) => warn!(download_id = id, error = %e, "failed to refresh heartbeat"),
                },
            }
        }
    }

    async fn walk_urls(
        &self,
        scope: &CancelScope,
        id: i64,
        urls: &[String],
    ) -> Result<DownloadOutcome, DownloadError> {
        let mut last_error = None;
        for (position, url) in urls.iter().enumerate() {
            match self.attempt(scope, id, url).await {
                Ok(outcome) => return Ok(outcome),
                Err(error) if !error.allows_next_mirror() => return Err(error),
                Err(error) => {
                    if position + 1 < urls.len() {
                        warn!(
                            url = %url,
                            failure = %error.failure_kind(),
                            error = %error,
                            "url failed, trying next mirror"
                        );
                    }
                    last_error = Some(error);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| DownloadError::invalid_url("")))
    }

    #[instrument(skip(self, scope))]
    async fn attempt(
        &self,
        scope: &CancelScope,
        id: i64,
        url: &str,
    ) -> Result<DownloadOutcome, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let download = self.repo.require(id).await?;
        let probe = retry_operation(scope, &self.settings.retry, |_| {
            self.client.probe(url, scope)
        })
        .await?;

        let temp = download.temp_file();
        let bytes = match plan_transfer(probe, self.settings.chunk_size) {
            TransferMode::Chunked { size, plan } => {
                debug!(size, chunks = plan.len(), "chunked transfer");
                self.run_chunked(scope, &download, url, &temp, size, &plan)
                    .await?
            }
            TransferMode::Simple { size } => {
                debug!(?size, "simple transfer");
                self.run_simple(scope, id, url, &temp).await?
            }
        };

        let destination = download.destination();
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }
        tokio::fs::rename(&temp, &destination)
            .await
            .map_err(|e| DownloadError::io(&destination, e))?;
        self.repo.record_served_url(id, url).await?;
        self.repo.mark_completed(id, &destination).await?;

        info!(path = %destination.display(), bytes, "download completed");
        Ok(DownloadOutcome::Completed {
            path: destination,
            bytes,
        })
    }

    async fn run_chunked(
        &self,
        scope: &CancelScope,
        download: &Download,
        url: &str,
        temp: &Path,
        size: u64,
        plan: &[PlannedChunk],
    ) -> Result<u64, DownloadError> {
        let id = download.id;
        let existing = self.repo.get_chunks(id).await?;
        let temp_len = tokio::fs::metadata(temp).await.map(|m| m.len()).ok();

        let same_plan = existing.iter().map(Chunk::planned).eq(plan.iter().copied());
        let has_progress = existing.iter().any(|c| c.progress_bytes() > 0);
        let replan = existing.is_empty()
            || !same_plan
            || download.known_size() != Some(size)
            || (has_progress && temp_len != Some(size));

        if replan {
            if !existing.is_empty() {
                info!(
                    old_chunks = existing.len(),
                    new_chunks = plan.len(),
                    size,
                    "persisted plan no longer matches, re-planning"
                );
            }
            self.repo.replace_plan(id, size, plan).await?;
        }
        prepare_temp_file(temp, size, replan).await?;

        let ctx = self.fetch_context(scope);
        let chunks = self.repo.get_chunks(id).await?;
        for chunk in chunks.iter().filter(|c| !c.is_completed()) {
            let chunk_id = chunk.id;
            retry_operation(scope, &self.settings.retry, |attempt| {
                self.fetch_chunk_attempt(ctx, id, chunk_id, url, temp, attempt)
            })
            .await?;
        }
        Ok(size)
    }

    async fn run_simple(
        &self,
        scope: &CancelScope,
        id: i64,
        url: &str,
        temp: &Path,
    ) -> Result<u64, DownloadError> {
        let dropped = self.repo.delete_chunks(id).await?;
        if dropped > 0 {
            info!(chunks = dropped, "server no longer supports ranges, dropping chunk plan");
        }

        let ctx = self.fetch_context(scope);
        retry_operation(scope, &self.settings.retry, |attempt| {
            self.fetch_whole_attempt(ctx, id, url, temp, attempt)
        })
        .await
    }

    async fn fetch_chunk_attempt(
        &self,
        ctx: FetchContext<'_>,
        id: i64,
        chunk_id: i64,
        url: &str,
        temp: &Path,
        attempt: u32,
    ) -> Result<(), DownloadError> {
        if attempt > 0 {
            self.repo.increment_retry(id).await?;
        }
        fetcher::fetch_chunk(ctx, id, chunk_id, url, temp).await
    }

    async fn fetch_whole_attempt(
        &self,
        ctx: FetchContext<'_>,
        id: i64,
        url: &str,
        temp: &Path,
        attempt: u32,
    ) -> Result<u64, DownloadError> {
        if attempt > 0 {
            self.repo.increment_retry(id).await?;
        }
        let download = self.repo.require(id).await?;
        fetcher::fetch_whole(ctx, &download, url, temp).await
    }

    fn fetch_context<'a>(&'a self, scope: &'a CancelScope) -> FetchContext<'a> {
        FetchContext {
            repo: self.repo.as_ref(),
            client: &self.client,
            scope,
            checkpoint_interval: self.settings.checkpoint_interval.max(1),
        }
    }

    async fn record_cancel(&self, id: i64, reason: CancelReason) {
        let note = match reason {
            CancelReason::Requested => None,
            CancelReason::TimedOut => Some("download timed out"),
        };
        match self
            .repo
            .update_status(id, DownloadStatus::Paused, note)
            .await
        {
            Ok(()) => info!(download_id = id, %reason, "download stopped, progress kept"),
            Err(StoreError::InvalidTransition { .. }) => {}
            Err(e) => warn!(download_id = id, error = %e, "failed to record pause"),
        }
    }
}

/// Creates (or truncates, after a re-plan) the temp file at its final size.
async fn prepare_temp_file(temp: &Path, size: u64, fresh: bool) -> Result<(), DownloadError> {
    if let Some(parent) = temp.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::io(parent, e))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(fresh)
        .open(temp)
        .await
        .map_err(|e| DownloadError::io(temp, e))?;
    let current = file
        .metadata()
        .await
        .map_err(|e| DownloadError::io(temp, e))?
        .len();
    if current != size {
        file.set_len(size)
            .await
            .map_err(|e| DownloadError::io(temp, e))?;
    }
    Ok(())
}
