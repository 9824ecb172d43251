//! Download engine: one handle over the store, orchestrator, scheduler and
//! verifier.
//!
//! # Example
//!
//! ```no_run
//! use chunkdl::config::EngineConfig;
//! use chunkdl::download::DownloadEngine;
//! use chunkdl::store::{NewDownload, Store};
//! use chunkdl::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::new(Database::new(Path::new("chunkdl.db")).await?);
//! let engine = DownloadEngine::from_config(store, &EngineConfig::default())?;
//!
//! let (id, _created) = engine
//!     .add(&NewDownload::new(
//!         "9e107d9d372bb6826bd81d3542a419d6",
//!         "https://example.com/a.iso",
//!         "/data/a.iso",
//!     ))
//!     .await?;
//! engine.download(id).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use super::client::HttpClient;
use super::constants::STALE_HEARTBEAT_SECS;
use super::error::DownloadError;
use super::orchestrator::{DownloadOutcome, Orchestrator, OrchestratorSettings};
use super::scheduler::{BatchReport, InvalidConcurrency, Scheduler, SchedulerEvent};
use super::verify::{Verifier, VerifyOutcome};
use crate::config::{ConfigError, EngineConfig};
use crate::store::{DownloadStatus, NewDownload, Store, StoreError};

/// Error type for engine setup and batch operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Worker budget out of range.
    #[error(transparent)]
    InvalidConcurrency(#[from] InvalidConcurrency),

    /// Configuration rejected.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Download operation failed.
    #[error(transparent)]
    Download(#[from] DownloadError),
}

/// Engine facade used by the CLI and by embedding applications.
#[derive(Debug, Clone)]
pub struct DownloadEngine {
    store: Store,
    orchestrator: Arc<Orchestrator>,
    scheduler: Scheduler,
    verifier: Verifier,
}

impl DownloadEngine {
    /// Creates an engine over `store`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if `max_concurrent` is
    /// outside `1..=32`.
    pub fn new(
        store: Store,
        client: HttpClient,
        settings: OrchestratorSettings,
        max_concurrent: usize,
    ) -> Result<Self, EngineError> {
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(store.clone()),
            client,
            settings,
        ));
        let scheduler = Scheduler::new(Arc::clone(&orchestrator), max_concurrent)?;
        let verifier = Verifier::new(store.clone(), Arc::clone(&orchestrator));
        debug!(max_concurrent, "download engine ready");

        Ok(Self {
            store,
            orchestrator,
            scheduler,
            verifier,
        })
    }

    /// Creates an engine from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] for invalid values, or
    /// [`EngineError::Download`] if the HTTP client cannot be built.
    pub fn from_config(store: Store, config: &EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let client = HttpClient::new(
            config.connect_timeout_secs,
            config.read_timeout_secs,
            &config.user_agent,
        )?;
        Self::new(
            store,
            client,
            config.orchestrator_settings(),
            config.max_concurrent,
        )
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The orchestrator shared by every batch.
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// The scheduler's worker budget.
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.scheduler.max_concurrent()
    }

    /// Registers a download, or returns the existing one with the same
    /// content hash.
    ///
    /// Returns the id and whether a new row was created.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the lookup or insert fails.
    #[instrument(skip(self, new), fields(hash = %new.content_hash))]
    pub async fn add(&self, new: &NewDownload) -> Result<(i64, bool), EngineError> {
        if let Some(existing) = self.store.get_by_hash(&new.content_hash).await? {
            info!(download_id = existing.id, "download already registered");
            return Ok((existing.id, false));
        }
        let id = self.store.create(new).await?;
        info!(download_id = id, "download registered");
        Ok((id, true))
    }

    /// Runs one download over its primary URL and mirrors.
    ///
    /// # Errors
    ///
    /// Returns the last [`DownloadError`] when every URL failed.
    pub async fn download(&self, id: i64) -> Result<DownloadOutcome, DownloadError> {
        self.orchestrator.download_with_mirrors(id).await
    }

    /// Pauses a download left `downloading`, cancelling it if it runs here.
    /// Returns false when there was nothing to pause.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Store`] if the status cannot be recorded.
    pub async fn pause(&self, id: i64) -> Result<bool, DownloadError> {
        self.orchestrator.pause(id).await
    }

    /// Resumes a paused, pending or failed download from its checkpoints.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Store`] with an invalid transition for a
    /// completed download, or the run's error.
    #[instrument(skip(self))]
    pub async fn resume(&self, id: i64) -> Result<DownloadOutcome, DownloadError> {
        self.requeue_failed(id).await?;
        self.orchestrator.download_with_mirrors(id).await
    }

    /// Discards all progress and downloads from scratch.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::AlreadyActive`] while it runs, or the run's
    /// error.
    pub async fn restart(&self, id: i64) -> Result<DownloadOutcome, DownloadError> {
        self.orchestrator.restart(id).await
    }

    /// Runs the given downloads through the scheduler.
    ///
    /// Failed downloads are returned to `pending` first so they can start.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if a download cannot be requeued.
    #[instrument(skip(self, ids, events), fields(batch = ids.len()))]
    pub async fn run_batch(
        &self,
        ids: Vec<i64>,
        events: Option<mpsc::UnboundedSender<SchedulerEvent>>,
    ) -> Result<BatchReport, EngineError> {
        for &id in &ids {
            self.requeue_failed(id).await?;
        }
        Ok(self.scheduler.run(ids, events).await)
    }

    /// Runs every paused, failed and pending download, highest priority
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the downloads cannot be listed.
    pub async fn resume_all(
        &self,
        events: Option<mpsc::UnboundedSender<SchedulerEvent>>,
    ) -> Result<BatchReport, EngineError> {
        let ids: Vec<i64> = self
            .store
            .list_resumable()
            .await?
            .into_iter()
            .map(|d| d.id)
            .collect();
        info!(resumable = ids.len(), "resuming downloads");
        self.run_batch(ids, events).await
    }

    /// Verifies a completed download, re-downloading it on mismatch when
    /// `repair` is set.
    ///
    /// # Errors
    ///
    /// See [`Verifier::verify`] and [`Verifier::verify_with_repair`].
    pub async fn verify(&self, id: i64, repair: bool) -> Result<VerifyOutcome, DownloadError> {
        if repair {
            self.verifier.verify_with_repair(id).await
        } else {
            self.verifier.verify(id).await
        }
    }

    /// Verifies every completed download.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Store`] if the downloads cannot be listed.
    pub async fn verify_all(
        &self,
        repair: bool,
    ) -> Result<Vec<(i64, Result<VerifyOutcome, DownloadError>)>, DownloadError> {
        self.verifier.verify_all(repair).await
    }

    /// Returns downloads left `downloading` by a crashed process to `paused`.
    ///
    /// Rows whose heartbeat is younger than [`STALE_HEARTBEAT_SECS`] belong
    /// to a live process, possibly another one sharing the database, and are
    /// left alone.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the update fails.
    pub async fn recover_interrupted(&self) -> Result<u64, EngineError> {
        let recovered = self
            .store
            .recover_interrupted(Duration::from_secs(STALE_HEARTBEAT_SECS))
            .await?;
        if recovered > 0 {
            info!(recovered, "recovered interrupted downloads");
        }
        Ok(recovered)
    }

    /// Cancels every running download; each one pauses and keeps its
    /// progress. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        self.orchestrator.active().cancel_all()
    }

    async fn requeue_failed(&self, id: i64) -> Result<(), StoreError> {
        if self.store.require(id).await?.status() == DownloadStatus::Failed {
            self.store.requeue(id).await?;
            debug!(download_id = id, "failed download requeued");
        }
        Ok(())
    }
}
