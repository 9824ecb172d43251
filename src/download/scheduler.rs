//! Bounded concurrent execution of a batch of downloads.
//!
//! Each download acquires a semaphore permit before its task is spawned,
//! runs independently through the [`Orchestrator`], and releases the permit
//! when it finishes, whatever the outcome. One download failing never
//! affects its siblings. Progress is reported as [`SchedulerEvent`]s on a
//! `tokio::sync::mpsc` channel so presentation stays out of the engine.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, instrument, warn};

use super::constants::DEFAULT_MAX_CONCURRENT;
use super::error::{CancelReason, DownloadError, FailureKind};
use super::orchestrator::{DownloadOutcome, Orchestrator};

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 32;

/// Status event emitted while a batch runs, keyed by download id.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// A worker slot was acquired and the download is starting.
    Starting {
        /// Download identifier.
        id: i64,
    },
    /// The download finished and was renamed into place.
    Completed {
        /// Download identifier.
        id: i64,
        /// Final path.
        path: PathBuf,
    },
    /// Every URL failed; the row is marked failed.
    Failed {
        /// Download identifier.
        id: i64,
        /// Display text of the last error.
        error: String,
        /// Failure category of the last error.
        kind: FailureKind,
    },
    /// Paused or timed out; progress is kept.
    Cancelled {
        /// Download identifier.
        id: i64,
        /// What stopped it.
        reason: CancelReason,
    },
}

impl SchedulerEvent {
    /// The download the event is about.
    #[must_use]
    pub fn id(&self) -> i64 {
        match self {
            Self::Starting { id }
            | Self::Completed { id, .. }
            | Self::Failed { id, .. }
            | Self::Cancelled { id, .. } => *id,
        }
    }
}

/// Counts of how each download in a batch ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Downloads that completed.
    pub completed: usize,
    /// Downloads that failed.
    pub failed: usize,
    /// Downloads paused or timed out.
    pub cancelled: usize,
}

impl BatchReport {
    /// Total downloads accounted for.
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }
}

#[derive(Debug, Clone, Copy)]
enum TaskResult {
    Completed,
    Failed,
    Cancelled,
}

/// Runs batches of downloads under a fixed worker budget.
#[derive(Debug, Clone)]
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

/// Error returned for an out-of-range worker budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}")]
pub struct InvalidConcurrency {
    /// The rejected value.
    pub value: usize,
}

impl Scheduler {
    /// Creates a scheduler running at most `max_concurrent` downloads at once.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidConcurrency`] outside `1..=32`.
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        max_concurrent: usize,
    ) -> Result<Self, InvalidConcurrency> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&max_concurrent) {
            return Err(InvalidConcurrency {
                value: max_concurrent,
            });
        }
        debug!(max_concurrent, "creating scheduler");
        Ok(Self {
            orchestrator,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        })
    }

    /// Creates a scheduler with the default budget of 2.
    #[must_use]
    pub fn with_default_concurrency(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            semaphore: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT)),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }

    /// The configured worker budget.
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Runs every download in `ids` and waits until all of them ended.
    ///
    /// Each download goes through
    /// [`Orchestrator::download_with_mirrors`]. Events are sent on `events`
    /// when given; a closed receiver is ignored. A panicking task is logged
    /// and counted as failed.
    #[instrument(skip(self, ids, events), fields(batch = ids.len()))]
    pub async fn run(
        &self,
        ids: Vec<i64>,
        events: Option<mpsc::UnboundedSender<SchedulerEvent>>,
    ) -> BatchReport {
        let mut handles = Vec::with_capacity(ids.len());
        info!(max_concurrent = self.max_concurrent, "starting batch");

        for id in ids {
            let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
                warn!("scheduler semaphore closed");
                break;
            };

            let orchestrator = Arc::clone(&self.orchestrator);
            let events = events.clone();
            handles.push((
                id,
                tokio::spawn(async move {
                    // Dropped when the task ends, whatever the outcome.
                    let _permit = permit;
                    run_one(&orchestrator, id, events.as_ref()).await
                }),
            ));
        }

        let mut report = BatchReport::default();
        for (id, handle) in handles {
            match handle.await {
                Ok(TaskResult::Completed) => report.completed += 1,
                Ok(TaskResult::Failed) => report.failed += 1,
                Ok(TaskResult::Cancelled) => report.cancelled += 1,
                Err(e) => {
                    warn!(download_id = id, error = %e, "download task panicked");
                    report.failed += 1;
                }
            }
        }

        info!(
            completed = report.completed,
            failed = report.failed,
            cancelled = report.cancelled,
            "batch complete"
        );
        report
    }
}

async fn run_one(
    orchestrator: &Orchestrator,
    id: i64,
    events: Option<&mpsc::UnboundedSender<SchedulerEvent>>,
) -> TaskResult {
    let emit = |event: SchedulerEvent| {
        if let Some(tx) = events {
            let _ = tx.send(event);
        }
    };

    emit(SchedulerEvent::Starting { id });
    match orchestrator.download_with_mirrors(id).await {
        Ok(DownloadOutcome::Completed { path, .. }) => {
            emit(SchedulerEvent::Completed { id, path });
            TaskResult::Completed
        }
        Ok(DownloadOutcome::Cancelled(reason)) => {
            emit(SchedulerEvent::Cancelled { id, reason });
            TaskResult::Cancelled
        }
        Err(error) => {
            warn!(download_id = id, error = %error, "download failed");
            emit(failed_event(id, &error));
            TaskResult::Failed
        }
    }
}

fn failed_event(id: i64, error: &DownloadError) -> SchedulerEvent {
    SchedulerEvent::Failed {
        id,
        error: error.to_string(),
        kind: error.failure_kind(),
    }
}
