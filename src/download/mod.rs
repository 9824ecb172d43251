//! Resumable, chunked HTTP download engine.
//!
//! A download is probed, planned into fixed byte ranges when the server
//! honours `Range`, fetched chunk by chunk into a preallocated temp file, and
//! renamed into place once every byte is written. Progress is checkpointed
//! in the store, so a paused, timed out or crashed download continues from
//! its last checkpoint instead of byte zero.
//!
//! # Features
//!
//! - Ranged transfers with per-chunk resume, or a single sniffed stream
//!   when ranges are unavailable
//! - Retry with exponential backoff and jitter, rate-limit aware
//! - Mirror fallback over an ordered URL list
//! - Bounded concurrency across downloads
//! - MD5 / SHA-256 verification with optional re-download
//!
//! # Example
//!
//! ```no_run
//! use chunkdl::download::{HttpClient, Orchestrator, OrchestratorSettings};
//! use chunkdl::store::Store;
//! use chunkdl::Database;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::new(Database::new_in_memory().await?);
//! let orchestrator = Orchestrator::new(
//!     Arc::new(store),
//!     HttpClient::with_defaults()?,
//!     OrchestratorSettings::default(),
//! );
//! orchestrator.download_with_mirrors(1).await?;
//! # Ok(())
//! # }
//! ```

mod cancel;
mod client;
pub mod constants;
mod engine;
mod error;
mod fetcher;
mod orchestrator;
mod planner;
mod registry;
mod retry;
mod scheduler;
mod verify;

pub use cancel::CancelScope;
pub use client::{ContentRange, HttpClient, ProbeResult, parse_content_range};
pub use engine::{DownloadEngine, EngineError};
pub use error::{CancelReason, DownloadError, FailureKind, NetworkErrorKind};
pub use fetcher::detect_html_marker;
pub use orchestrator::{DownloadOutcome, Orchestrator, OrchestratorSettings};
pub use planner::{TransferMode, plan_chunks, plan_transfer};
pub use registry::{ActiveDownloads, ActiveGuard};
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, ErrorCategory, RetryConfig, backoff, categorize, retry_operation,
};
pub use scheduler::{
    BatchReport, InvalidConcurrency, MAX_CONCURRENCY, MIN_CONCURRENCY, Scheduler, SchedulerEvent,
};
pub use verify::{HashAlgorithm, Verifier, VerifyOutcome, file_digest, verify_file};

// Note: no module-local Result aliases here.
// Use `Result<T, DownloadError>` explicitly in function signatures.
