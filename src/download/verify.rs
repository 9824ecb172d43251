//! Post-completion checksum verification with optional repair.
//!
//! The expected digest is the download's content hash: 32 hex digits are
//! checked as MD5, 64 as SHA-256. The final file is streamed from disk in
//! 64 KiB reads. A mismatch only clears the `verified` flag; the download
//! stays completed unless a repair is requested.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{info, instrument, warn};

use super::constants::HASH_BUFFER_SIZE;
use super::error::DownloadError;
use super::orchestrator::{DownloadOutcome, Orchestrator};
use crate::store::{DownloadStatus, Store};

/// Digest algorithm picked from the shape of the expected hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// 128-bit MD5, 32 hex digits.
    Md5,
    /// SHA-256, 64 hex digits.
    Sha256,
}

impl HashAlgorithm {
    /// Picks the algorithm for `expected`, or `None` if it is not a 32 or 64
    /// digit hex string.
    #[must_use]
    pub fn for_expected(expected: &str) -> Option<Self> {
        let hex = expected.trim();
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        match hex.len() {
            32 => Some(Self::Md5),
            64 => Some(Self::Sha256),
            _ => None,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => write!(f, "md5"),
            Self::Sha256 => write!(f, "sha256"),
        }
    }
}

/// Result of checking one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The digest matched.
    Verified,
    /// The digest differed.
    Mismatch {
        /// Expected digest, lowercase.
        expected: String,
        /// Computed digest, lowercase.
        actual: String,
    },
    /// No check was possible (unrecognised hash shape).
    Unverifiable {
        /// Why.
        reason: String,
    },
}

impl VerifyOutcome {
    /// True only for a matching digest.
    #[must_use]
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }
}

/// Computes the lowercase hex digest of the file at `path`.
///
/// # Errors
///
/// Returns [`DownloadError::Io`] if the file cannot be read.
pub async fn file_digest(path: &Path, algorithm: HashAlgorithm) -> Result<String, DownloadError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    let mut md5 = md5::Context::new();
    let mut sha = Sha256::new();
    loop {
        let read = file
            .read(&mut buffer)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        if read == 0 {
            break;
        }
        match algorithm {
            HashAlgorithm::Md5 => md5.consume(&buffer[..read]),
            HashAlgorithm::Sha256 => sha.update(&buffer[..read]),
        }
    }

    Ok(match algorithm {
        HashAlgorithm::Md5 => format!("{:x}", md5.compute()),
        HashAlgorithm::Sha256 => format!("{:x}", sha.finalize()),
    })
}

/// Compares the file at `path` with `expected`, ignoring case and
/// surrounding whitespace.
///
/// # Errors
///
/// Returns [`DownloadError::Io`] if the file cannot be read.
pub async fn verify_file(path: &Path, expected: &str) -> Result<VerifyOutcome, DownloadError> {
    let Some(algorithm) = HashAlgorithm::for_expected(expected) else {
        return Ok(VerifyOutcome::Unverifiable {
            reason: format!("unrecognised hash {:?}", expected.trim()),
        });
    };

    let expected = expected.trim().to_ascii_lowercase();
    let actual = file_digest(path, algorithm).await?;
    if actual == expected {
        Ok(VerifyOutcome::Verified)
    } else {
        Ok(VerifyOutcome::Mismatch { expected, actual })
    }
}

/// Checks completed downloads and records the `verified` flag.
#[derive(Debug, Clone)]
pub struct Verifier {
    store: Store,
    orchestrator: Arc<Orchestrator>,
}

impl Verifier {
    /// Creates a verifier; `orchestrator` is only used for repairs.
    #[must_use]
    pub fn new(store: Store, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            store,
            orchestrator,
        }
    }

    /// Verifies one completed download and records the result.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::NotCompleted`] unless the download is completed
    /// - [`DownloadError::Io`] if the file cannot be read
    #[instrument(skip(self))]
    pub async fn verify(&self, id: i64) -> Result<VerifyOutcome, DownloadError> {
        let download = self.store.require(id).await?;
        if download.status() != DownloadStatus::Completed {
            return Err(DownloadError::NotCompleted {
                id,
                status: download.status(),
            });
        }

        let outcome = verify_file(&download.destination(), &download.content_hash).await?;
        self.store.mark_verified(id, outcome.is_verified()).await?;

        match &outcome {
            VerifyOutcome::Verified => info!("checksum verified"),
            VerifyOutcome::Mismatch { expected, actual } => {
                warn!(%expected, %actual, "checksum mismatch");
            }
            VerifyOutcome::Unverifiable { reason } => warn!(%reason, "checksum not checked"),
        }
        Ok(outcome)
    }

    /// Verifies and, on mismatch, resets the download, fetches it again and
    /// re-verifies.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ChecksumMismatch`] if the fresh copy still
    /// mismatches, or any error from the re-download.
    #[instrument(skip(self))]
    pub async fn verify_with_repair(&self, id: i64) -> Result<VerifyOutcome, DownloadError> {
        let outcome = self.verify(id).await?;
        if !matches!(outcome, VerifyOutcome::Mismatch { .. }) {
            return Ok(outcome);
        }

        info!("re-downloading after checksum mismatch");
        match self.orchestrator.restart(id).await? {
            DownloadOutcome::Completed { path, .. } => match self.verify(id).await? {
                VerifyOutcome::Mismatch { expected, actual } => {
                    Err(DownloadError::ChecksumMismatch {
                        path,
                        expected,
                        actual,
                    })
                }
                outcome => Ok(outcome),
            },
            DownloadOutcome::Cancelled(reason) => Err(DownloadError::cancelled(reason)),
        }
    }

    /// Verifies every completed download, optionally repairing mismatches.
    ///
    /// Per-download failures are reported in the list, not propagated.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Store`] if the downloads cannot be listed.
    #[instrument(skip(self))]
    pub async fn verify_all(
        &self,
        repair: bool,
    ) -> Result<Vec<(i64, Result<VerifyOutcome, DownloadError>)>, DownloadError> {
        let completed = self
            .store
            .list(Some(DownloadStatus::Completed), true)
            .await?;

        let mut results = Vec::with_capacity(completed.len());
        for download in completed {
            let result = if repair {
                self.verify_with_repair(download.id).await
            } else {
                self.verify(download.id).await
            };
            results.push((download.id, result));
        }
        Ok(results)
    }
}
