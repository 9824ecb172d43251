//! Cancellation scope for one download run.
//!
//! A scope combines the pause token handed out by [`ActiveDownloads`] with
//! the overall per-download deadline. Every suspension point in the engine
//! (HTTP round trips, body reads, backoff waits) goes through the scope, so a
//! pause or timeout is observed promptly and surfaces as
//! [`DownloadError::Cancelled`].
//!
//! [`ActiveDownloads`]: super::ActiveDownloads

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::{CancelReason, DownloadError};

/// Cancellation token plus optional deadline.
#[derive(Debug, Clone)]
pub struct CancelScope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl CancelScope {
    /// Creates a scope without a deadline.
    #[must_use]
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Adds a deadline `timeout` from now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Returns the underlying token.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns why the scope is cancelled, if it is.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        if self.token.is_cancelled() {
            Some(CancelReason::Requested)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(CancelReason::TimedOut)
        } else {
            None
        }
    }

    /// Fails with [`DownloadError::Cancelled`] if the scope is already cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Cancelled`] after a pause or once the deadline passed.
    pub fn check(&self) -> Result<(), DownloadError> {
        match self.reason() {
            Some(reason) => Err(DownloadError::cancelled(reason)),
            None => Ok(()),
        }
    }

    /// Resolves once the scope is cancelled.
    pub async fn cancelled(&self) -> CancelReason {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.token.cancelled() => CancelReason::Requested,
            () = deadline => CancelReason::TimedOut,
        }
    }

    /// Runs `future` unless the scope is cancelled first.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Cancelled`] if the scope fires before `future`
    /// completes; `future` is dropped in that case.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, DownloadError> {
        tokio::select! {
            biased;
            reason = self.cancelled() => Err(DownloadError::cancelled(reason)),
            output = future => Ok(output),
        }
    }

    /// Sleeps for `delay`, waking early on cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Cancelled`] if the scope fires during the wait.
    pub async fn sleep(&self, delay: Duration) -> Result<(), DownloadError> {
        self.run(tokio::time::sleep(delay)).await
    }
}
