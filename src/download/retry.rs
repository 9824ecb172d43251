//! Failure classification and exponential backoff with jitter.
//!
//! # Overview
//!
//! [`categorize`] sorts a failure into an [`ErrorCategory`]:
//! - [`ErrorCategory::Retryable`] - transient network failures and 500/502/503/504
//! - [`ErrorCategory::NonRetryable`] - 400/401/403/404/405/410/413 and anything unrecognised
//! - [`ErrorCategory::RateLimited`] - HTTP 429, always waits the maximum delay
//!
//! [`retry_operation`] drives an async operation through those categories,
//! sleeping [`backoff`] between attempts. Waits go through a [`CancelScope`],
//! so a pause or timeout interrupts them immediately.
//!
//! # Example
//!
//! ```
//! use chunkdl::download::{DownloadError, ErrorCategory, categorize};
//!
//! let error = DownloadError::http_status("https://example.com/file.bin", 503);
//! assert_eq!(categorize(Some(&error), None), ErrorCategory::Retryable);
//! assert_eq!(categorize(None, Some(429)), ErrorCategory::RateLimited);
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::DownloadError;
use super::cancel::CancelScope;

/// Default maximum attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (30 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Jitter applied to each delay, as a fraction of the delay (±25%).
const JITTER_FRACTION: f64 = 0.25;

/// Retry classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Worth another attempt after a backoff.
    Retryable,
    /// Further attempts are pointless.
    NonRetryable,
    /// Server asked us to slow down; wait the maximum delay.
    RateLimited,
}

/// Retry settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum attempts, including the first (at least 1).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap for exponential growth; also the fixed rate-limit wait.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

impl RetryConfig {
    /// Creates a retry configuration; `max_attempts` is raised to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            multiplier,
        }
    }

    /// Creates a configuration with a custom attempt limit and default delays.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }
}

/// Classifies a failure for retry purposes.
///
/// An explicit `http_status` takes precedence over `error`. A `None` error
/// with no status is the success path and reports `Retryable`, which callers
/// treat as "nothing to stop for".
///
/// | Input | Category |
/// |-------|----------|
/// | 429 | RateLimited |
/// | 400, 401, 403, 404, 405, 410, 413 | NonRetryable |
/// | 500, 502, 503, 504 | Retryable |
/// | timeout, reset, refused, connect/DNS, unexpected EOF, broken pipe | Retryable |
/// | anything else | NonRetryable |
#[must_use]
pub fn categorize(error: Option<&DownloadError>, http_status: Option<u16>) -> ErrorCategory {
    if let Some(status) = http_status.or_else(|| error.and_then(DownloadError::http_status_code)) {
        return categorize_status(status);
    }

    let Some(error) = error else {
        return ErrorCategory::Retryable;
    };

    match error.network_kind() {
        Some(kind) if kind.is_transient() => ErrorCategory::Retryable,
        _ => ErrorCategory::NonRetryable,
    }
}

/// Explicit match arms are kept per status for documentation purposes.
#[allow(clippy::match_same_arms)]
fn categorize_status(status: u16) -> ErrorCategory {
    match status {
        429 => ErrorCategory::RateLimited, // Too Many Requests

        400 => ErrorCategory::NonRetryable, // Bad Request
        401 => ErrorCategory::NonRetryable, // Unauthorized
        403 => ErrorCategory::NonRetryable, // Forbidden
        404 => ErrorCategory::NonRetryable, // Not Found
        405 => ErrorCategory::NonRetryable, // Method Not Allowed
        410 => ErrorCategory::NonRetryable, // Gone
        413 => ErrorCategory::NonRetryable, // Payload Too Large

        500 => ErrorCategory::Retryable, // Internal Server Error
        502 => ErrorCategory::Retryable, // Bad Gateway
        503 => ErrorCategory::Retryable, // Service Unavailable
        504 => ErrorCategory::Retryable, // Gateway Timeout

        // Unknown conditions fail closed.
        _ => ErrorCategory::NonRetryable,
    }
}

/// Computes the wait before retry number `attempt` (0-based).
///
/// `base_delay * multiplier^attempt`, capped at `max_delay`, then perturbed by
/// uniform jitter of ±25%. Attempt 0 waits exactly `base_delay`. The result
/// never exceeds `max_delay * 1.25`.
#[must_use]
pub fn backoff(attempt: u32, cfg: &RetryConfig) -> Duration {
    if attempt == 0 {
        return cfg.base_delay;
    }

    let base = cfg.base_delay.as_secs_f64();
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let capped = (base * cfg.multiplier.powi(exponent)).min(cfg.max_delay.as_secs_f64());

    let jitter = rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
    let jittered = (capped * (1.0 + jitter)).max(0.0);

    Duration::try_from_secs_f64(jittered).unwrap_or(cfg.max_delay)
}

/// Runs `op` until it succeeds, fails permanently, runs out of attempts, or
/// `scope` is cancelled.
///
/// `op` receives the 0-based attempt number. Non-retryable failures and
/// cancellation return at once; retryable ones wait [`backoff`], rate-limited
/// ones wait `max_delay`. The last error is returned when attempts run out.
///
/// # Errors
///
/// Returns the operation's error, or [`DownloadError::Cancelled`] if the scope
/// fires before or between attempts.
pub async fn retry_operation<T, F, Fut>(
    scope: &CancelScope,
    cfg: &RetryConfig,
    mut op: F,
) -> Result<T, DownloadError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, DownloadError>>,
{
    let max_attempts = cfg.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        scope.check()?;

        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if error.is_cancelled() {
            return Err(error);
        }

        let category = categorize(Some(&error), None);
        if category == ErrorCategory::NonRetryable {
            debug!(attempt, error = %error, "not retrying");
            return Err(error);
        }

        if attempt + 1 >= max_attempts {
            warn!(attempts = attempt + 1, error = %error, "retry attempts exhausted");
            return Err(error);
        }

        let delay = match category {
            ErrorCategory::RateLimited => cfg.max_delay,
            _ => backoff(attempt, cfg),
        };
        warn!(
            attempt = attempt + 1,
            max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "attempt failed, retrying"
        );

        scope.sleep(delay).await?;
        attempt += 1;
    }
}
