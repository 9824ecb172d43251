//! Error types for the download module.
//!
//! Network failures carry an explicit [`NetworkErrorKind`] so retry decisions
//! never depend on the wording of an error message. Every error also maps to
//! a coarse [`FailureKind`] used for reporting and mirror fallback.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::store::{DownloadStatus, StoreError};

/// Why a download stopped without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// A pause (or shutdown) request cancelled the scope.
    Requested,
    /// The overall per-download timeout elapsed.
    TimedOut,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "paused"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Transport-level failure tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// Connect or read deadline elapsed.
    Timeout,
    /// Peer reset or aborted the connection.
    ConnectionReset,
    /// Peer refused the connection.
    ConnectionRefused,
    /// No connection could be established (DNS resolution, TCP or TLS handshake).
    Connect,
    /// Body ended before the expected number of bytes.
    UnexpectedEof,
    /// Write side of the connection closed.
    BrokenPipe,
    /// Anything else the transport reported.
    Other,
}

impl NetworkErrorKind {
    /// Classifies a reqwest error from its predicates and the `io::ErrorKind`
    /// found in its source chain.
    #[must_use]
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout;
        }

        if let Some(kind) = io_kind_in_chain(error) {
            match kind {
                io::ErrorKind::TimedOut => return Self::Timeout,
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                    return Self::ConnectionReset;
                }
                io::ErrorKind::ConnectionRefused => return Self::ConnectionRefused,
                io::ErrorKind::UnexpectedEof => return Self::UnexpectedEof,
                io::ErrorKind::BrokenPipe => return Self::BrokenPipe,
                _ => {}
            }
        }

        if error.is_connect() {
            Self::Connect
        } else if error.is_body() || error.is_decode() {
            Self::UnexpectedEof
        } else {
            Self::Other
        }
    }

    /// Returns true for the conditions worth another attempt.
    #[must_use]
    pub fn is_transient(self) -> bool {
        !matches!(self, Self::Other)
    }
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Timeout => "timeout",
            Self::ConnectionReset => "connection_reset",
            Self::ConnectionRefused => "connection_refused",
            Self::Connect => "connect",
            Self::UnexpectedEof => "unexpected_eof",
            Self::BrokenPipe => "broken_pipe",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn io_kind_in_chain(error: &(dyn std::error::Error + 'static)) -> Option<io::ErrorKind> {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(io_error) = err.downcast_ref::<io::Error>() {
            return Some(io_error.kind());
        }
        current = err.source();
    }
    None
}

/// Coarse failure taxonomy used for reporting and mirror fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Resets, timeouts, 5xx: retried with backoff.
    TransientNetwork,
    /// Non-retryable 4xx or a server that ignores ranges.
    ServerRejected,
    /// HTTP 429.
    RateLimited,
    /// An HTML/challenge page or wrong-sized body instead of the file.
    ContentMismatch,
    /// The finished file does not hash to the expected digest.
    ChecksumMismatch,
    /// Local disk or database failure; never retried.
    StorageFailure,
    /// Pause or timeout; not an error condition.
    Cancelled,
    /// Bad input or an unrecognised transport error.
    Unclassified,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::TransientNetwork => "transient_network",
            Self::ServerRejected => "server_rejected",
            Self::RateLimited => "rate_limited",
            Self::ContentMismatch => "content_mismatch",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::StorageFailure => "storage_failure",
            Self::Cancelled => "cancelled",
            Self::Unclassified => "unclassified",
        };
        write!(f, "{label}")
    }
}

/// Errors that can occur while downloading.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Transport-level failure.
    #[error("network error ({kind}) downloading {url}: {source}")]
    Network {
        /// The URL being fetched.
        url: String,
        /// Explicit classification of the failure.
        kind: NetworkErrorKind,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The body ended before every expected byte arrived.
    #[error("body from {url} ended after {received} of {expected} bytes")]
    Truncated {
        /// The URL being fetched.
        url: String,
        /// Bytes the range or file should have contained.
        expected: u64,
        /// Bytes actually received.
        received: u64,
    },

    /// Non-success HTTP status.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The server answered a ranged request without honouring the range.
    #[error("server ignored range request for {url} (HTTP {status}, {detail})")]
    RangeIgnored {
        /// The URL being fetched.
        url: String,
        /// Status the server answered with.
        status: u16,
        /// What was wrong with the answer.
        detail: String,
    },

    /// An HTML/challenge page arrived instead of the expected file.
    #[error("content mismatch from {url}: {reason}")]
    ContentMismatch {
        /// The URL that served the page.
        url: String,
        /// Marker or header that gave it away.
        reason: String,
    },

    /// The body was longer than the known size.
    #[error("size mismatch for {path}: expected {expected_bytes} bytes, got {actual_bytes}")]
    SizeMismatch {
        /// Temp file being written.
        path: PathBuf,
        /// Expected size in bytes.
        expected_bytes: u64,
        /// Bytes received.
        actual_bytes: u64,
    },

    /// The finished file does not hash to the expected digest.
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Verified file.
        path: PathBuf,
        /// Expected digest (lowercase hex).
        expected: String,
        /// Computed digest (lowercase hex).
        actual: String,
    },

    /// File system error (create, seek, write, rename).
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Persistence failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The provided URL is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    Client {
        /// The builder error.
        #[source]
        source: reqwest::Error,
    },

    /// The download already has a running orchestrator.
    #[error("download {id} is already running")]
    AlreadyActive {
        /// Download identifier.
        id: i64,
    },

    /// The operation needs a completed download.
    #[error("download {id} is {status}, not completed")]
    NotCompleted {
        /// Download identifier.
        id: i64,
        /// Its current status.
        status: DownloadStatus,
    },

    /// Cooperative cancellation: pause or overall timeout.
    #[error("download {reason}")]
    Cancelled {
        /// What cancelled the scope.
        reason: CancelReason,
    },
}

impl DownloadError {
    /// Creates a network error, classifying the transport failure.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            kind: NetworkErrorKind::from_reqwest(&source),
            source,
        }
    }

    /// Creates a truncated-body error.
    pub fn truncated(url: impl Into<String>, expected: u64, received: u64) -> Self {
        Self::Truncated {
            url: url.into(),
            expected,
            received,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a range-ignored error.
    pub fn range_ignored(url: impl Into<String>, status: u16, detail: impl Into<String>) -> Self {
        Self::RangeIgnored {
            url: url.into(),
            status,
            detail: detail.into(),
        }
    }

    /// Creates a content-mismatch error.
    pub fn content_mismatch(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ContentMismatch {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a size-mismatch error.
    pub fn size_mismatch(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::SizeMismatch {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(reason: CancelReason) -> Self {
        Self::Cancelled { reason }
    }

    /// Returns the cancel reason when this is a cancellation.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            Self::Cancelled { reason } => Some(*reason),
            _ => None,
        }
    }

    /// Returns true for pause/timeout cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_reason().is_some()
    }

    /// Returns the transport tag for network-level failures.
    #[must_use]
    pub fn network_kind(&self) -> Option<NetworkErrorKind> {
        match self {
            Self::Network { kind, .. } => Some(*kind),
            Self::Truncated { .. } => Some(NetworkErrorKind::UnexpectedEof),
            _ => None,
        }
    }

    /// Returns the HTTP status for status errors.
    #[must_use]
    pub fn http_status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Maps the error onto the failure taxonomy.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Network { kind, .. } if kind.is_transient() => FailureKind::TransientNetwork,
            Self::Truncated { .. } => FailureKind::TransientNetwork,
            Self::HttpStatus { status: 429, .. } => FailureKind::RateLimited,
            Self::HttpStatus { status, .. } if *status >= 500 => FailureKind::TransientNetwork,
            Self::HttpStatus { .. } | Self::RangeIgnored { .. } => FailureKind::ServerRejected,
            Self::ContentMismatch { .. } | Self::SizeMismatch { .. } => {
                FailureKind::ContentMismatch
            }
            Self::ChecksumMismatch { .. } => FailureKind::ChecksumMismatch,
            Self::Io { .. } | Self::Store(_) => FailureKind::StorageFailure,
            Self::Cancelled { .. } => FailureKind::Cancelled,
            Self::Network { .. }
            | Self::InvalidUrl { .. }
            | Self::Client { .. }
            | Self::AlreadyActive { .. }
            | Self::NotCompleted { .. } => FailureKind::Unclassified,
        }
    }

    /// Returns true when trying the next mirror could help.
    ///
    /// Local failures (disk, database) and cancellation end the mirror walk;
    /// everything the remote side caused does not.
    #[must_use]
    pub fn allows_next_mirror(&self) -> bool {
        !matches!(
            self.failure_kind(),
            FailureKind::StorageFailure | FailureKind::Cancelled
        ) && !matches!(self, Self::AlreadyActive { .. } | Self::Client { .. })
    }
}

// Note on From trait implementations:
// There is no `From<reqwest::Error>` or `From<std::io::Error>`: every variant
// needs a URL or path the source error does not carry. Use the constructor
// helpers (network(), io(), ...) instead.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_display() {
        let error = DownloadError::http_status("https://example.com/file.bin", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(msg.contains("https://example.com/file.bin"));
    }

    #[test]
    fn test_truncated_reports_unexpected_eof() {
        let error = DownloadError::truncated("https://example.com/a", 100, 40);
        assert_eq!(error.network_kind(), Some(NetworkErrorKind::UnexpectedEof));
        assert_eq!(error.failure_kind(), FailureKind::TransientNetwork);
        assert!(error.to_string().contains("40 of 100"));
    }

    #[test]
    fn test_failure_kind_for_statuses() {
        let kind = |status| DownloadError::http_status("u", status).failure_kind();
        assert_eq!(kind(429), FailureKind::RateLimited);
        assert_eq!(kind(503), FailureKind::TransientNetwork);
        assert_eq!(kind(404), FailureKind::ServerRejected);
    }

    #[test]
    fn test_storage_failures_stop_mirror_walk() {
        let io = DownloadError::io("/tmp/x", io::Error::other("disk full"));
        assert_eq!(io.failure_kind(), FailureKind::StorageFailure);
        assert!(!io.allows_next_mirror());

        let store = DownloadError::from(StoreError::NotFound(3));
        assert!(!store.allows_next_mirror());
    }

    #[test]
    fn test_remote_failures_allow_next_mirror() {
        assert!(DownloadError::http_status("u", 404).allows_next_mirror());
        assert!(DownloadError::content_mismatch("u", "<html").allows_next_mirror());
        assert!(DownloadError::truncated("u", 2, 1).allows_next_mirror());
        assert!(DownloadError::range_ignored("u", 200, "full body").allows_next_mirror());
    }

    #[test]
    fn test_cancelled_is_distinct() {
        let error = DownloadError::cancelled(CancelReason::TimedOut);
        assert!(error.is_cancelled());
        assert_eq!(error.cancel_reason(), Some(CancelReason::TimedOut));
        assert_eq!(error.failure_kind(), FailureKind::Cancelled);
        assert!(!error.allows_next_mirror());
        assert_eq!(error.to_string(), "download timed out");
    }

    #[test]
    fn test_io_kind_walks_source_chain() {
        #[derive(Debug)]
        struct Wrapper(io::Error);
        impl fmt::Display for Wrapper {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "wrapped")
            }
        }
        impl std::error::Error for Wrapper {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                Some(&self.0)
            }
        }

        let wrapped = Wrapper(io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(
            io_kind_in_chain(&wrapped),
            Some(io::ErrorKind::ConnectionReset)
        );
    }
}
