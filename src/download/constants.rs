//! Constants for the download module (timeouts, buffer sizes, chunking).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout: the longest a single body read may stall (5 minutes).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default chunk size for range-capable transfers (5 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Bytes written between persisted progress checkpoints (512 KiB).
///
/// A crash loses at most this many bytes of the chunk in flight.
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 512 * 1024;

/// Write buffer between the response stream and the temp file (32 KiB).
pub const WRITE_BUFFER_SIZE: usize = 32 * 1024;

/// Leading body bytes inspected for HTML/challenge markers in simple mode (2 KiB).
pub const SNIFF_LEN: usize = 2 * 1024;

/// Read buffer for checksum computation (64 KiB).
pub const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Default overall timeout for one download run (30 minutes).
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 30 * 60;

/// Default number of downloads running at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 2;

/// How often a running download refreshes its liveness mark (15 seconds).
pub const HEARTBEAT_INTERVAL_SECS: u64 = 15;

/// Age after which a `downloading` row's owner is presumed dead (2 minutes).
///
/// Several heartbeat intervals, so a busy database does not make a live
/// download look abandoned.
pub const STALE_HEARTBEAT_SECS: u64 = 120;
