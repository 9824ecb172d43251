//! Download record types and the status state machine.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Suffix appended to the destination path while bytes are still arriving.
pub const TEMP_SUFFIX: &str = ".part";

/// Lifecycle status of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Created and waiting for a worker.
    Pending,
    /// Owned by an orchestrator that is moving bytes.
    Downloading,
    /// Interrupted by a pause, timeout, or crash; resumable.
    Paused,
    /// Final file renamed into place.
    Completed,
    /// Gave up with an error message recorded.
    Failed,
}

impl DownloadStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Downloading,
        Self::Paused,
        Self::Completed,
        Self::Failed,
    ];

    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Statuses a download may move into `self` from.
    ///
    /// `Paused -> Completed` is legal: a pause that races the final rename
    /// loses, because the file is already in place.
    #[must_use]
    pub fn allowed_sources(self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::Pending, Self::Paused, Self::Completed, Self::Failed],
            Self::Downloading => &[Self::Pending, Self::Paused],
            Self::Paused => &[Self::Downloading],
            Self::Completed => &[Self::Downloading, Self::Paused],
            Self::Failed => &[Self::Downloading],
        }
    }

    /// Returns true when moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        next.allowed_sources().contains(&self)
    }

    /// Completed downloads are hidden from default listings.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for DownloadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "downloading" => Ok(Self::Downloading),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid download status: {s}")),
        }
    }
}

/// Input for creating a download row.
///
/// Everything the content locator hands over: where to fetch from, what the
/// bytes should hash to, and where they should end up.
#[derive(Debug, Clone, Default)]
pub struct NewDownload {
    /// Expected content digest; unique per download.
    pub content_hash: String,
    /// Human readable title.
    pub title: Option<String>,
    /// Page the transfer URL was resolved from.
    pub source_ref: Option<String>,
    /// Primary transfer URL.
    pub download_url: String,
    /// Alternate URLs, tried in order after the primary.
    pub mirror_urls: Vec<String>,
    /// Expected size when the locator knows it.
    pub size: Option<u64>,
    /// Final destination path.
    pub file_path: PathBuf,
    /// Queue ordering; higher runs first.
    pub priority: i64,
}

impl NewDownload {
    /// Creates a request with the required fields and defaults for the rest.
    #[must_use]
    pub fn new(
        content_hash: impl Into<String>,
        download_url: impl Into<String>,
        file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            content_hash: content_hash.into(),
            download_url: download_url.into(),
            file_path: file_path.into(),
            ..Self::default()
        }
    }

    /// Adds mirror URLs.
    #[must_use]
    pub fn with_mirrors(mut self, mirrors: Vec<String>) -> Self {
        self.mirror_urls = mirrors;
        self
    }

    /// Sets the expected size.
    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Sets the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Derives the provisional path bytes are written to before the final rename.
#[must_use]
pub fn temp_path_for(file_path: &Path) -> PathBuf {
    let mut raw = file_path.as_os_str().to_os_string();
    raw.push(TEMP_SUFFIX);
    PathBuf::from(raw)
}

/// A persisted download.
#[derive(Debug, Clone, FromRow)]
pub struct Download {
    /// Unique identifier.
    pub id: i64,
    /// Expected content digest (hex).
    pub content_hash: String,
    /// Human readable title.
    pub title: Option<String>,
    /// Page the transfer URL was resolved from.
    pub source_ref: Option<String>,
    /// Primary URL as added; never rewritten.
    pub download_url: String,
    /// Mirror URLs as a JSON array.
    pub mirror_urls: Option<String>,
    /// URL that served the completed file.
    pub served_url: Option<String>,
    /// Total size in bytes, -1 until probed.
    pub size: i64,
    /// Bytes durably recorded as written.
    pub downloaded_size: i64,
    /// Final destination path.
    pub file_path: String,
    /// Provisional path; cleared once the file is renamed into place.
    pub temp_path: Option<String>,
    /// Current status (stored as text, parsed via `status()`).
    #[sqlx(rename = "status")]
    pub status_str: String,
    /// Last error message, kept for display.
    pub error_message: Option<String>,
    /// Number of failed attempts recorded.
    pub retry_count: i64,
    /// Whether the final file matched `content_hash`.
    pub verified: bool,
    /// Queue ordering; higher runs first.
    pub priority: i64,
    /// When the row was created.
    pub created_at: String,
    /// When the row was last updated.
    pub updated_at: String,
    /// When the download completed.
    pub completed_at: Option<String>,
    /// Last liveness mark from the process running the download.
    pub heartbeat_at: Option<String>,
}

impl Download {
    /// Returns the parsed status enum.
    ///
    /// Falls back to `Pending` if the status string is invalid.
    #[must_use]
    pub fn status(&self) -> DownloadStatus {
        self.status_str.parse().unwrap_or(DownloadStatus::Pending)
    }

    /// Returns the size once it is known.
    #[must_use]
    pub fn known_size(&self) -> Option<u64> {
        u64::try_from(self.size).ok()
    }

    /// Bytes recorded as downloaded.
    #[must_use]
    pub fn downloaded_bytes(&self) -> u64 {
        u64::try_from(self.downloaded_size).unwrap_or(0)
    }

    /// Final destination path.
    #[must_use]
    pub fn destination(&self) -> PathBuf {
        PathBuf::from(&self.file_path)
    }

    /// Provisional path, derived from the destination when the row has none.
    #[must_use]
    pub fn temp_file(&self) -> PathBuf {
        self.temp_path
            .as_ref()
            .map_or_else(|| temp_path_for(Path::new(&self.file_path)), PathBuf::from)
    }

    /// Parses the mirror list.
    ///
    /// Returns an empty vector if mirrors are None or invalid JSON.
    #[must_use]
    pub fn mirrors(&self) -> Vec<String> {
        let Some(json) = &self.mirror_urls else {
            return Vec::new();
        };

        serde_json::from_str(json).unwrap_or_default()
    }

    /// Primary URL followed by mirrors, without duplicates.
    #[must_use]
    pub fn candidate_urls(&self) -> Vec<String> {
        let mut urls = vec![self.download_url.clone()];
        for mirror in self.mirrors() {
            if !urls.contains(&mirror) {
                urls.push(mirror);
            }
        }
        urls
    }

    /// Serializes mirrors to a JSON array for storage.
    ///
    /// Returns None for an empty list.
    #[must_use]
    pub fn serialize_mirrors(mirrors: &[String]) -> Option<String> {
        if mirrors.is_empty() {
            return None;
        }

        serde_json::to_string(mirrors).ok()
    }

    /// Percentage complete, when the size is known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> Option<f64> {
        let size = self.known_size().filter(|s| *s > 0)?;
        Some(self.downloaded_bytes() as f64 * 100.0 / size as f64)
    }
}

impl fmt::Display for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Download {{ id: {}, hash: {}, status: {} }}",
            self.id,
            self.content_hash,
            self.status()
        )
    }
}
