//! Chunk rows: contiguous byte ranges of a download.

use std::fmt;

use sqlx::FromRow;

/// Status of a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    /// Not yet fully written.
    Pending,
    /// Every byte of the range is on disk.
    Completed,
}

impl ChunkStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for ChunkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("invalid chunk status: {s}")),
        }
    }
}

/// A planned byte range, before it is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedChunk {
    /// 0-based position in the plan.
    pub index: u32,
    /// First byte, inclusive.
    pub start: u64,
    /// Last byte, inclusive.
    pub end: u64,
}

impl PlannedChunk {
    /// Number of bytes the range covers.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false: a planned range covers at least one byte.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// A persisted chunk.
#[derive(Debug, Clone, FromRow)]
pub struct Chunk {
    /// Row identifier.
    pub id: i64,
    /// Owning download.
    pub download_id: i64,
    /// 0-based position in the plan.
    pub chunk_index: i64,
    /// First byte, inclusive.
    pub start_byte: i64,
    /// Last byte, inclusive.
    pub end_byte: i64,
    /// Bytes written so far, relative to `start_byte`.
    pub downloaded: i64,
    /// Status (stored as text, parsed via `status()`).
    #[sqlx(rename = "status")]
    pub status_str: String,
}

impl Chunk {
    /// Returns the parsed status enum.
    ///
    /// Falls back to `Pending` if the status string is invalid.
    #[must_use]
    pub fn status(&self) -> ChunkStatus {
        self.status_str.parse().unwrap_or(ChunkStatus::Pending)
    }

    /// Returns true once the chunk is marked completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status() == ChunkStatus::Completed
    }

    /// Number of bytes the chunk covers.
    #[must_use]
    pub fn len(&self) -> u64 {
        u64::try_from(self.end_byte - self.start_byte + 1).unwrap_or(0)
    }

    /// Always false for a valid row.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes already written for this chunk.
    #[must_use]
    pub fn downloaded_bytes(&self) -> u64 {
        u64::try_from(self.downloaded).unwrap_or(0)
    }

    /// Absolute file offset the next byte belongs at.
    #[must_use]
    pub fn resume_offset(&self) -> u64 {
        u64::try_from(self.start_byte).unwrap_or(0) + self.downloaded_bytes()
    }

    /// Last byte of the range, inclusive.
    #[must_use]
    pub fn end(&self) -> u64 {
        u64::try_from(self.end_byte).unwrap_or(0)
    }

    /// `Range` header value covering only the bytes still missing.
    #[must_use]
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.resume_offset(), self.end())
    }

    /// Bytes the chunk contributes to its download's aggregate progress.
    #[must_use]
    pub fn progress_bytes(&self) -> u64 {
        if self.is_completed() {
            self.len()
        } else {
            self.downloaded_bytes()
        }
    }

    /// The range this row was planned from.
    #[must_use]
    pub fn planned(&self) -> PlannedChunk {
        PlannedChunk {
            index: u32::try_from(self.chunk_index).unwrap_or(0),
            start: u64::try_from(self.start_byte).unwrap_or(0),
            end: self.end(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(start: i64, end: i64, downloaded: i64, status: &str) -> Chunk {
        Chunk {
            id: 1,
            download_id: 1,
            chunk_index: 1,
            start_byte: start,
            end_byte: end,
            downloaded,
            status_str: status.to_string(),
        }
    }

    #[test]
    fn test_range_header_skips_written_bytes() {
        let c = chunk(5_242_880, 10_485_759, 1_048_576, "pending");
        assert_eq!(c.range_header(), "bytes=6291456-10485759");
        assert_eq!(c.resume_offset(), 6_291_456);
        assert_eq!(c.len(), 5_242_880);
    }

    #[test]
    fn test_progress_bytes_counts_completed_as_full() {
        assert_eq!(chunk(0, 99, 40, "completed").progress_bytes(), 100);
        assert_eq!(chunk(0, 99, 40, "pending").progress_bytes(), 40);
    }

    #[test]
    fn test_unknown_status_falls_back_to_pending() {
        assert_eq!(chunk(0, 9, 0, "weird").status(), ChunkStatus::Pending);
    }
}
