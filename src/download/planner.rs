//! Chunk planning: choose between a ranged, chunked transfer and a single
//! stream, and partition a known size into fixed byte ranges.

use super::client::ProbeResult;
use crate::store::PlannedChunk;

/// How a transfer will be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferMode {
    /// One unranged GET streamed to the temp file; no chunk rows.
    Simple {
        /// Size reported by the probe, if any.
        size: Option<u64>,
    },
    /// Ranged GETs, one per chunk, into a preallocated temp file.
    Chunked {
        /// Total size in bytes.
        size: u64,
        /// Contiguous byte ranges covering `[0, size)`.
        plan: Vec<PlannedChunk>,
    },
}

impl TransferMode {
    /// Returns true for the chunked path.
    #[must_use]
    pub fn is_chunked(&self) -> bool {
        matches!(self, Self::Chunked { .. })
    }
}

/// Partitions `[0, size)` into `ceil(size / chunk_size)` inclusive ranges.
///
/// Every chunk is `chunk_size` bytes except the last, which ends at
/// `size - 1`. Identical inputs always yield an identical list. A zero size
/// or zero chunk size yields no chunks.
#[must_use]
pub fn plan_chunks(size: u64, chunk_size: u64) -> Vec<PlannedChunk> {
    if size == 0 || chunk_size == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::with_capacity(usize::try_from(size.div_ceil(chunk_size)).unwrap_or(0));
    let mut start = 0u64;
    let mut index = 0u32;
    while start < size {
        let end = start.saturating_add(chunk_size).min(size) - 1;
        chunks.push(PlannedChunk { index, start, end });
        start = end + 1;
        index += 1;
    }
    chunks
}

/// Picks the transfer mode for a probed resource.
///
/// Chunked only when the server honours ranges, the size is known, and the
/// size exceeds one chunk.
#[must_use]
pub fn plan_transfer(probe: ProbeResult, chunk_size: u64) -> TransferMode {
    match probe.size {
        Some(size) if probe.accepts_ranges && chunk_size > 0 && size > chunk_size => {
            TransferMode::Chunked {
                size,
                plan: plan_chunks(size, chunk_size),
            }
        }
        size => TransferMode::Simple { size },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB5: u64 = 5_242_880;

    #[test]
    fn test_plan_twelve_mib_into_three_chunks() {
        let plan = plan_chunks(12_582_912, MIB5);
        let ranges: Vec<(u32, u64, u64)> = plan.iter().map(|c| (c.index, c.start, c.end)).collect();
        assert_eq!(
            ranges,
            vec![
                (0, 0, 5_242_879),
                (1, 5_242_880, 10_485_759),
                (2, 10_485_760, 12_582_911),
            ]
        );
    }

    #[test]
    fn test_plan_covers_range_exactly() {
        for (size, chunk) in [(1, 1), (10, 3), (9, 3), (1_000_003, 4096), (MIB5 + 1, MIB5)] {
            let plan = plan_chunks(size, chunk);
            assert_eq!(plan.len() as u64, size.div_ceil(chunk), "size {size} chunk {chunk}");
            assert_eq!(plan.first().unwrap().start, 0);
            assert_eq!(plan.last().unwrap().end, size - 1);
            for pair in plan.windows(2) {
                assert_eq!(pair[1].start, pair[0].end + 1);
                assert_eq!(pair[1].index, pair[0].index + 1);
            }
            assert_eq!(plan.iter().map(PlannedChunk::len).sum::<u64>(), size);
        }
    }

    #[test]
    fn test_plan_is_deterministic() {
        assert_eq!(plan_chunks(77_777_777, MIB5), plan_chunks(77_777_777, MIB5));
    }

    #[test]
    fn test_plan_degenerate_inputs() {
        assert!(plan_chunks(0, MIB5).is_empty());
        assert!(plan_chunks(100, 0).is_empty());
    }

    #[test]
    fn test_transfer_mode_requires_ranges_and_size() {
        let no_ranges = ProbeResult {
            size: Some(12_582_912),
            accepts_ranges: false,
        };
        assert_eq!(
            plan_transfer(no_ranges, MIB5),
            TransferMode::Simple {
                size: Some(12_582_912)
            }
        );

        let unknown = ProbeResult {
            size: None,
            accepts_ranges: true,
        };
        assert_eq!(plan_transfer(unknown, MIB5), TransferMode::Simple { size: None });
    }

    #[test]
    fn test_transfer_mode_small_file_is_simple() {
        let exact = ProbeResult {
            size: Some(MIB5),
            accepts_ranges: true,
        };
        assert!(!plan_transfer(exact, MIB5).is_chunked());

        let bigger = ProbeResult {
            size: Some(MIB5 + 1),
            accepts_ranges: true,
        };
        match plan_transfer(bigger, MIB5) {
            TransferMode::Chunked { size, plan } => {
                assert_eq!(size, MIB5 + 1);
                assert_eq!(plan.len(), 2);
                assert_eq!(plan[1].start, MIB5);
                assert_eq!(plan[1].end, MIB5);
            }
            TransferMode::Simple { .. } => panic!("expected chunked"),
        }
    }
}
