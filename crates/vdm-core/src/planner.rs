//! Range math and segment planning.
//!
//! Decides single-stream vs segmented transfer, adapts the segment count to
//! recent bandwidth, and splits `[0, total_size)` into contiguous inclusive
//! byte ranges. The split is front-loaded: the first third of the segments is
//! slightly smaller so early completions free connections for the tail.

use serde::Serialize;

use crate::config::DownloadConfig;

/// Reference throughput for adaptive segment counts (5 MiB/s).
const BASE_BANDWIDTH: f64 = 5.0 * 1024.0 * 1024.0;

/// Fraction of the even share given to front segments.
const FRONT_SHARE_NUM: u64 = 4;
const FRONT_SHARE_DEN: u64 = 5;

/// A single segment: byte range [start, end], both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: u64,
    pub end: u64,
}

impl Segment {
    /// Length of this segment in bytes.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// HTTP Range header value: `bytes=start-end`.
    pub fn range_header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Runtime status of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Pending,
    Downloading,
    Completed,
    Error,
}

/// Outcome of the planning decision for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferPlan {
    /// Sequential download; used when ranges are unsupported or the file is small.
    Single,
    Segmented(Vec<Segment>),
}

/// Chooses the transfer shape for a fresh job.
pub fn plan_transfer(
    total_size: u64,
    accept_ranges: bool,
    samples: &[f64],
    cfg: &DownloadConfig,
) -> TransferPlan {
    if !accept_ranges || total_size <= 2 * cfg.min_segment_size {
        return TransferPlan::Single;
    }
    let n = segment_count(total_size, samples, cfg);
    if n <= 1 {
        return TransferPlan::Single;
    }
    TransferPlan::Segmented(plan_segments(total_size, n))
}

/// Number of segments for a file, adapted to recent bandwidth samples once
/// enough of them exist.
pub fn segment_count(total_size: u64, samples: &[f64], cfg: &DownloadConfig) -> usize {
    let max = cfg.max_segments.max(1) as u64;
    let base = (total_size / cfg.min_segment_size.max(1)).clamp(1, max);

    if samples.len() >= cfg.bandwidth_sample_threshold {
        let avg = samples.iter().sum::<f64>() / samples.len() as f64;
        let factor = (avg / BASE_BANDWIDTH).clamp(0.5, 2.0);
        let adjusted = (base as f64 * factor).round() as u64;
        return adjusted.clamp(1, max) as usize;
    }

    base as usize
}

/// Builds a front-loaded segment plan covering `[0, total_size)` exactly.
///
/// The first `ceil(n/3)` segments get 0.8x the even share; the rest split the
/// remainder equally and the last segment absorbs rounding.
pub fn plan_segments(total_size: u64, segment_count: usize) -> Vec<Segment> {
    if total_size == 0 || segment_count == 0 {
        return Vec::new();
    }
    let n = segment_count as u64;
    if n == 1 || total_size <= n {
        return plan_even(total_size, segment_count);
    }

    let even = total_size.div_ceil(n);
    let front_count = n.div_ceil(3);
    let back_count = n - front_count;
    let front_len = (even * FRONT_SHARE_NUM / FRONT_SHARE_DEN).max(1);
    let front_total = front_len * front_count;

    if back_count == 0 || front_total >= total_size {
        return plan_even(total_size, segment_count);
    }
    let back_len = (total_size - front_total) / back_count;
    if back_len == 0 {
        return plan_even(total_size, segment_count);
    }

    let mut out = Vec::with_capacity(segment_count);
    let mut offset = 0u64;
    for _ in 0..front_count {
        let end = offset + front_len - 1;
        out.push(Segment { start: offset, end });
        offset = end + 1;
    }
    for i in 0..back_count {
        let end = if i == back_count - 1 {
            total_size - 1
        } else {
            offset + back_len - 1
        };
        out.push(Segment { start: offset, end });
        offset = end + 1;
    }
    out
}

/// Rebuilds the plan for a resumed job from the persisted byte count: one
/// completed head segment plus one contiguous segment for the remainder.
/// Returns `(segment, already_completed)` pairs partitioning `[0, total_size)`.
pub fn plan_resume(total_size: u64, downloaded: u64) -> Vec<(Segment, bool)> {
    if total_size == 0 {
        return Vec::new();
    }
    let full = Segment {
        start: 0,
        end: total_size - 1,
    };
    let downloaded = downloaded.min(total_size);
    if downloaded == 0 {
        return vec![(full, false)];
    }
    if downloaded >= total_size {
        return vec![(full, true)];
    }
    vec![
        (
            Segment {
                start: 0,
                end: downloaded - 1,
            },
            true,
        ),
        (
            Segment {
                start: downloaded,
                end: total_size - 1,
            },
            false,
        ),
    ]
}

/// Equal split, last segment takes the remainder. Fallback for degenerate
/// front-loaded inputs and the `n == 1` case.
fn plan_even(total_size: u64, segment_count: usize) -> Vec<Segment> {
    if total_size == 0 || segment_count == 0 {
        return Vec::new();
    }
    let n = (segment_count as u64).min(total_size);
    let base = total_size / n;
    let remainder = total_size % n;

    let mut out = Vec::with_capacity(n as usize);
    let mut offset = 0u64;
    for i in 0..n {
        let len = base + if i < remainder { 1 } else { 0 };
        out.push(Segment {
            start: offset,
            end: offset + len - 1,
        });
        offset += len;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partition(segments: &[Segment], total_size: u64) {
        assert!(!segments.is_empty());
        assert_eq!(segments[0].start, 0);
        assert_eq!(segments.last().unwrap().end, total_size - 1);
        for pair in segments.windows(2) {
            assert_eq!(pair[1].start, pair[0].end + 1, "gap or overlap in {pair:?}");
        }
        for s in segments {
            assert!(!s.is_empty());
        }
        let covered: u64 = segments.iter().map(Segment::len).sum();
        assert_eq!(covered, total_size);
    }

    #[test]
    fn plan_is_exact_partition() {
        for total in [1u64, 7, 100, 1000, 4096, 1 << 20, (1 << 20) + 13] {
            for n in 1..=8usize {
                let segs = plan_segments(total, n);
                assert_partition(&segs, total);
            }
        }
    }

    #[test]
    fn front_segments_are_smaller() {
        let total = 256 * 1024 * 1024u64;
        let segs = plan_segments(total, 6);
        assert_eq!(segs.len(), 6);
        assert_partition(&segs, total);
        // ceil(6/3) = 2 front segments at 0.8x the even share.
        assert!(segs[0].len() < segs[2].len());
        assert_eq!(segs[0].len(), segs[1].len());
    }

    #[test]
    fn quarter_gib_with_defaults_yields_four_segments() {
        let cfg = DownloadConfig::default();
        let total = 256 * 1024 * 1024u64;
        match plan_transfer(total, true, &[], &cfg) {
            TransferPlan::Segmented(segs) => {
                assert_eq!(segs.len(), 4);
                assert_partition(&segs, total);
                assert_eq!(segs.last().unwrap().end, 268_435_455);
            }
            TransferPlan::Single => panic!("expected segmented plan"),
        }
    }

    #[test]
    fn small_or_rangeless_files_stream_single() {
        let cfg = DownloadConfig::default();
        assert_eq!(
            plan_transfer(2 * cfg.min_segment_size, true, &[], &cfg),
            TransferPlan::Single
        );
        assert_eq!(
            plan_transfer(1 << 40, false, &[], &cfg),
            TransferPlan::Single
        );
    }

    #[test]
    fn bandwidth_raises_and_lowers_segment_count() {
        let cfg = DownloadConfig::default();
        let total = 4 * cfg.min_segment_size;
        assert_eq!(segment_count(total, &[], &cfg), 4);

        // Fast link: factor capped at 2.0.
        let fast = vec![20.0 * 1024.0 * 1024.0; 5];
        assert_eq!(segment_count(total, &fast, &cfg), 8);

        // Slow link: factor floored at 0.5.
        let slow = vec![512.0 * 1024.0; 5];
        assert_eq!(segment_count(total, &slow, &cfg), 2);

        // Below the sample threshold the base count wins.
        let few = vec![20.0 * 1024.0 * 1024.0; 4];
        assert_eq!(segment_count(total, &few, &cfg), 4);
    }

    #[test]
    fn resume_plan_partitions_with_completed_head() {
        let plan = plan_resume(1000, 400);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0], (Segment { start: 0, end: 399 }, true));
        assert_eq!(plan[1], (Segment { start: 400, end: 999 }, false));

        let fresh = plan_resume(1000, 0);
        assert_eq!(fresh, vec![(Segment { start: 0, end: 999 }, false)]);

        let done = plan_resume(1000, 1000);
        assert_eq!(done, vec![(Segment { start: 0, end: 999 }, true)]);
    }

    #[test]
    fn segment_range_header() {
        let s = Segment { start: 10, end: 99 };
        assert_eq!(s.range_header_value(), "bytes=10-99");
        assert_eq!(s.len(), 90);
    }
}
