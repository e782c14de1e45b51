//! Transfer workers: shared state, attempt errors, and retry backoff.

pub(crate) mod segment;
pub(crate) mod single;

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use thiserror::Error;

use crate::control::JobAborted;
use crate::planner::{Segment, SegmentStatus};
use crate::progress::SegmentSnapshot;

/// Runtime state of one segment, shared between its worker and the progress
/// emitter. `downloaded` advances only after bytes reach the file, so a
/// restart can trust it.
pub struct SegmentState {
    pub range: Segment,
    downloaded: AtomicU64,
    status: AtomicU8,
}

impl SegmentState {
    pub fn new(range: Segment) -> Self {
        Self {
            range,
            downloaded: AtomicU64::new(0),
            status: AtomicU8::new(SegmentStatus::Pending as u8),
        }
    }

    /// State for a range whose bytes are already on disk (resume).
    pub fn completed(range: Segment) -> Self {
        let state = Self::new(range);
        state.downloaded.store(range.len(), Ordering::Relaxed);
        state.set_status(SegmentStatus::Completed);
        state
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    pub fn add_downloaded(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn status(&self) -> SegmentStatus {
        match self.status.load(Ordering::Relaxed) {
            0 => SegmentStatus::Pending,
            1 => SegmentStatus::Downloading,
            2 => SegmentStatus::Completed,
            _ => SegmentStatus::Error,
        }
    }

    pub fn set_status(&self, status: SegmentStatus) {
        self.status.store(status as u8, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SegmentSnapshot {
        SegmentSnapshot {
            start: self.range.start,
            end: self.range.end,
            downloaded: self.downloaded(),
            status: self.status(),
        }
    }
}

/// Failure of a single transfer attempt. Everything except `Aborted` is
/// retried against the attempt budget; bytes already flushed are kept.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("job aborted by user")]
    Aborted,
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("storage: {0}")]
    Storage(#[from] std::io::Error),
    #[error("incomplete transfer: {received} of {expected} bytes")]
    Incomplete { expected: u64, received: u64 },
}

impl From<JobAborted> for WorkerError {
    fn from(_: JobAborted) -> Self {
        WorkerError::Aborted
    }
}

/// Exponential backoff between attempts: 1 s, then x1.5 per failure, capped
/// at 30 s.
pub(crate) struct Backoff {
    delay: Duration,
}

const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

impl Backoff {
    pub(crate) fn new() -> Self {
        Self {
            delay: BACKOFF_START,
        }
    }

    /// Delay to sleep before the next attempt; grows on each call.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let current = self.delay;
        self.delay = Duration::from_secs_f64(self.delay.as_secs_f64() * 1.5).min(BACKOFF_CAP);
        current
    }
}
