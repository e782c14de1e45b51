//! Progress snapshots and their fan-out to subscribers.

pub mod bus;
mod throttle;

pub use bus::{ProgressBus, Subscription};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::planner::SegmentStatus;
use crate::store::JobStatus;

/// Public view of one segment at a single instant.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentSnapshot {
    pub start: u64,
    pub end: u64,
    pub downloaded: u64,
    pub status: SegmentStatus,
}

/// Immutable copy of a job's public state, serialised as JSON for transports.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub job_id: String,
    pub filename: String,
    pub title: Option<String>,
    pub cover_url: Option<String>,
    pub url: String,
    pub total_size: u64,
    pub downloaded: u64,
    pub status: JobStatus,
    /// Bytes per second, rounded to two decimals.
    pub speed: f64,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub max_retries: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Present only for segmented transfers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<SegmentSnapshot>>,
}

/// Round a rate to two decimal places for display and serialisation.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
