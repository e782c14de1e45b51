//! Live, in-memory state of a job with an (actual or potential) controller.
//!
//! Workers and the progress emitter mutate the atomic counters; everything
//! else reads through snapshots. The persisted row is authoritative across
//! restarts, this struct within a session.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::progress::{round2, ProgressSnapshot};
use crate::store::{JobRecord, JobStatus};
use crate::worker::SegmentState;

pub(crate) struct ActiveJob {
    pub job_id: String,
    pub filename: String,
    pub title: Option<String>,
    pub cover_url: Option<String>,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub max_retries: i64,
    retry_count: AtomicI64,
    total_size: AtomicU64,
    downloaded: AtomicU64,
    status: Mutex<JobStatus>,
    speed: Mutex<f64>,
    error_message: Mutex<Option<String>>,
    completed_at: Mutex<Option<DateTime<Utc>>>,
}

impl ActiveJob {
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            job_id: record.job_id.clone(),
            filename: record.filename.clone(),
            title: record.title.clone(),
            cover_url: record.cover_url.clone(),
            url: record.url.clone(),
            created_at: record.created_at,
            max_retries: record.max_retries,
            retry_count: AtomicI64::new(record.retry_count),
            total_size: AtomicU64::new(record.total_size),
            downloaded: AtomicU64::new(record.downloaded),
            status: Mutex::new(record.status),
            speed: Mutex::new(0.0),
            error_message: Mutex::new(record.error_message.clone()),
            completed_at: Mutex::new(record.completed_at),
        }
    }

    pub fn status(&self) -> JobStatus {
        *self.status.lock().unwrap()
    }

    pub fn set_status(&self, status: JobStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn total_size(&self) -> u64 {
        self.total_size.load(Ordering::Relaxed)
    }

    pub fn set_total_size(&self, total: u64) {
        self.total_size.store(total, Ordering::Relaxed);
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    pub fn set_downloaded(&self, downloaded: u64) {
        self.downloaded.store(downloaded, Ordering::Relaxed);
    }

    pub fn set_speed(&self, speed: f64) {
        *self.speed.lock().unwrap() = speed;
    }

    pub fn retry_count(&self) -> i64 {
        self.retry_count.load(Ordering::Relaxed)
    }

    pub fn set_retry_count(&self, count: i64) {
        self.retry_count.store(count, Ordering::Relaxed);
    }

    pub fn set_error_message(&self, message: Option<String>) {
        *self.error_message.lock().unwrap() = message;
    }

    pub fn set_completed_at(&self, at: Option<DateTime<Utc>>) {
        *self.completed_at.lock().unwrap() = at;
    }

    /// Immutable copy of the public state; `segments` is included only for
    /// segmented transfers.
    pub fn snapshot(&self, segments: Option<&[Arc<SegmentState>]>) -> ProgressSnapshot {
        ProgressSnapshot {
            job_id: self.job_id.clone(),
            filename: self.filename.clone(),
            title: self.title.clone(),
            cover_url: self.cover_url.clone(),
            url: self.url.clone(),
            total_size: self.total_size(),
            downloaded: self.downloaded(),
            status: self.status(),
            speed: round2(*self.speed.lock().unwrap()),
            error_message: self.error_message.lock().unwrap().clone(),
            retry_count: self.retry_count(),
            max_retries: self.max_retries,
            created_at: self.created_at,
            completed_at: *self.completed_at.lock().unwrap(),
            segments: segments.map(|segs| segs.iter().map(|s| s.snapshot()).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::Segment;

    #[test]
    fn snapshot_reflects_live_state() {
        let record = JobRecord::new("j1", "j1_t.mp4", Some("t".into()), None, "http://e/v");
        let job = ActiveJob::from_record(&record);
        job.set_total_size(1000);
        job.set_downloaded(250);
        job.set_status(JobStatus::Downloading);
        job.set_speed(123.456);

        let snap = job.snapshot(None);
        assert_eq!(snap.total_size, 1000);
        assert_eq!(snap.downloaded, 250);
        assert_eq!(snap.status, JobStatus::Downloading);
        assert_eq!(snap.speed, 123.46);
        assert!(snap.segments.is_none());
    }

    #[test]
    fn snapshot_includes_segments_when_given() {
        let record = JobRecord::new("j2", "j2_t.mp4", None, None, "http://e/v");
        let job = ActiveJob::from_record(&record);
        let segs = vec![Arc::new(SegmentState::new(Segment { start: 0, end: 99 }))];
        let snap = job.snapshot(Some(&segs));
        let segments = snap.segments.expect("segments present");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].end, 99);
    }
}
