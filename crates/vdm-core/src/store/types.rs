//! Types stored in the job database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Retry quota written into fresh job rows. Distinct from the per-attempt
/// budget of a worker (`DownloadConfig::max_retries`).
pub const DEFAULT_JOB_RETRY_LIMIT: i64 = 3;

/// Job lifecycle state, stored as a lowercase string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Downloading,
    Paused,
    Completed,
    Cancelled,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => JobStatus::Pending,
            "downloading" => JobStatus::Downloading,
            "paused" => JobStatus::Paused,
            "completed" => JobStatus::Completed,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Error,
        }
    }

    /// States with (potential) live work: a controller exists or may be spawned.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Downloading | JobStatus::Paused
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Error
        )
    }
}

/// One persisted download job.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: String,
    pub filename: String,
    pub title: Option<String>,
    pub cover_url: Option<String>,
    pub url: String,
    pub total_size: u64,
    pub downloaded: u64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub max_retries: i64,
}

impl JobRecord {
    /// Fresh pending record for a newly accepted job.
    pub fn new(
        job_id: impl Into<String>,
        filename: impl Into<String>,
        title: Option<String>,
        cover_url: Option<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            filename: filename.into(),
            title,
            cover_url,
            url: url.into(),
            total_size: 0,
            downloaded: 0,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            error_message: None,
            retry_count: 0,
            max_retries: DEFAULT_JOB_RETRY_LIMIT,
        }
    }
}
