//! SQLite-backed job database implementation.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

use super::types::{JobRecord, JobStatus};

/// Handle to the SQLite-backed download database.
#[derive(Clone)]
pub struct DownloadStore {
    pool: Pool<Sqlite>,
}

impl DownloadStore {
    /// Open (or create) the database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create db directory {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .with_context(|| format!("open download db {}", path.display()))?;

        let store = DownloadStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                job_id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                title TEXT,
                cover_url TEXT,
                url TEXT NOT NULL,
                total_size INTEGER,
                downloaded INTEGER DEFAULT 0,
                status TEXT DEFAULT 'pending',
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                completed_at TIMESTAMP,
                error_message TEXT,
                retry_count INTEGER DEFAULT 0,
                max_retries INTEGER DEFAULT 3
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a job row, replacing any previous row with the same id.
    pub async fn insert_or_replace(&self, record: &JobRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO downloads (
                job_id, filename, title, cover_url, url,
                total_size, downloaded, status, created_at, completed_at,
                error_message, retry_count, max_retries
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&record.job_id)
        .bind(&record.filename)
        .bind(&record.title)
        .bind(&record.cover_url)
        .bind(&record.url)
        .bind(record.total_size as i64)
        .bind(record.downloaded as i64)
        .bind(record.status.as_str())
        .bind(record.created_at.to_rfc3339())
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .bind(&record.error_message)
        .bind(record.retry_count)
        .bind(record.max_retries)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch a single job row.
    pub async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let row = sqlx::query("SELECT * FROM downloads WHERE job_id = ?1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| record_from_row(&r)))
    }

    /// All jobs, newest first.
    pub async fn list_all(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query("SELECT * FROM downloads ORDER BY created_at DESC, rowid DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(record_from_row).collect())
    }

    /// Jobs needing re-materialisation after a restart.
    pub async fn list_active(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM downloads
            WHERE status IN ('downloading', 'paused')
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(record_from_row).collect())
    }

    /// Remove a job row. Returns false when no row existed.
    pub async fn delete(&self, job_id: &str) -> Result<bool> {
        let r = sqlx::query("DELETE FROM downloads WHERE job_id = ?1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() > 0)
    }

    pub async fn set_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        sqlx::query("UPDATE downloads SET status = ?1 WHERE job_id = ?2")
            .bind(status.as_str())
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_total_size(&self, job_id: &str, total_size: u64) -> Result<()> {
        sqlx::query("UPDATE downloads SET total_size = ?1 WHERE job_id = ?2")
            .bind(total_size as i64)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Durable progress: persisted so a crash resumes from here.
    pub async fn set_downloaded(&self, job_id: &str, downloaded: u64) -> Result<()> {
        sqlx::query("UPDATE downloads SET downloaded = ?1 WHERE job_id = ?2")
            .bind(downloaded as i64)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_completed(
        &self,
        job_id: &str,
        total_size: u64,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE downloads
            SET status = 'completed',
                downloaded = ?1,
                total_size = ?1,
                completed_at = ?2
            WHERE job_id = ?3
            "#,
        )
        .bind(total_size as i64)
        .bind(completed_at.to_rfc3339())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_error(&self, job_id: &str, message: &str) -> Result<()> {
        sqlx::query("UPDATE downloads SET status = 'error', error_message = ?1 WHERE job_id = ?2")
            .bind(message)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record why a retry was refused without touching the status.
    pub async fn set_error_message(&self, job_id: &str, message: &str) -> Result<()> {
        sqlx::query("UPDATE downloads SET error_message = ?1 WHERE job_id = ?2")
            .bind(message)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Accepted retry: clear the error, bump the counter, go back to downloading.
    pub async fn begin_retry(&self, job_id: &str, retry_count: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE downloads
            SET status = 'downloading',
                error_message = NULL,
                retry_count = ?1
            WHERE job_id = ?2
            "#,
        )
        .bind(retry_count)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Maps a row into a record, tolerating NULLs and rows written by older
/// schemas: absent optional values take their documented defaults.
fn record_from_row(row: &SqliteRow) -> JobRecord {
    let status: Option<String> = row.try_get("status").unwrap_or(None);
    let created_at: Option<String> = row.try_get("created_at").unwrap_or(None);
    let completed_at: Option<String> = row.try_get("completed_at").unwrap_or(None);

    JobRecord {
        job_id: row.get("job_id"),
        filename: row.get("filename"),
        title: row.try_get("title").unwrap_or(None),
        cover_url: row.try_get("cover_url").unwrap_or(None),
        url: row.get("url"),
        total_size: row
            .try_get::<Option<i64>, _>("total_size")
            .unwrap_or(None)
            .unwrap_or(0)
            .max(0) as u64,
        downloaded: row
            .try_get::<Option<i64>, _>("downloaded")
            .unwrap_or(None)
            .unwrap_or(0)
            .max(0) as u64,
        status: status
            .as_deref()
            .map(JobStatus::parse)
            .unwrap_or(JobStatus::Pending),
        created_at: created_at
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now),
        completed_at: completed_at.as_deref().and_then(parse_timestamp),
        error_message: row.try_get("error_message").unwrap_or(None),
        retry_count: row
            .try_get::<Option<i64>, _>("retry_count")
            .unwrap_or(None)
            .unwrap_or(0),
        max_retries: row
            .try_get::<Option<i64>, _>("max_retries")
            .unwrap_or(None)
            .unwrap_or(super::types::DEFAULT_JOB_RETRY_LIMIT),
    }
}

/// Accepts RFC 3339 (what we write) and SQLite's CURRENT_TIMESTAMP format
/// (what legacy rows may carry).
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Open an in-memory database for tests (no disk I/O).
    async fn open_memory() -> Result<DownloadStore> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = DownloadStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    fn record(job_id: &str) -> JobRecord {
        JobRecord::new(
            job_id,
            format!("{job_id}_title.mp4"),
            Some("Title".to_string()),
            None,
            "https://cdn.example.com/v.mp4",
        )
    }

    #[tokio::test]
    async fn insert_get_list_delete_roundtrip() {
        let store = open_memory().await.unwrap();
        assert!(store.list_all().await.unwrap().is_empty());

        store.insert_or_replace(&record("a")).await.unwrap();
        store.insert_or_replace(&record("b")).await.unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
        // Newest first.
        assert_eq!(all[0].job_id, "b");
        assert_eq!(all[1].job_id, "a");

        let a = store.get("a").await.unwrap().expect("job exists");
        assert_eq!(a.status, JobStatus::Pending);
        assert_eq!(a.downloaded, 0);
        assert_eq!(a.max_retries, 3);

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_and_progress_updates() {
        let store = open_memory().await.unwrap();
        store.insert_or_replace(&record("x")).await.unwrap();

        store.set_status("x", JobStatus::Downloading).await.unwrap();
        store.set_total_size("x", 1000).await.unwrap();
        store.set_downloaded("x", 400).await.unwrap();

        let x = store.get("x").await.unwrap().unwrap();
        assert_eq!(x.status, JobStatus::Downloading);
        assert_eq!(x.total_size, 1000);
        assert_eq!(x.downloaded, 400);

        let done_at = Utc::now();
        store.mark_completed("x", 1000, done_at).await.unwrap();
        let x = store.get("x").await.unwrap().unwrap();
        assert_eq!(x.status, JobStatus::Completed);
        assert_eq!(x.downloaded, 1000);
        let completed = x.completed_at.expect("completed_at set");
        assert!((completed - done_at).num_seconds().abs() <= 1);
    }

    #[tokio::test]
    async fn list_active_filters_statuses() {
        let store = open_memory().await.unwrap();
        for id in ["p", "d", "c"] {
            store.insert_or_replace(&record(id)).await.unwrap();
        }
        store.set_status("p", JobStatus::Paused).await.unwrap();
        store.set_status("d", JobStatus::Downloading).await.unwrap();
        store.set_status("c", JobStatus::Completed).await.unwrap();

        let active = store.list_active().await.unwrap();
        let ids: Vec<_> = active.iter().map(|r| r.job_id.as_str()).collect();
        assert_eq!(active.len(), 2);
        assert!(ids.contains(&"p"));
        assert!(ids.contains(&"d"));
    }

    #[tokio::test]
    async fn error_and_retry_cycle() {
        let store = open_memory().await.unwrap();
        store.insert_or_replace(&record("e")).await.unwrap();

        store.set_error("e", "partial segment failure").await.unwrap();
        let e = store.get("e").await.unwrap().unwrap();
        assert_eq!(e.status, JobStatus::Error);
        assert_eq!(e.error_message.as_deref(), Some("partial segment failure"));

        store.begin_retry("e", 1).await.unwrap();
        let e = store.get("e").await.unwrap().unwrap();
        assert_eq!(e.status, JobStatus::Downloading);
        assert_eq!(e.retry_count, 1);
        assert!(e.error_message.is_none());

        store.set_error_message("e", "retry limit reached").await.unwrap();
        let e = store.get("e").await.unwrap().unwrap();
        assert_eq!(e.status, JobStatus::Downloading);
        assert_eq!(e.error_message.as_deref(), Some("retry limit reached"));
    }

    #[tokio::test]
    async fn tolerates_rows_with_missing_optionals() {
        let store = open_memory().await.unwrap();
        // Row written by an older schema: only the NOT NULL columns.
        sqlx::query("INSERT INTO downloads (job_id, filename, url) VALUES ('old', 'f.mp4', 'http://e/v')")
            .execute(&store.pool)
            .await
            .unwrap();

        let old = store.get("old").await.unwrap().unwrap();
        assert_eq!(old.status, JobStatus::Pending);
        assert_eq!(old.total_size, 0);
        assert_eq!(old.downloaded, 0);
        assert_eq!(old.retry_count, 0);
        assert_eq!(old.max_retries, 3);
        assert!(old.completed_at.is_none());
        // SQLite's CURRENT_TIMESTAMP default parses too.
        assert!(old.created_at <= Utc::now() + chrono::Duration::seconds(1));
    }
}
