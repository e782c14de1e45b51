//! Public facade of the download engine.
//!
//! Owns the controllers map and every shared component; all user commands
//! (start/pause/resume/cancel/retry/delete) and startup recovery go through
//! here. One instance per process, injected into the serving boundary.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::bandwidth::BandwidthTracker;
use crate::client_pool::ClientPool;
use crate::config::DownloadConfig;
use crate::control::DownloadGate;
use crate::controller::{self, JobContext};
use crate::filename::media_filename;
use crate::job::ActiveJob;
use crate::progress::{ProgressBus, Subscription};
use crate::resolver::{best_stream, MetadataProvider};
use crate::store::{DownloadStore, JobRecord, JobStatus};

/// Grace period for workers to unwind after a cancel issued by `delete`.
const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Result of a `start` command.
#[derive(Debug)]
pub enum StartOutcome {
    /// Job accepted; a controller is running.
    Started,
    /// A record for this id already exists and `force` was false.
    AlreadyQueued(JobRecord),
    /// Resolution or persistence failed; no record was created.
    Failed(String),
}

impl StartOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, StartOutcome::Started)
    }
}

struct JobHandle {
    job: Arc<ActiveJob>,
    gate: Arc<DownloadGate>,
    task: Option<JoinHandle<()>>,
}

impl JobHandle {
    fn is_live(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

pub struct DownloadManager {
    cfg: Arc<DownloadConfig>,
    store: DownloadStore,
    bus: Arc<ProgressBus>,
    pool: Arc<ClientPool>,
    bandwidth: Arc<BandwidthTracker>,
    provider: Arc<dyn MetadataProvider>,
    jobs: Mutex<HashMap<String, JobHandle>>,
}

impl DownloadManager {
    /// Open the job database and assemble the engine. Call `recover` next to
    /// re-materialise jobs left active by a previous run.
    pub async fn new(cfg: DownloadConfig, provider: Arc<dyn MetadataProvider>) -> Result<Self> {
        let store = DownloadStore::open(&cfg.db_path).await?;
        let bus = Arc::new(ProgressBus::new(cfg.ws_throttle()));
        let pool = Arc::new(ClientPool::new(&cfg));
        Ok(Self {
            cfg: Arc::new(cfg),
            store,
            bus,
            pool,
            bandwidth: Arc::new(BandwidthTracker::new()),
            provider,
            jobs: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.cfg
    }

    /// Register a progress subscriber; the latest snapshot of every live job
    /// is replayed into it immediately.
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn unsubscribe(&self, id: u64) {
        self.bus.unsubscribe(id);
    }

    /// Accept a new job. With `force`, an existing record (and its file) is
    /// deleted first; without, the existing record is returned untouched.
    pub async fn start(&self, job_id: &str, force: bool) -> StartOutcome {
        match self.store.get(job_id).await {
            Err(e) => return StartOutcome::Failed(format!("store lookup failed: {e:#}")),
            Ok(Some(existing)) => {
                if !force {
                    return StartOutcome::AlreadyQueued(existing);
                }
                self.delete(job_id).await;
            }
            Ok(None) => {}
        }

        let info = match self.provider.resolve(job_id).await {
            Ok(info) => info,
            Err(e) => return StartOutcome::Failed(format!("metadata resolve failed: {e:#}")),
        };
        let Some(stream) = best_stream(&info.stream_urls) else {
            return StartOutcome::Failed("no usable stream found".to_string());
        };

        let display = info
            .subtitle
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| info.title.clone());
        let record = JobRecord::new(
            job_id,
            media_filename(job_id, &display),
            (!info.title.is_empty()).then(|| info.title.clone()),
            info.cover_url.clone(),
            stream.url.clone(),
        );
        if let Err(e) = self.store.insert_or_replace(&record).await {
            return StartOutcome::Failed(format!("persisting job failed: {e:#}"));
        }

        let job = Arc::new(ActiveJob::from_record(&record));
        self.bus.publish(&job.snapshot(None));

        let gate = Arc::new(DownloadGate::new(true));
        let mut jobs = self.jobs.lock().await;
        let task = self.spawn_controller(&job, &gate, false);
        jobs.insert(
            job_id.to_string(),
            JobHandle {
                job,
                gate,
                task: Some(task),
            },
        );
        tracing::info!("job {} started: {}", job_id, record.filename);
        StartOutcome::Started
    }

    /// Park a downloading job at its workers' next suspension point.
    /// Idempotent on already-paused jobs.
    pub async fn pause(&self, job_id: &str) -> bool {
        let jobs = self.jobs.lock().await;
        let Some(handle) = jobs.get(job_id) else {
            return false;
        };
        match handle.job.status() {
            JobStatus::Downloading => {
                handle.gate.pause();
                handle.job.set_status(JobStatus::Paused);
                handle.job.set_speed(0.0);
                if let Err(e) = self.store.set_status(job_id, JobStatus::Paused).await {
                    tracing::warn!("persisting pause for {} failed: {}", job_id, e);
                }
                self.bus.publish(&handle.job.snapshot(None));
                tracing::info!("job {} paused", job_id);
                true
            }
            JobStatus::Paused => true,
            _ => false,
        }
    }

    /// Unpark a paused job. A paused job recovered from a previous run has no
    /// live controller; one is spawned with `resume = true`.
    pub async fn resume(&self, job_id: &str) -> bool {
        let mut jobs = self.jobs.lock().await;
        let Some(handle) = jobs.get_mut(job_id) else {
            return false;
        };
        match handle.job.status() {
            JobStatus::Paused => {
                handle.job.set_status(JobStatus::Downloading);
                if let Err(e) = self.store.set_status(job_id, JobStatus::Downloading).await {
                    tracing::warn!("persisting resume for {} failed: {}", job_id, e);
                }
                handle.gate.resume();
                if !handle.is_live() {
                    let task = self.spawn_controller(&handle.job, &handle.gate, true);
                    handle.task = Some(task);
                }
                self.bus.publish(&handle.job.snapshot(None));
                tracing::info!("job {} resumed", job_id);
                true
            }
            JobStatus::Downloading => true,
            _ => false,
        }
    }

    /// Flag a job for cancellation and unpark its workers so they observe it.
    /// The partial file stays on disk; `delete` removes it.
    pub async fn cancel(&self, job_id: &str) -> bool {
        let jobs = self.jobs.lock().await;
        let Some(handle) = jobs.get(job_id) else {
            return false;
        };
        if !handle.job.status().is_active() {
            return false;
        }
        handle.gate.cancel();
        handle.job.set_status(JobStatus::Cancelled);
        handle.job.set_speed(0.0);
        if let Err(e) = self.store.set_status(job_id, JobStatus::Cancelled).await {
            tracing::warn!("persisting cancel for {} failed: {}", job_id, e);
        }
        self.bus.publish(&handle.job.snapshot(None));
        tracing::info!("job {} cancelled", job_id);
        true
    }

    /// Restart a failed job, preserving bytes already on disk. Refused once
    /// the retry quota is spent.
    pub async fn retry(&self, job_id: &str) -> bool {
        let Ok(Some(record)) = self.store.get(job_id).await else {
            return false;
        };
        {
            let jobs = self.jobs.lock().await;
            if let Some(handle) = jobs.get(job_id) {
                if handle.is_live() && handle.job.status().is_active() {
                    return false;
                }
            }
        }

        let attempt = record.retry_count + 1;
        if attempt > record.max_retries {
            let message = format!("retry limit reached ({})", record.max_retries);
            if let Err(e) = self.store.set_error_message(job_id, &message).await {
                tracing::warn!("persisting retry refusal for {} failed: {}", job_id, e);
            }
            let jobs = self.jobs.lock().await;
            if let Some(handle) = jobs.get(job_id) {
                handle.job.set_error_message(Some(message));
                self.bus.publish(&handle.job.snapshot(None));
            }
            return false;
        }

        if let Err(e) = self.store.begin_retry(job_id, attempt).await {
            tracing::warn!("persisting retry for {} failed: {}", job_id, e);
        }

        let mut revived = record;
        revived.status = JobStatus::Downloading;
        revived.error_message = None;
        revived.retry_count = attempt;
        let job = Arc::new(ActiveJob::from_record(&revived));
        self.bus.publish(&job.snapshot(None));

        let gate = Arc::new(DownloadGate::new(true));
        let mut jobs = self.jobs.lock().await;
        let task = self.spawn_controller(&job, &gate, true);
        jobs.insert(
            job_id.to_string(),
            JobHandle {
                job,
                gate,
                task: Some(task),
            },
        );
        tracing::info!("job {} retrying (attempt {})", job_id, attempt);
        true
    }

    /// Cancel (if active), remove the on-disk file, and drop the record and
    /// all in-memory state. File removal failures are logged and tolerated.
    pub async fn delete(&self, job_id: &str) -> bool {
        let record = match self.store.get(job_id).await {
            Ok(Some(record)) => record,
            _ => {
                self.jobs.lock().await.remove(job_id);
                return false;
            }
        };

        let was_active = {
            let jobs = self.jobs.lock().await;
            match jobs.get(job_id) {
                Some(handle) if handle.is_live() && handle.job.status().is_active() => {
                    handle.gate.cancel();
                    handle.job.set_status(JobStatus::Cancelled);
                    handle.job.set_speed(0.0);
                    self.bus.publish(&handle.job.snapshot(None));
                    true
                }
                _ => false,
            }
        };
        if was_active {
            tokio::time::sleep(CANCEL_GRACE).await;
        }

        let path = self.cfg.download_root.join(&record.filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::info!("removed file {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("removing {} failed ({}), continuing", path.display(), e),
        }

        let removed = match self.store.delete(job_id).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!("deleting record {} failed: {}", job_id, e);
                false
            }
        };

        self.jobs.lock().await.remove(job_id);
        self.bus.forget_job(job_id);
        removed
    }

    /// All persisted jobs, newest first.
    pub async fn list_history(&self) -> Result<Vec<JobRecord>> {
        self.store.list_all().await.context("list download history")
    }

    /// Re-materialise persisted `downloading`/`paused` jobs after a restart:
    /// downloading jobs resume immediately, paused jobs wait for `resume`.
    pub async fn recover(&self) -> Result<()> {
        let active = self.store.list_active().await?;
        let mut jobs = self.jobs.lock().await;
        for record in active {
            if jobs.contains_key(&record.job_id) {
                continue;
            }
            let running = record.status == JobStatus::Downloading;
            let job = Arc::new(ActiveJob::from_record(&record));
            let gate = Arc::new(DownloadGate::new(running));
            self.bus.publish(&job.snapshot(None));

            let task = running.then(|| self.spawn_controller(&job, &gate, true));
            tracing::info!(
                "recovered job {} ({})",
                record.job_id,
                record.status.as_str()
            );
            jobs.insert(record.job_id.clone(), JobHandle { job, gate, task });
        }
        Ok(())
    }

    /// Graceful shutdown: close pooled HTTP clients. Controllers are
    /// cooperative tasks and die with the runtime.
    pub fn shutdown(&self) {
        self.pool.close_all();
        tracing::info!("download manager shut down");
    }

    fn spawn_controller(
        &self,
        job: &Arc<ActiveJob>,
        gate: &Arc<DownloadGate>,
        resume: bool,
    ) -> JoinHandle<()> {
        let ctx = JobContext {
            cfg: Arc::clone(&self.cfg),
            store: self.store.clone(),
            bus: Arc::clone(&self.bus),
            pool: Arc::clone(&self.pool),
            bandwidth: Arc::clone(&self.bandwidth),
            job: Arc::clone(job),
            gate: Arc::clone(gate),
        };
        tokio::spawn(controller::run_job(ctx, resume))
    }
}
