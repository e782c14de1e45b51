//! Per-job controller: probe, plan, spawn workers, emit progress, reconcile.
//!
//! One controller task per job. Pause parks the workers (the controller stays
//! alive); cancel unwinds them; completion and partial failure are reconciled
//! here after every worker has returned.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::bandwidth::BandwidthTracker;
use crate::client_pool::ClientPool;
use crate::config::DownloadConfig;
use crate::control::DownloadGate;
use crate::head;
use crate::job::ActiveJob;
use crate::planner::{self, SegmentStatus, TransferPlan};
use crate::progress::ProgressBus;
use crate::storage::StorageWriter;
use crate::store::{DownloadStore, JobStatus};
use crate::worker::{self, SegmentState};

/// Everything a controller needs, injected by the manager.
pub(crate) struct JobContext {
    pub cfg: Arc<DownloadConfig>,
    pub store: DownloadStore,
    pub bus: Arc<ProgressBus>,
    pub pool: Arc<ClientPool>,
    pub bandwidth: Arc<BandwidthTracker>,
    pub job: Arc<ActiveJob>,
    pub gate: Arc<DownloadGate>,
}

/// Drive one job to a terminal state (or leave it paused, parked inside the
/// workers). `resume` preserves bytes already on disk.
pub(crate) async fn run_job(ctx: JobContext, resume: bool) {
    let path = ctx.cfg.download_root.join(&ctx.job.filename);

    if let Err(e) = run_inner(&ctx, &path, resume).await {
        if ctx.gate.is_cancelled() {
            finish_cancelled(&ctx).await;
            return;
        }
        let message = format!("download failed: {e:#}");
        tracing::error!("job {}: {}", ctx.job.job_id, message);
        finish_error(&ctx, &message).await;

        // A fresh attempt owns its partial file; resumed bytes are kept.
        if !resume {
            if let Err(fe) = tokio::fs::remove_file(&path).await {
                if fe.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("removing failed partial {} failed: {}", path.display(), fe);
                }
            }
        }
    }
}

async fn run_inner(ctx: &JobContext, path: &Path, resume: bool) -> Result<()> {
    tokio::fs::create_dir_all(&ctx.cfg.download_root)
        .await
        .with_context(|| format!("create download root {}", ctx.cfg.download_root.display()))?;

    let client = ctx.pool.get(&ctx.job.url)?;
    let probe = head::probe(&client, &ctx.job.url, ctx.cfg.request_timeout())
        .await
        .context("size probe failed")?;
    let total = probe.total_size;

    if !resume {
        if let Ok(meta) = tokio::fs::metadata(path).await {
            if meta.len() == total {
                // Already fully present on disk.
                ctx.job.set_total_size(total);
                ctx.job.set_downloaded(total);
                finish_completed(ctx, total, None).await;
                return Ok(());
            }
            // Stale partial from an abandoned run; start clean.
            tracing::debug!("removing stale partial {} for clean restart", path.display());
            tokio::fs::remove_file(path).await.ok();
        }
    }

    ctx.job.set_total_size(total);
    if !resume {
        if let Err(e) = ctx.store.set_total_size(&ctx.job.job_id, total).await {
            tracing::warn!("persisting total size for {} failed: {}", ctx.job.job_id, e);
        }
    }
    ctx.job.set_status(JobStatus::Downloading);
    if let Err(e) = ctx.store.set_status(&ctx.job.job_id, JobStatus::Downloading).await {
        tracing::warn!("persisting status for {} failed: {}", ctx.job.job_id, e);
    }
    ctx.bus.publish(&ctx.job.snapshot(None));

    let resume_from = if resume {
        ctx.job.downloaded().min(total)
    } else {
        0
    };

    let plan = planner::plan_transfer(
        total,
        probe.accept_ranges,
        &ctx.bandwidth.samples(),
        &ctx.cfg,
    );
    match plan {
        TransferPlan::Single => run_single(ctx, path, total, resume, client).await,
        TransferPlan::Segmented(segments) => {
            tracing::info!(
                "job {}: {} bytes in {} segments",
                ctx.job.job_id,
                total,
                segments.len()
            );
            let states: Vec<Arc<SegmentState>> = if resume_from > 0 {
                planner::plan_resume(total, resume_from)
                    .into_iter()
                    .map(|(range, done)| {
                        Arc::new(if done {
                            SegmentState::completed(range)
                        } else {
                            SegmentState::new(range)
                        })
                    })
                    .collect()
            } else {
                segments
                    .into_iter()
                    .map(|range| Arc::new(SegmentState::new(range)))
                    .collect()
            };
            run_segmented(ctx, path, total, states, client).await
        }
    }
}

async fn run_single(
    ctx: &JobContext,
    path: &Path,
    total: u64,
    resume: bool,
    client: reqwest::Client,
) -> Result<()> {
    let storage =
        StorageWriter::open(path).with_context(|| format!("open target {}", path.display()))?;

    let sctx = worker::single::SingleStreamCtx {
        client,
        url: ctx.job.url.clone(),
        storage,
        job: Arc::clone(&ctx.job),
        gate: Arc::clone(&ctx.gate),
        cfg: Arc::clone(&ctx.cfg),
        store: ctx.store.clone(),
        bus: Arc::clone(&ctx.bus),
        total_size: total,
    };

    let start = Instant::now();
    match worker::single::run(&sctx, resume).await {
        Ok(()) => {
            sctx.storage.sync().context("sync target file")?;
            ctx.bandwidth.record(total, start.elapsed());
            finish_completed(ctx, total, None).await;
            Ok(())
        }
        Err(worker::WorkerError::Aborted) => {
            finish_cancelled(ctx).await;
            Ok(())
        }
        Err(e) => Err(e).context("single-stream download failed"),
    }
}

async fn run_segmented(
    ctx: &JobContext,
    path: &Path,
    total: u64,
    states: Vec<Arc<SegmentState>>,
    client: reqwest::Client,
) -> Result<()> {
    let storage =
        StorageWriter::open(path).with_context(|| format!("open target {}", path.display()))?;
    storage
        .preallocate(total)
        .with_context(|| format!("preallocate {} bytes", total))?;

    let states = Arc::new(states);
    let start = Instant::now();

    let (stop_tx, stop_rx) = oneshot::channel();
    let emitter = tokio::spawn(progress_emitter(
        Arc::clone(&ctx.job),
        Arc::clone(&states),
        ctx.store.clone(),
        Arc::clone(&ctx.bus),
        Arc::clone(&ctx.gate),
        ctx.cfg.progress_interval(),
        stop_rx,
    ));

    let semaphore = Arc::new(Semaphore::new(states.len().max(1)));
    let mut workers = JoinSet::new();
    for state in states.iter() {
        if state.status() == SegmentStatus::Completed {
            continue;
        }
        let client = client.clone();
        let url = ctx.job.url.clone();
        let storage = storage.clone();
        let state = Arc::clone(state);
        let gate = Arc::clone(&ctx.gate);
        let cfg = Arc::clone(&ctx.cfg);
        let semaphore = Arc::clone(&semaphore);
        workers.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            worker::segment::run(&client, &url, &storage, &state, &gate, &cfg).await;
        });
    }
    while workers.join_next().await.is_some() {}

    let _ = stop_tx.send(());
    let _ = emitter.await;

    if ctx.gate.is_cancelled() {
        finish_cancelled(ctx).await;
        return Ok(());
    }

    let all_completed = states
        .iter()
        .all(|s| s.status() == SegmentStatus::Completed);
    if !all_completed {
        // Segment progress is already persisted; `retry` resumes from it.
        finish_error(ctx, "partial segment failure").await;
        return Ok(());
    }

    storage.sync().context("sync target file")?;
    ctx.job.set_downloaded(total);
    ctx.bandwidth.record(total, start.elapsed());
    finish_completed(ctx, total, Some(&states)).await;
    Ok(())
}

/// Periodically folds segment counters into the job, persists progress, and
/// publishes a snapshot. Parks (without emitting) while the job is paused.
async fn progress_emitter(
    job: Arc<ActiveJob>,
    states: Arc<Vec<Arc<SegmentState>>>,
    store: DownloadStore,
    bus: Arc<ProgressBus>,
    gate: Arc<DownloadGate>,
    interval: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_tick = Instant::now();
    let mut last_downloaded = job.downloaded();

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                if gate.is_cancelled() {
                    break;
                }
                if gate.is_paused() {
                    last_tick = Instant::now();
                    last_downloaded = states.iter().map(|s| s.downloaded()).sum();
                    continue;
                }

                let downloaded: u64 = states.iter().map(|s| s.downloaded()).sum();
                let elapsed = last_tick.elapsed().as_secs_f64();
                let speed = if elapsed > 0.0 {
                    downloaded.saturating_sub(last_downloaded) as f64 / elapsed
                } else {
                    0.0
                };

                job.set_downloaded(downloaded);
                job.set_speed(speed);
                if let Err(e) = store.set_downloaded(&job.job_id, downloaded).await {
                    tracing::warn!("progress persist failed for {}: {}", job.job_id, e);
                }
                bus.publish(&job.snapshot(Some(&states)));

                last_tick = Instant::now();
                last_downloaded = downloaded;
            }
        }
    }
}

async fn finish_completed(
    ctx: &JobContext,
    total: u64,
    segments: Option<&[Arc<SegmentState>]>,
) {
    let now = Utc::now();
    ctx.job.set_status(JobStatus::Completed);
    ctx.job.set_downloaded(total);
    ctx.job.set_total_size(total);
    ctx.job.set_completed_at(Some(now));
    ctx.job.set_speed(0.0);
    if let Err(e) = ctx.store.mark_completed(&ctx.job.job_id, total, now).await {
        tracing::warn!("persisting completion for {} failed: {}", ctx.job.job_id, e);
    }
    ctx.bus.publish(&ctx.job.snapshot(segments));
    tracing::info!("job {} completed ({} bytes)", ctx.job.job_id, total);
}

async fn finish_error(ctx: &JobContext, message: &str) {
    ctx.job.set_status(JobStatus::Error);
    ctx.job.set_error_message(Some(message.to_string()));
    ctx.job.set_speed(0.0);
    if let Err(e) = ctx.store.set_error(&ctx.job.job_id, message).await {
        tracing::warn!("persisting error state for {} failed: {}", ctx.job.job_id, e);
    }
    ctx.bus.publish(&ctx.job.snapshot(None));
}

async fn finish_cancelled(ctx: &JobContext) {
    ctx.job.set_status(JobStatus::Cancelled);
    ctx.job.set_speed(0.0);
    if let Err(e) = ctx
        .store
        .set_status(&ctx.job.job_id, JobStatus::Cancelled)
        .await
    {
        tracing::warn!("persisting cancel for {} failed: {}", ctx.job.job_id, e);
    }
    ctx.bus.publish(&ctx.job.snapshot(None));
    tracing::info!("job {} cancelled", ctx.job.job_id);
}
