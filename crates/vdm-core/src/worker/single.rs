//! Single-stream worker for servers without byte-range support.
//!
//! Downloads sequentially with the same pause/cancel and retry rules as the
//! segment worker. Resumed attempts request `bytes={downloaded}-`; a server
//! that answers 200 anyway forces a restart from offset zero. Database writes
//! are rate-limited to whole-percent progress steps.

use futures_util::StreamExt;
use reqwest::header::{ACCEPT_ENCODING, CONNECTION, RANGE};
use reqwest::Client;
use std::sync::Arc;
use std::time::Instant;

use super::{Backoff, WorkerError};
use crate::config::DownloadConfig;
use crate::control::DownloadGate;
use crate::job::ActiveJob;
use crate::progress::ProgressBus;
use crate::storage::StorageWriter;
use crate::store::DownloadStore;

pub(crate) struct SingleStreamCtx {
    pub client: Client,
    pub url: String,
    pub storage: StorageWriter,
    pub job: Arc<ActiveJob>,
    pub gate: Arc<DownloadGate>,
    pub cfg: Arc<DownloadConfig>,
    pub store: DownloadStore,
    pub bus: Arc<ProgressBus>,
    pub total_size: u64,
}

/// Run the transfer to completion. `Ok` means every byte is on disk;
/// `Err(Aborted)` means cancellation; any other error exhausted the attempt
/// budget.
pub(crate) async fn run(ctx: &SingleStreamCtx, resume: bool) -> Result<(), WorkerError> {
    let mut downloaded = if resume {
        ctx.storage.len()?.min(ctx.total_size)
    } else {
        0
    };
    ctx.job.set_downloaded(downloaded);

    // Nothing left to fetch; a ranged request past EOF would only 416.
    if ctx.total_size > 0 && downloaded >= ctx.total_size {
        return Ok(());
    }

    let mut attempts = 0u32;
    let mut backoff = Backoff::new();

    loop {
        if ctx.gate.checkpoint().await.is_err() {
            return Err(WorkerError::Aborted);
        }

        match attempt(ctx, &mut downloaded).await {
            Ok(()) => {
                ctx.job.set_downloaded(downloaded);
                if let Err(e) = ctx.store.set_downloaded(&ctx.job.job_id, downloaded).await {
                    tracing::warn!("final progress persist failed for {}: {}", ctx.job.job_id, e);
                }
                return Ok(());
            }
            Err(WorkerError::Aborted) => return Err(WorkerError::Aborted),
            Err(e) => {
                attempts += 1;
                if attempts >= ctx.cfg.max_retries {
                    return Err(e);
                }
                let delay = backoff.next_delay();
                tracing::warn!(
                    "single-stream attempt {}/{} for {} failed ({}), retrying in {:.1}s",
                    attempts,
                    ctx.cfg.max_retries,
                    ctx.job.job_id,
                    e,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn attempt(ctx: &SingleStreamCtx, downloaded: &mut u64) -> Result<(), WorkerError> {
    let mut request = ctx
        .client
        .get(&ctx.url)
        .header(CONNECTION, "keep-alive")
        .header(ACCEPT_ENCODING, "identity");
    if *downloaded > 0 {
        request = request.header(RANGE, format!("bytes={}-", downloaded));
    }

    let resp = request.send().await?;
    let status = resp.status().as_u16();
    if status != 200 && status != 206 {
        return Err(WorkerError::Status(status));
    }
    if status == 200 && *downloaded > 0 {
        // The server ignored our resume range; start over.
        tracing::debug!("{}: server ignored resume range, restarting", ctx.job.job_id);
        *downloaded = 0;
        ctx.job.set_downloaded(0);
    }

    let mut stream = resp.bytes_stream();
    let mut buffer: Vec<u8> = Vec::with_capacity(ctx.cfg.write_buffer);
    let mut last_update = Instant::now();
    let mut last_downloaded = *downloaded;
    let mut last_persisted = *downloaded;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        ctx.gate.checkpoint().await?;

        buffer.extend_from_slice(&chunk);
        if buffer.len() >= ctx.cfg.write_buffer {
            flush(ctx, downloaded, &mut buffer).await?;
        }

        let elapsed = last_update.elapsed();
        if elapsed >= ctx.cfg.progress_interval() {
            let speed = (*downloaded - last_downloaded) as f64 / elapsed.as_secs_f64();
            ctx.job.set_speed(speed);
            ctx.job.set_downloaded(*downloaded);

            // Persist only on >= 1% movement to keep the write rate bounded.
            if ctx.total_size > 0
                && (*downloaded - last_persisted) * 100 >= ctx.total_size
            {
                if let Err(e) = ctx.store.set_downloaded(&ctx.job.job_id, *downloaded).await {
                    tracing::warn!("progress persist failed for {}: {}", ctx.job.job_id, e);
                }
                last_persisted = *downloaded;
            }

            ctx.bus.publish(&ctx.job.snapshot(None));
            last_update = Instant::now();
            last_downloaded = *downloaded;
        }
    }
    if !buffer.is_empty() {
        flush(ctx, downloaded, &mut buffer).await?;
    }
    ctx.job.set_downloaded(*downloaded);

    if ctx.total_size > 0 && *downloaded != ctx.total_size {
        return Err(WorkerError::Incomplete {
            expected: ctx.total_size,
            received: *downloaded,
        });
    }
    Ok(())
}

async fn flush(
    ctx: &SingleStreamCtx,
    downloaded: &mut u64,
    buffer: &mut Vec<u8>,
) -> Result<(), WorkerError> {
    let data = std::mem::take(buffer);
    let len = data.len() as u64;
    ctx.storage.write_at_async(*downloaded, data).await?;
    *downloaded += len;
    Ok(())
}
