//! Segment worker: one HTTP Range GET per attempt, positional writes.
//!
//! An attempt always re-derives its start offset from `SegmentState`, so
//! bytes flushed by a failed attempt are never re-fetched. Pause parks the
//! worker mid-stream without dropping the response; cancel unwinds it at the
//! next suspension point.

use futures_util::StreamExt;
use reqwest::header::{ACCEPT_ENCODING, CONNECTION, RANGE};
use reqwest::Client;

use super::{Backoff, SegmentState, WorkerError};
use crate::config::DownloadConfig;
use crate::control::DownloadGate;
use crate::planner::SegmentStatus;
use crate::storage::StorageWriter;

/// Download one segment to completion, error, or abort. The outcome is left
/// on `state`; the controller reconciles after all workers return.
pub(crate) async fn run(
    client: &Client,
    url: &str,
    storage: &StorageWriter,
    state: &SegmentState,
    gate: &DownloadGate,
    cfg: &DownloadConfig,
) {
    let mut attempts = 0u32;
    let mut backoff = Backoff::new();

    loop {
        if gate.checkpoint().await.is_err() {
            return;
        }

        let actual_start = state.range.start + state.downloaded();
        if actual_start > state.range.end {
            state.set_status(SegmentStatus::Completed);
            return;
        }

        match attempt(client, url, storage, state, gate, cfg, actual_start).await {
            Ok(()) => {
                state.set_status(SegmentStatus::Completed);
                tracing::debug!(
                    "segment {}-{} completed",
                    state.range.start,
                    state.range.end
                );
                return;
            }
            Err(WorkerError::Aborted) => return,
            Err(e) => {
                attempts += 1;
                if attempts >= cfg.max_retries {
                    tracing::warn!(
                        "segment {}-{} failed after {} attempts: {}",
                        state.range.start,
                        state.range.end,
                        attempts,
                        e
                    );
                    state.set_status(SegmentStatus::Error);
                    return;
                }
                let delay = backoff.next_delay();
                tracing::warn!(
                    "segment {}-{} attempt {}/{} failed ({}), retrying in {:.1}s",
                    state.range.start,
                    state.range.end,
                    attempts,
                    cfg.max_retries,
                    e,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn attempt(
    client: &Client,
    url: &str,
    storage: &StorageWriter,
    state: &SegmentState,
    gate: &DownloadGate,
    cfg: &DownloadConfig,
    actual_start: u64,
) -> Result<(), WorkerError> {
    let resp = client
        .get(url)
        .header(RANGE, format!("bytes={}-{}", actual_start, state.range.end))
        .header(CONNECTION, "keep-alive")
        // Compressed bodies would break byte-range accounting.
        .header(ACCEPT_ENCODING, "identity")
        .send()
        .await?;

    let status = resp.status().as_u16();
    if status != 200 && status != 206 {
        return Err(WorkerError::Status(status));
    }

    state.set_status(SegmentStatus::Downloading);
    let mut stream = resp.bytes_stream();
    let mut buffer: Vec<u8> = Vec::with_capacity(cfg.write_buffer);
    let mut offset = actual_start;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        gate.checkpoint().await?;

        buffer.extend_from_slice(&chunk);
        if buffer.len() >= cfg.write_buffer {
            offset = flush(storage, state, offset, &mut buffer).await?;
        }
    }
    if !buffer.is_empty() {
        flush(storage, state, offset, &mut buffer).await?;
    }

    let expected = state.range.len();
    let received = state.downloaded();
    if received < expected {
        return Err(WorkerError::Incomplete { expected, received });
    }
    Ok(())
}

/// Write the buffer at `offset` and advance the segment's byte count; returns
/// the next write offset.
async fn flush(
    storage: &StorageWriter,
    state: &SegmentState,
    offset: u64,
    buffer: &mut Vec<u8>,
) -> Result<u64, WorkerError> {
    let data = std::mem::take(buffer);
    let len = data.len() as u64;
    storage.write_at_async(offset, data).await?;
    state.add_downloaded(len);
    Ok(offset + len)
}
