//! Size and range-support probing.
//!
//! HEAD first; servers that block HEAD or omit Content-Length fall back to a
//! small ranged GET (Content-Range carries the total), and as a last resort a
//! full GET whose body is never read.

use anyhow::{bail, Context, Result};
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::Client;
use std::time::Duration;

/// What the controller needs to plan a transfer.
#[derive(Debug, Clone, Copy)]
pub struct ProbeOutcome {
    pub total_size: u64,
    pub accept_ranges: bool,
}

/// Probes `url` for total size and byte-range support.
pub async fn probe(client: &Client, url: &str, request_timeout: Duration) -> Result<ProbeOutcome> {
    let head_timeout = request_timeout.min(Duration::from_secs(5));

    let mut total_size = 0u64;
    let mut accept_ranges = false;

    match client.head(url).timeout(head_timeout).send().await {
        Ok(resp) => {
            accept_ranges = resp
                .headers()
                .get(ACCEPT_RANGES)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.eq_ignore_ascii_case("bytes"))
                .unwrap_or(false);
            total_size = header_u64(resp.headers().get(CONTENT_LENGTH)).unwrap_or(0);
        }
        Err(e) => {
            tracing::debug!("HEAD {} failed, falling back to ranged GET: {}", url, e);
        }
    }

    if total_size == 0 {
        // Probe the first 8 KiB; a 206 proves range support and Content-Range
        // carries the total. The body is dropped unread.
        let resp = client
            .get(url)
            .header(RANGE, "bytes=0-8191")
            .timeout(request_timeout)
            .send()
            .await
            .context("ranged size probe failed")?;
        if resp.status().as_u16() == 206 {
            accept_ranges = true;
            if let Some(value) = resp.headers().get(CONTENT_RANGE).and_then(|v| v.to_str().ok()) {
                if let Some(total) = content_range_total(value) {
                    total_size = total;
                }
            }
        }
    }

    if total_size == 0 {
        let resp = client
            .get(url)
            .timeout(request_timeout)
            .send()
            .await
            .context("full size probe failed")?;
        total_size = header_u64(resp.headers().get(CONTENT_LENGTH)).unwrap_or(0);
    }

    if total_size == 0 {
        bail!("unable to determine content length for {url}");
    }

    Ok(ProbeOutcome {
        total_size,
        accept_ranges,
    })
}

fn header_u64(value: Option<&reqwest::header::HeaderValue>) -> Option<u64> {
    value.and_then(|v| v.to_str().ok()).and_then(|v| v.trim().parse().ok())
}

/// Total size from a `Content-Range` value, e.g. `bytes 0-8191/268435456`.
/// Returns None for unknown totals (`bytes 0-99/*`).
fn content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_range_total_parses_valid_header() {
        assert_eq!(content_range_total("bytes 0-8191/268435456"), Some(268_435_456));
        assert_eq!(content_range_total("bytes 100-199/1000"), Some(1000));
    }

    #[test]
    fn content_range_total_unknown_or_garbage() {
        assert_eq!(content_range_total("bytes 0-99/*"), None);
        assert_eq!(content_range_total("garbage"), None);
        assert_eq!(content_range_total(""), None);
    }
}
