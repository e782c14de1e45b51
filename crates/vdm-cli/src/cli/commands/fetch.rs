//! `vdm fetch <id> <url>` – start a download and watch it finish.

use anyhow::Result;
use vdm_core::{DownloadManager, StartOutcome};

pub async fn run_fetch(manager: &DownloadManager, job_id: &str, force: bool) -> Result<()> {
    let mut subscription = manager.subscribe();

    match manager.start(job_id, force).await {
        StartOutcome::Started => {}
        StartOutcome::AlreadyQueued(existing) => {
            println!(
                "Job {} already exists ({}); use --force to restart.",
                job_id,
                existing.status.as_str()
            );
            return Ok(());
        }
        StartOutcome::Failed(message) => {
            anyhow::bail!("starting {job_id} failed: {message}");
        }
    }

    // Follow snapshots until the job reaches a terminal state.
    while let Some(message) = subscription.rx.recv().await {
        let snapshot: serde_json::Value = serde_json::from_str(&message)?;
        if snapshot["job_id"] != job_id {
            continue;
        }
        let status = snapshot["status"].as_str().unwrap_or("unknown");
        let downloaded = snapshot["downloaded"].as_u64().unwrap_or(0);
        let total = snapshot["total_size"].as_u64().unwrap_or(0);
        let speed = snapshot["speed"].as_f64().unwrap_or(0.0);

        if total > 0 {
            let percent = downloaded as f64 / total as f64 * 100.0;
            println!(
                "{status:<12} {downloaded:>12}/{total} bytes ({percent:5.1}%)  {:.2} KiB/s",
                speed / 1024.0
            );
        } else {
            println!("{status:<12} {downloaded:>12} bytes");
        }

        match status {
            "completed" => {
                println!("Done.");
                break;
            }
            "error" => {
                let message = snapshot["error_message"].as_str().unwrap_or("unknown error");
                anyhow::bail!("download failed: {message}");
            }
            "cancelled" => {
                println!("Cancelled.");
                break;
            }
            _ => {}
        }
    }

    Ok(())
}
