//! `vdm history` – show every persisted job.

use anyhow::Result;
use vdm_core::DownloadManager;

pub async fn run_history(manager: &DownloadManager) -> Result<()> {
    let jobs = manager.list_history().await?;
    if jobs.is_empty() {
        println!("No downloads in database.");
        return Ok(());
    }

    println!(
        "{:<20} {:<12} {:>14} {:>14} {}",
        "ID", "STATUS", "DOWNLOADED", "TOTAL", "FILE"
    );
    for job in jobs {
        println!(
            "{:<20} {:<12} {:>14} {:>14} {}",
            job.job_id,
            job.status.as_str(),
            job.downloaded,
            job.total_size,
            job.filename
        );
    }
    Ok(())
}
