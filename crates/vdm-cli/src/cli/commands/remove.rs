//! `vdm remove <id>` – delete a job, its file, and its record.

use anyhow::Result;
use vdm_core::DownloadManager;

pub async fn run_remove(manager: &DownloadManager, job_id: &str) -> Result<()> {
    if manager.delete(job_id).await {
        println!("Removed job {job_id}.");
    } else {
        println!("No job {job_id} found.");
    }
    Ok(())
}
