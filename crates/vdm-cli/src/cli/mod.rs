//! CLI for the VDM download manager.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use vdm_core::config;
use vdm_core::resolver::{MediaInfo, StaticProvider, StreamSource};
use vdm_core::DownloadManager;

use commands::{run_fetch, run_history, run_remove};

/// Top-level CLI for the VDM download manager.
#[derive(Debug, Parser)]
#[command(name = "vdm")]
#[command(about = "VDM: concurrent segmented media download manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download one media URL under the given job id and watch its progress.
    Fetch {
        /// Job identifier (used as the filename prefix and database key).
        job_id: String,
        /// Direct HTTP/HTTPS URL of the stream.
        url: String,
        /// Display title stored with the job (default: the job id).
        #[arg(long)]
        title: Option<String>,
        /// Quality label attached to the URL (e.g. 1080p).
        #[arg(long, default_value = "1080p")]
        quality: String,
        /// Delete any existing record for this id and start over.
        #[arg(long)]
        force: bool,
    },

    /// Show every persisted job, newest first.
    History,

    /// Remove a job: cancel if active, delete its file and its record.
    Remove {
        /// Job identifier.
        job_id: String,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Fetch {
                job_id,
                url,
                title,
                quality,
                force,
            } => {
                let mut provider = StaticProvider::new();
                provider.insert(
                    job_id.clone(),
                    MediaInfo {
                        title: title.unwrap_or_else(|| job_id.clone()),
                        subtitle: None,
                        cover_url: None,
                        stream_urls: vec![StreamSource { quality, url }],
                    },
                );
                let manager = DownloadManager::new(cfg, Arc::new(provider)).await?;
                manager.recover().await?;
                run_fetch(&manager, &job_id, force).await?;
                manager.shutdown();
            }
            CliCommand::History => {
                let manager = DownloadManager::new(cfg, Arc::new(StaticProvider::new())).await?;
                run_history(&manager).await?;
            }
            CliCommand::Remove { job_id } => {
                let manager = DownloadManager::new(cfg, Arc::new(StaticProvider::new())).await?;
                run_remove(&manager, &job_id).await?;
            }
        }

        Ok(())
    }
}
