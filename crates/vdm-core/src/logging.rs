//! Logging init: append to a file under the XDG state dir, with stderr as the
//! fallback when the state dir is unavailable.

use std::fs;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,vdm=debug"))
}

fn open_log_file() -> io::Result<(fs::File, PathBuf)> {
    let state_dir = xdg::BaseDirectories::with_prefix("vdm")
        .map_err(io::Error::other)?
        .get_state_home();
    fs::create_dir_all(&state_dir)?;
    let path = state_dir.join("vdm.log");
    let file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((file, path))
}

/// Log file handle; every writer is a fresh clone so lines interleave safely.
/// Falls back to stderr if the descriptor cannot be cloned.
struct LogFile(fs::File);

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = Box<dyn io::Write>;

    fn make_writer(&'a self) -> Self::Writer {
        match self.0.try_clone() {
            Ok(f) => Box::new(f),
            Err(_) => Box::new(io::stderr()),
        }
    }
}

/// Install the global tracing subscriber. Logs go to
/// `~/.local/state/vdm/vdm.log` when possible, otherwise to stderr.
pub fn init() {
    match open_log_file() {
        Ok((file, path)) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(LogFile(file))
                .with_ansi(false)
                .init();
            tracing::info!("vdm logging initialized at {}", path.display());
        }
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(io::stderr)
                .with_ansi(false)
                .init();
            tracing::warn!("log file unavailable ({}), logging to stderr", e);
        }
    }
}
