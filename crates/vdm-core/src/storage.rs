//! Concurrent offset writer for download target files.
//!
//! One read-write descriptor per job, shared by all segment workers; each
//! `write_at` is independent (pwrite-style). The file is never truncated, so
//! a re-planned resume cannot zero bytes written by an earlier run.

use std::fs::File;
#[cfg(unix)]
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Writer for a download target file. Safe to clone and use from multiple
/// tasks.
#[derive(Clone)]
pub struct StorageWriter {
    file: Arc<File>,
    path: PathBuf,
}

impl StorageWriter {
    /// Open (or create) the target file read-write without truncation.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Extend the file to `total_size` bytes by writing one zero at the end.
    /// Already-long-enough files are left untouched.
    pub fn preallocate(&self, total_size: u64) -> std::io::Result<()> {
        if total_size == 0 {
            return Ok(());
        }
        if self.file.metadata()?.len() < total_size {
            self.write_at(total_size - 1, &[0])?;
        }
        Ok(())
    }

    /// Write `data` at `offset`. Does not move any shared cursor; safe for
    /// concurrent use on disjoint ranges.
    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        let n = self.file.write_at(data, offset)?;
        if n != data.len() {
            return Err(std::io::Error::other(format!(
                "short write: {} of {}",
                n,
                data.len()
            )));
        }
        Ok(())
    }

    /// Fallback for non-Unix targets: seek + write on a cloned descriptor.
    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = (*self.file).try_clone()?;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)?;
        Ok(())
    }

    /// `write_at` on a blocking thread so workers never stall the runtime on
    /// large flushes.
    pub async fn write_at_async(&self, offset: u64, data: Vec<u8>) -> std::io::Result<()> {
        let writer = self.clone();
        tokio::task::spawn_blocking(move || writer.write_at(offset, &data))
            .await
            .map_err(std::io::Error::other)?
    }

    /// Current on-disk length.
    pub fn len(&self) -> std::io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Sync file data to disk.
    pub fn sync(&self) -> std::io::Result<()> {
        self.file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn concurrent_offset_writes_compose() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let writer = StorageWriter::open(&path).unwrap();
        writer.preallocate(8).unwrap();

        writer.write_at_async(4, b"WXYZ".to_vec()).await.unwrap();
        writer.write_at_async(0, b"abcd".to_vec()).await.unwrap();
        writer.sync().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"abcdWXYZ");
        assert_eq!(writer.len().unwrap(), 8);
    }

    #[test]
    fn preallocate_never_shrinks_or_rezeroes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, b"hello world").unwrap();

        let writer = StorageWriter::open(&path).unwrap();
        writer.preallocate(4).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");

        writer.preallocate(16).unwrap();
        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), 16);
        assert_eq!(&data[..11], b"hello world");
    }

    #[test]
    fn reopen_preserves_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        {
            let writer = StorageWriter::open(&path).unwrap();
            writer.write_at(0, b"partial").unwrap();
        }
        let writer = StorageWriter::open(&path).unwrap();
        assert_eq!(writer.len().unwrap(), 7);
        assert_eq!(std::fs::read(&path).unwrap(), b"partial");
    }
}
