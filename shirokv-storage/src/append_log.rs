//! Append-only file with explicit durability.
//!
//! This is the lowest layer of the persistence stack: the WAL and the group
//! committer both write through it. One writer per open handle; the file is
//! opened in append mode so that writes from a second handle (the group
//! committer shares the file with the WAL drain path) never interleave within
//! a single `append` call.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use shirokv_core::error::{Error, Result};

#[derive(Debug)]
pub struct AppendLog {
    path: PathBuf,
    file: File,
    written: u64,
}

impl AppendLog {
    /// Open (creating if absent) in write-only append mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::Io {
                message: format!("failed to open append log {:?}", path),
                source: e,
            })?;

        Ok(Self {
            path,
            file,
            written: 0,
        })
    }

    /// Write all bytes. `write_all` retries partial writes and
    /// `ErrorKind::Interrupted` internally, so a successful return means every
    /// byte reached the kernel.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data).map_err(|e| Error::Io {
            message: format!("append of {} bytes to {:?} failed", data.len(), self.path),
            source: e,
        })?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Durability barrier: data and metadata are on stable storage when this
    /// returns.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all().map_err(|e| Error::Io {
            message: format!("fsync of {:?} failed", self.path),
            source: e,
        })
    }

    /// Total bytes written through this handle.
    pub fn size(&self) -> u64 {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_tracks_written_bytes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log.bin");

        let mut log = AppendLog::open(&path).unwrap();
        assert_eq!(log.size(), 0);

        log.append(b"hello").unwrap();
        log.append(b" world").unwrap();
        log.sync().unwrap();
        assert_eq!(log.size(), 11);

        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[test]
    fn reopen_appends_to_existing_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log.bin");

        {
            let mut log = AppendLog::open(&path).unwrap();
            log.append(b"first").unwrap();
        }
        {
            let mut log = AppendLog::open(&path).unwrap();
            log.append(b"second").unwrap();
            // size() counts this handle only
            assert_eq!(log.size(), 6);
        }

        assert_eq!(std::fs::read(&path).unwrap(), b"firstsecond");
    }

    #[test]
    fn open_rejects_unwritable_path() {
        let err = AppendLog::open("/definitely/not/a/dir/log.bin").unwrap_err();
        assert_eq!(err.error_code(), "IO_ERROR");
    }
}
