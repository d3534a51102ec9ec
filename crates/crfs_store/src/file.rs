//! Journal files on disk.

use crate::backend::StorageBackend;
use crate::error::{StoreError, StoreResult};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A journal file opened in append mode.
///
/// Reads go through `&File`, so the backend needs no lock of its own; the
/// operation log already serializes access per filesystem.
///
/// ```no_run
/// use crfs_store::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("fs.log")).unwrap();
/// backend.append(b"record").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: File,
    len: u64,
}

impl FileBackend {
    /// Opens `path`, creating an empty file if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
        })
    }

    /// Like [`open`](Self::open), creating missing parent directories first.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory or the file cannot be created.
    pub fn open_with_create_dirs(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn out_of_range(kind: io::ErrorKind, detail: String) -> StoreError {
    StoreError::Io(io::Error::new(kind, detail))
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StoreResult<Vec<u8>> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.len => {}
            _ => {
                return Err(out_of_range(
                    io::ErrorKind::UnexpectedEof,
                    format!("{}: {len} bytes at {offset} exceed length {}", self.path.display(), self.len),
                ))
            }
        }

        let mut buf = vec![0u8; len];
        if len > 0 {
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StoreResult<u64> {
        let at = self.len;
        if !data.is_empty() {
            self.file.write_all(data)?;
            self.len += data.len() as u64;
        }
        Ok(at)
    }

    fn size(&self) -> StoreResult<u64> {
        Ok(self.len)
    }

    fn sync(&mut self) -> StoreResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StoreResult<()> {
        if new_size > self.len {
            return Err(out_of_range(
                io::ErrorKind::InvalidInput,
                format!("cannot grow {} from {} to {new_size}", self.path.display(), self.len),
            ));
        }
        self.file.set_len(new_size)?;
        self.file.sync_all()?;
        self.len = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_read() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("a.log")).unwrap();

        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.read_all().unwrap(), b"hello world");
        assert_eq!(backend.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn read_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("a.log")).unwrap();
        backend.append(b"hello").unwrap();

        assert!(backend.read_at(3, 5).is_err());
        assert!(backend.read_at(u64::MAX, 1).is_err());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("a.log");

        {
            let mut backend = FileBackend::open_with_create_dirs(&path).unwrap();
            backend.append(b"durable").unwrap();
            backend.sync().unwrap();
        }

        let mut backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 7);
        assert_eq!(backend.append(b"!").unwrap(), 7);
        assert_eq!(backend.read_all().unwrap(), b"durable!");
        assert_eq!(backend.path(), path);
    }

    #[test]
    fn truncate_then_append() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("a.log")).unwrap();
        backend.append(b"keep-drop").unwrap();

        backend.truncate(4).unwrap();
        assert!(backend.truncate(10).is_err());

        backend.append(b"!").unwrap();
        assert_eq!(backend.read_all().unwrap(), b"keep!");
    }
}
