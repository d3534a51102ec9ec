//! Journal bytes held in memory.

use crate::backend::StorageBackend;
use crate::error::{StoreError, StoreResult};
use std::io;

/// A volatile backend for in-memory servers and tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    bytes: Vec<u8>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend preloaded with `bytes`, e.g. to replay a damaged
    /// journal.
    #[must_use]
    pub fn with_data(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Returns the stored bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.bytes
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StoreResult<Vec<u8>> {
        usize::try_from(offset)
            .ok()
            .and_then(|start| self.bytes.get(start..start.checked_add(len)?))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                StoreError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{len} bytes at {offset} exceed length {}", self.bytes.len()),
                ))
            })
    }

    fn append(&mut self, data: &[u8]) -> StoreResult<u64> {
        let at = self.bytes.len() as u64;
        self.bytes.extend_from_slice(data);
        Ok(at)
    }

    fn size(&self) -> StoreResult<u64> {
        Ok(self.bytes.len() as u64)
    }

    fn sync(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StoreResult<()> {
        match usize::try_from(new_size) {
            Ok(len) if len <= self.bytes.len() => {
                self.bytes.truncate(len);
                Ok(())
            }
            _ => Err(StoreError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot grow from {} to {new_size}", self.bytes.len()),
            ))),
        }
    }
}
