//! Storage backend trait definition.

use crate::error::StoreResult;

/// A byte store the operation journal is written to.
///
/// Backends are **opaque**: they never interpret what they hold. The
/// journal owns the record format.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - after `sync` returns, all appended data survives process termination
/// - backends must be `Send + Sync` so journals can live behind shared locks
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends past the end of the store or
    /// an I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StoreResult<Vec<u8>>;

    /// Reads the whole store.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_all(&self) -> StoreResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size)
            .map_err(|_| crate::StoreError::corrupted("journal larger than address space"))?;
        self.read_at(0, len)
    }

    /// Appends data to the end of the store and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StoreResult<u64>;

    /// Returns the current size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StoreResult<u64>;

    /// Makes all appended data and file metadata durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StoreResult<()>;

    /// Truncates the store to `new_size` bytes.
    ///
    /// Used to cut away a torn tail record.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` exceeds the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StoreResult<()>;
}
