//! Hash-addressed operation content.

use crate::atomic::{is_temporary, sync_directory, write_atomically};
use crate::error::{StoreError, StoreResult};
use crfs_protocol::{FileSystemId, OpHash};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result of a successful [`BlobStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The blob was written.
    Created,
    /// Identical bytes were already stored; nothing changed.
    Unchanged,
}

/// Stores operation bytes by (filesystem, hash).
///
/// # Invariants
///
/// - With digest verification enabled, every stored blob hashes to its
///   address.
/// - An address, once written, never changes: a second `put` with
///   identical bytes is a no-op and one with different bytes is rejected.
/// - Readers never observe a partially written blob.
pub trait BlobStore: Send + Sync {
    /// Reads a blob.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BlobNotFound`] if nothing is stored there.
    fn get(&self, fs: &FileSystemId, hash: &OpHash) -> StoreResult<Vec<u8>>;

    /// Returns true if a blob is stored at the address.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn contains(&self, fs: &FileSystemId, hash: &OpHash) -> StoreResult<bool>;

    /// Stores a blob.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DigestMismatch`] or
    /// [`StoreError::ContentConflict`] for content-address violations, or
    /// an I/O error.
    fn put(&self, fs: &FileSystemId, hash: &OpHash, data: &[u8]) -> StoreResult<PutOutcome>;

    /// Lists the addresses stored for a filesystem.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace cannot be listed.
    fn list(&self, fs: &FileSystemId) -> StoreResult<Vec<OpHash>>;

    /// Lists the filesystems that have a namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the store root cannot be listed.
    fn filesystems(&self) -> StoreResult<Vec<FileSystemId>>;
}

/// Applies the content-address rules shared by every store.
fn check_put(
    verify_digests: bool,
    existing: Option<&[u8]>,
    hash: &OpHash,
    data: &[u8],
) -> StoreResult<Option<PutOutcome>> {
    if verify_digests && !hash.matches(data) {
        tracing::warn!(hash = %hash, len = data.len(), "rejected blob: digest mismatch");
        return Err(StoreError::DigestMismatch { hash: hash.clone() });
    }

    match existing {
        Some(stored) if stored == data => Ok(Some(PutOutcome::Unchanged)),
        Some(_) => {
            tracing::warn!(hash = %hash, "rejected blob: different content already stored");
            Err(StoreError::ContentConflict { hash: hash.clone() })
        }
        None => Ok(None),
    }
}

/// A blob store on the local filesystem.
///
/// Blobs live at `<root>/<fs-uuid>/<hex-hash>`. Each filesystem namespace
/// has a mutex that covers directory creation and the
/// check-then-publish step of `put`; reads take no lock since blobs are
/// published by rename.
#[derive(Debug)]
pub struct FileBlobStore {
    root: PathBuf,
    verify_digests: bool,
    namespaces: RwLock<HashMap<FileSystemId, Arc<Mutex<()>>>>,
}

impl FileBlobStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let store = Self::open_existing(root);
        std::fs::create_dir_all(&store.root)?;
        Ok(store)
    }

    /// Opens a store without touching the filesystem. A missing root reads
    /// as an empty store until the first `put` creates it.
    #[must_use]
    pub fn open_existing(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            verify_digests: true,
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Enables or disables digest verification on `put`.
    #[must_use]
    pub fn with_verification(mut self, verify_digests: bool) -> Self {
        self.verify_digests = verify_digests;
        self
    }

    /// Returns the store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, fs: &FileSystemId) -> PathBuf {
        self.root.join(fs.to_string())
    }

    fn blob_path(&self, fs: &FileSystemId, hash: &OpHash) -> PathBuf {
        self.namespace_dir(fs).join(hash.to_hex())
    }

    fn namespace_lock(&self, fs: &FileSystemId) -> Arc<Mutex<()>> {
        if let Some(lock) = self.namespaces.read().get(fs) {
            return Arc::clone(lock);
        }
        Arc::clone(self.namespaces.write().entry(*fs).or_default())
    }

    fn read_existing(path: &Path) -> StoreResult<Option<Vec<u8>>> {
        match std::fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl BlobStore for FileBlobStore {
    fn get(&self, fs: &FileSystemId, hash: &OpHash) -> StoreResult<Vec<u8>> {
        Self::read_existing(&self.blob_path(fs, hash))?.ok_or_else(|| StoreError::BlobNotFound {
            fs: *fs,
            hash: hash.clone(),
        })
    }

    fn contains(&self, fs: &FileSystemId, hash: &OpHash) -> StoreResult<bool> {
        Ok(self.blob_path(fs, hash).is_file())
    }

    fn put(&self, fs: &FileSystemId, hash: &OpHash, data: &[u8]) -> StoreResult<PutOutcome> {
        // fail fast before taking the namespace lock
        check_put(self.verify_digests, None, hash, data)?;

        let lock = self.namespace_lock(fs);
        let _guard = lock.lock();

        let dir = self.namespace_dir(fs);
        if !dir.is_dir() {
            std::fs::create_dir_all(&dir)?;
            sync_directory(&self.root)?;
        }

        let path = dir.join(hash.to_hex());
        let existing = Self::read_existing(&path)?;
        if let Some(outcome) = check_put(false, existing.as_deref(), hash, data)? {
            return Ok(outcome);
        }

        write_atomically(&path, data)?;
        tracing::debug!(fs = %fs, hash = %hash, len = data.len(), "stored blob");
        Ok(PutOutcome::Created)
    }

    fn list(&self, fs: &FileSystemId) -> StoreResult<Vec<OpHash>> {
        let entries = match std::fs::read_dir(self.namespace_dir(fs)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut hashes = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if is_temporary(name) {
                continue;
            }
            if let Ok(hash) = OpHash::from_hex(name) {
                hashes.push(hash);
            }
        }
        hashes.sort();
        Ok(hashes)
    }

    fn filesystems(&self) -> StoreResult<Vec<FileSystemId>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// A volatile blob store.
#[derive(Debug)]
pub struct MemoryBlobStore {
    verify_digests: bool,
    blobs: RwLock<HashMap<FileSystemId, BTreeMap<OpHash, Arc<Vec<u8>>>>>,
}

impl MemoryBlobStore {
    /// Creates an empty store with digest verification enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            verify_digests: true,
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Enables or disables digest verification on `put`.
    #[must_use]
    pub fn with_verification(mut self, verify_digests: bool) -> Self {
        self.verify_digests = verify_digests;
        self
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, fs: &FileSystemId, hash: &OpHash) -> StoreResult<Vec<u8>> {
        self.blobs
            .read()
            .get(fs)
            .and_then(|ns| ns.get(hash))
            .map(|data| data.as_ref().clone())
            .ok_or_else(|| StoreError::BlobNotFound {
                fs: *fs,
                hash: hash.clone(),
            })
    }

    fn contains(&self, fs: &FileSystemId, hash: &OpHash) -> StoreResult<bool> {
        Ok(self
            .blobs
            .read()
            .get(fs)
            .is_some_and(|ns| ns.contains_key(hash)))
    }

    fn put(&self, fs: &FileSystemId, hash: &OpHash, data: &[u8]) -> StoreResult<PutOutcome> {
        let mut blobs = self.blobs.write();
        let namespace = blobs.entry(*fs).or_default();

        let existing = namespace.get(hash).map(|d| d.as_slice());
        if let Some(outcome) = check_put(self.verify_digests, existing, hash, data)? {
            return Ok(outcome);
        }

        namespace.insert(hash.clone(), Arc::new(data.to_vec()));
        Ok(PutOutcome::Created)
    }

    fn list(&self, fs: &FileSystemId) -> StoreResult<Vec<OpHash>> {
        Ok(self
            .blobs
            .read()
            .get(fs)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn filesystems(&self) -> StoreResult<Vec<FileSystemId>> {
        let mut ids: Vec<_> = self.blobs.read().keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::tempdir;

    fn stores(dir: &Path) -> Vec<Box<dyn BlobStore>> {
        vec![
            Box::new(MemoryBlobStore::new()),
            Box::new(FileBlobStore::open(dir.join("blobs")).unwrap()),
        ]
    }

    #[test]
    fn round_trip() {
        let dir = tempdir().unwrap();
        for store in stores(dir.path()) {
            let fs = FileSystemId::new();
            let hash = OpHash::digest(b"operation bytes");

            assert_eq!(store.put(&fs, &hash, b"operation bytes").unwrap(), PutOutcome::Created);
            assert_eq!(store.get(&fs, &hash).unwrap(), b"operation bytes");
            assert!(store.contains(&fs, &hash).unwrap());
            assert_eq!(store.list(&fs).unwrap(), vec![hash]);
            assert_eq!(store.filesystems().unwrap(), vec![fs]);
        }
    }

    #[test]
    fn missing_blob() {
        let dir = tempdir().unwrap();
        for store in stores(dir.path()) {
            let fs = FileSystemId::new();
            let hash = OpHash::digest(b"never stored");
            assert!(matches!(
                store.get(&fs, &hash),
                Err(StoreError::BlobNotFound { .. })
            ));
            assert!(!store.contains(&fs, &hash).unwrap());
            assert!(store.list(&fs).unwrap().is_empty());
        }
    }

    #[test]
    fn digest_mismatch_rejected() {
        let dir = tempdir().unwrap();
        for store in stores(dir.path()) {
            let fs = FileSystemId::new();
            let hash = OpHash::digest(b"claimed");

            assert!(matches!(
                store.put(&fs, &hash, b"actual"),
                Err(StoreError::DigestMismatch { .. })
            ));
            assert!(!store.contains(&fs, &hash).unwrap());
        }
    }

    #[test]
    fn identical_rewrite_is_noop() {
        let dir = tempdir().unwrap();
        for store in stores(dir.path()) {
            let fs = FileSystemId::new();
            let hash = OpHash::digest(b"same");

            store.put(&fs, &hash, b"same").unwrap();
            assert_eq!(store.put(&fs, &hash, b"same").unwrap(), PutOutcome::Unchanged);
        }
    }

    #[test]
    fn different_content_never_overwrites() {
        let dir = tempdir().unwrap();
        let unverified: Vec<Box<dyn BlobStore>> = vec![
            Box::new(MemoryBlobStore::new().with_verification(false)),
            Box::new(
                FileBlobStore::open(dir.path().join("blobs"))
                    .unwrap()
                    .with_verification(false),
            ),
        ];

        for store in unverified {
            let fs = FileSystemId::new();
            let hash = OpHash::from_hex("aa").unwrap();

            store.put(&fs, &hash, b"hello").unwrap();
            assert!(matches!(
                store.put(&fs, &hash, b"goodbye"),
                Err(StoreError::ContentConflict { .. })
            ));
            assert_eq!(store.get(&fs, &hash).unwrap(), b"hello");
        }
    }

    #[test]
    fn namespaces_are_isolated() {
        let dir = tempdir().unwrap();
        for store in stores(dir.path()) {
            let a = FileSystemId::new();
            let b = FileSystemId::new();
            let hash = OpHash::digest(b"shared");

            store.put(&a, &hash, b"shared").unwrap();
            assert!(!store.contains(&b, &hash).unwrap());
        }
    }

    #[test]
    fn file_store_ignores_temporaries_when_listing() {
        let dir = tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();
        let fs = FileSystemId::new();
        let hash = OpHash::digest(b"x");
        store.put(&fs, &hash, b"x").unwrap();

        std::fs::write(
            dir.path().join(fs.to_string()).join(format!(".{}.abc.tmp", hash.to_hex())),
            b"partial",
        )
        .unwrap();

        assert_eq!(store.list(&fs).unwrap(), vec![hash]);
    }

    #[test]
    fn open_existing_creates_nothing() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("blobs");
        let store = FileBlobStore::open_existing(&root);

        assert!(store.filesystems().unwrap().is_empty());
        assert!(store.list(&FileSystemId::new()).unwrap().is_empty());
        assert!(!root.exists());

        let hash = OpHash::digest(b"late");
        store.put(&FileSystemId::new(), &hash, b"late").unwrap();
        assert_eq!(store.filesystems().unwrap().len(), 1);
    }

    #[test]
    fn concurrent_first_puts_share_a_namespace() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileBlobStore::open(dir.path()).unwrap());
        let fs = FileSystemId::new();

        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let data = vec![i; 64];
                    let hash = OpHash::digest(&data);
                    store.put(&fs, &hash, &data).unwrap();
                    // and everyone races on the same blob
                    let shared = OpHash::digest(b"shared");
                    store.put(&fs, &shared, b"shared").unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.list(&fs).unwrap().len(), 9);
    }
}
