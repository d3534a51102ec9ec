//! Per-filesystem operation logs.

use crate::backend::StorageBackend;
use crate::error::{StoreError, StoreResult};
use crate::file::FileBackend;
use crate::journal::Journal;
use crate::memory::InMemoryBackend;
use crfs_protocol::{FileSystemId, OpHash};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Journals a durable log keeps open at once unless configured otherwise.
pub const DEFAULT_MAX_OPEN_JOURNALS: usize = 256;

/// The set of operation hashes known for each filesystem.
///
/// # Invariants
///
/// - Each filesystem's log is a set: a hash is stored at most once, and
///   uniqueness is scoped to the filesystem.
/// - Hashes are only ever added.
/// - A batch appended with [`append_all`](OperationLog::append_all) is
///   visible entirely or not at all.
/// - Concurrent appends of different hashes all survive; concurrent
///   appends of the same hash collapse into one entry.
///
/// Whether a filesystem is registered is decided by the directory; log
/// namespaces are created on first append.
pub trait OperationLog: Send + Sync {
    /// Adds a hash. Returns `true` if it was not already present.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be persisted.
    fn append(&self, fs: &FileSystemId, hash: &OpHash) -> StoreResult<bool> {
        Ok(self.append_all(fs, std::slice::from_ref(hash))? == 1)
    }

    /// Adds a batch of hashes atomically. Returns the number newly added.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be persisted; nothing from the
    /// batch is then visible.
    fn append_all(&self, fs: &FileSystemId, hashes: &[OpHash]) -> StoreResult<usize>;

    /// Returns every hash known for the filesystem.
    ///
    /// The whole set is returned at once. This is fine for the histories
    /// replicas produce today but is not paginated.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    fn list(&self, fs: &FileSystemId) -> StoreResult<BTreeSet<OpHash>>;

    /// Returns true if the hash is in the filesystem's log.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    fn contains(&self, fs: &FileSystemId, hash: &OpHash) -> StoreResult<bool>;

    /// Returns every filesystem that has a log.
    ///
    /// # Errors
    ///
    /// Returns an error if the log root cannot be listed.
    fn filesystems(&self) -> StoreResult<Vec<FileSystemId>>;
}

#[derive(Debug, Clone)]
enum Location {
    Memory,
    Directory { root: PathBuf, sync_on_write: bool },
}

#[derive(Debug)]
struct FsLog {
    journal: Journal,
    hashes: HashSet<OpHash>,
    last_used: Instant,
}

impl FsLog {
    fn new(journal: Journal, hashes: HashSet<OpHash>) -> Self {
        Self {
            journal,
            hashes,
            last_used: Instant::now(),
        }
    }

    /// Writes the hashes not yet logged as one record, then adds them to
    /// the set. On error the set is unchanged.
    fn append_all(&mut self, hashes: &[OpHash]) -> StoreResult<usize> {
        let mut seen = HashSet::new();
        let fresh: Vec<OpHash> = hashes
            .iter()
            .filter(|h| !self.hashes.contains(*h) && seen.insert(*h))
            .cloned()
            .collect();

        if fresh.is_empty() {
            return Ok(0);
        }

        self.journal.append(&fresh)?;
        let added = fresh.len();
        self.hashes.extend(fresh);
        Ok(added)
    }
}

/// A filesystem's log, or `None` while its journal is closed.
type Slot = Arc<Mutex<Option<FsLog>>>;

/// An [`OperationLog`] backed by one [`Journal`] per filesystem.
///
/// Each filesystem has its own mutex. Journals are opened and replayed
/// under that mutex only, so work on one filesystem never waits for
/// another. The journal record is written (and synced, if configured)
/// before the in-memory set is updated.
///
/// A durable log closes the least recently used idle journals once more
/// than `max_open` are open; they are replayed again on next use.
#[derive(Debug)]
pub struct JournalOperationLog {
    location: Location,
    slots: RwLock<HashMap<FileSystemId, Slot>>,
    open_journals: AtomicUsize,
    max_open: usize,
}

impl JournalOperationLog {
    /// Creates a volatile log.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_location(Location::Memory)
    }

    /// Opens a durable log rooted at `root` (one `<fs-uuid>.log` per filesystem).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>, sync_on_write: bool) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self::with_location(Location::Directory {
            root,
            sync_on_write,
        }))
    }

    fn with_location(location: Location) -> Self {
        Self {
            location,
            slots: RwLock::new(HashMap::new()),
            open_journals: AtomicUsize::new(0),
            max_open: DEFAULT_MAX_OPEN_JOURNALS,
        }
    }

    /// Sets how many journals a durable log keeps open. In-memory logs
    /// never close theirs.
    #[must_use]
    pub fn with_max_open(mut self, max_open: usize) -> Self {
        self.max_open = max_open.max(1);
        self
    }

    /// Returns the number of journals currently open.
    pub fn open_journals(&self) -> usize {
        self.open_journals.load(Ordering::Relaxed)
    }

    /// Returns the journal path for a filesystem under `root`.
    #[must_use]
    pub fn journal_path(root: &Path, fs: &FileSystemId) -> PathBuf {
        root.join(format!("{fs}.log"))
    }

    fn slot(&self, fs: &FileSystemId) -> Slot {
        if let Some(slot) = self.slots.read().get(fs) {
            return Arc::clone(slot);
        }
        Arc::clone(self.slots.write().entry(*fs).or_default())
    }

    /// Runs `f` on the filesystem's log, opening (and replaying) it if
    /// needed.
    ///
    /// With `create == false` a filesystem without a journal yields `None`
    /// instead of creating an empty file.
    fn with_log<T>(
        &self,
        fs: &FileSystemId,
        create: bool,
        f: impl FnOnce(&mut FsLog) -> StoreResult<T>,
    ) -> StoreResult<Option<T>> {
        let slot = self.slot(fs);
        let mut guard = slot.lock();

        let opened = guard.is_none();
        if opened {
            match self.open_log(fs, create)? {
                Some(log) => {
                    *guard = Some(log);
                    self.open_journals.fetch_add(1, Ordering::Relaxed);
                }
                None => return Ok(None),
            }
        }

        let result = match guard.as_mut() {
            Some(log) => {
                log.last_used = Instant::now();
                f(log)
            }
            None => return Ok(None),
        };
        drop(guard);

        if opened {
            self.close_idle(fs);
        }
        result.map(Some)
    }

    fn open_log(&self, fs: &FileSystemId, create: bool) -> StoreResult<Option<FsLog>> {
        let (backend, sync_on_write): (Box<dyn StorageBackend>, bool) = match &self.location {
            Location::Memory => {
                if !create {
                    return Ok(None);
                }
                (Box::new(InMemoryBackend::new()), false)
            }
            Location::Directory {
                root,
                sync_on_write,
            } => {
                let path = Self::journal_path(root, fs);
                let exists = path.exists();
                if !create && !exists {
                    return Ok(None);
                }
                let backend = FileBackend::open(&path)?;
                if !exists && *sync_on_write {
                    crate::atomic::sync_directory(root)?;
                }
                (Box::new(backend), *sync_on_write)
            }
        };

        let (journal, scan) = Journal::open(backend, sync_on_write)?;
        let hashes: HashSet<OpHash> = scan.hashes().cloned().collect();
        tracing::debug!(fs = %fs, hashes = hashes.len(), records = scan.records.len(), "opened operation journal");
        Ok(Some(FsLog::new(journal, hashes)))
    }

    /// Closes the least recently used idle journals until at most
    /// `max_open` remain. Busy journals and `keep` are left open.
    fn close_idle(&self, keep: &FileSystemId) {
        if matches!(self.location, Location::Memory) {
            return;
        }

        while self.open_journals() > self.max_open {
            let slots: Vec<(FileSystemId, Slot)> = self
                .slots
                .read()
                .iter()
                .filter(|(id, _)| *id != keep)
                .map(|(id, slot)| (*id, Arc::clone(slot)))
                .collect();

            let oldest = slots
                .iter()
                .filter_map(|(id, slot)| {
                    let guard = slot.try_lock()?;
                    let last_used = guard.as_ref()?.last_used;
                    Some((last_used, *id, Arc::clone(slot)))
                })
                .min_by_key(|(last_used, _, _)| *last_used);

            let Some((_, id, slot)) = oldest else {
                break;
            };
            let closed = slot
                .try_lock()
                .is_some_and(|mut guard| guard.take().is_some());
            if !closed {
                break;
            }
            self.open_journals.fetch_sub(1, Ordering::Relaxed);
            tracing::debug!(fs = %id, "closed idle operation journal");
        }
    }
}

impl OperationLog for JournalOperationLog {
    fn append_all(&self, fs: &FileSystemId, hashes: &[OpHash]) -> StoreResult<usize> {
        if hashes.is_empty() {
            return Ok(0);
        }

        self.with_log(fs, true, |log| log.append_all(hashes))?
            .ok_or(StoreError::FileSystemNotFound(*fs))
    }

    fn list(&self, fs: &FileSystemId) -> StoreResult<BTreeSet<OpHash>> {
        Ok(self
            .with_log(fs, false, |log| {
                Ok(log.hashes.iter().cloned().collect::<BTreeSet<_>>())
            })?
            .unwrap_or_default())
    }

    fn contains(&self, fs: &FileSystemId, hash: &OpHash) -> StoreResult<bool> {
        Ok(self
            .with_log(fs, false, |log| Ok(log.hashes.contains(hash)))?
            .unwrap_or(false))
    }

    fn filesystems(&self) -> StoreResult<Vec<FileSystemId>> {
        let slots: Vec<(FileSystemId, Slot)> = self
            .slots
            .read()
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect();
        let mut ids: BTreeSet<FileSystemId> = slots
            .into_iter()
            .filter(|(_, slot)| slot.lock().is_some())
            .map(|(id, _)| id)
            .collect();

        if let Location::Directory { root, .. } = &self.location {
            for entry in std::fs::read_dir(root)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("log") {
                    continue;
                }
                if let Some(id) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse().ok())
                {
                    ids.insert(id);
                }
            }
        }

        Ok(ids.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use tempfile::tempdir;

    fn hash(byte: u8) -> OpHash {
        OpHash::new(vec![byte]).unwrap()
    }

    #[test]
    fn append_is_idempotent() {
        let log = JournalOperationLog::in_memory();
        let fs = FileSystemId::new();

        assert!(log.append(&fs, &hash(0xAA)).unwrap());
        assert!(!log.append(&fs, &hash(0xAA)).unwrap());

        let set = log.list(&fs).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains(&hash(0xAA)));
    }

    #[test]
    fn duplicates_inside_a_batch_collapse() {
        let log = JournalOperationLog::in_memory();
        let fs = FileSystemId::new();

        let added = log
            .append_all(&fs, &[hash(1), hash(2), hash(1), hash(2)])
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(log.append_all(&fs, &[hash(2), hash(3)]).unwrap(), 1);
        assert_eq!(log.list(&fs).unwrap().len(), 3);
    }

    #[test]
    fn same_hash_in_different_filesystems() {
        let log = JournalOperationLog::in_memory();
        let a = FileSystemId::new();
        let b = FileSystemId::new();

        assert!(log.append(&a, &hash(9)).unwrap());
        assert!(log.append(&b, &hash(9)).unwrap());
        assert!(log.contains(&a, &hash(9)).unwrap());
        assert!(log.contains(&b, &hash(9)).unwrap());
    }

    #[test]
    fn unknown_filesystem_lists_empty() {
        let log = JournalOperationLog::in_memory();
        let fs = FileSystemId::new();
        assert!(log.list(&fs).unwrap().is_empty());
        assert!(!log.contains(&fs, &hash(1)).unwrap());
        assert!(log.filesystems().unwrap().is_empty());
    }

    #[test]
    fn durable_across_reopen() {
        let dir = tempdir().unwrap();
        let fs = FileSystemId::new();

        {
            let log = JournalOperationLog::open(dir.path(), true).unwrap();
            log.append_all(&fs, &[hash(1), hash(2)]).unwrap();
            log.append(&fs, &hash(3)).unwrap();
            log.append(&fs, &hash(3)).unwrap();
        }

        let log = JournalOperationLog::open(dir.path(), true).unwrap();
        let set = log.list(&fs).unwrap();
        assert_eq!(set, [hash(1), hash(2), hash(3)].into_iter().collect());
        assert_eq!(log.filesystems().unwrap(), vec![fs]);
    }

    #[test]
    fn listing_does_not_create_journals() {
        let dir = tempdir().unwrap();
        let log = JournalOperationLog::open(dir.path(), true).unwrap();
        let fs = FileSystemId::new();

        assert!(log.list(&fs).unwrap().is_empty());
        assert!(!JournalOperationLog::journal_path(dir.path(), &fs).exists());
    }

    #[test]
    fn torn_batch_is_invisible_after_reopen() {
        let dir = tempdir().unwrap();
        let fs = FileSystemId::new();
        let path = JournalOperationLog::journal_path(dir.path(), &fs);

        {
            let log = JournalOperationLog::open(dir.path(), true).unwrap();
            log.append(&fs, &hash(1)).unwrap();
        }

        // simulate a crash halfway through the second batch
        let torn = crate::journal::encode_batch(&[hash(2), hash(3)]).unwrap();
        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(&torn[..torn.len() - 3]).unwrap();
            backend.sync().unwrap();
        }

        let log = JournalOperationLog::open(dir.path(), true).unwrap();
        assert_eq!(log.list(&fs).unwrap(), [hash(1)].into_iter().collect());

        log.append(&fs, &hash(4)).unwrap();
        drop(log);
        let log = JournalOperationLog::open(dir.path(), true).unwrap();
        assert_eq!(log.list(&fs).unwrap().len(), 2);
    }

    #[test]
    fn concurrent_appends_lose_nothing() {
        let log = Arc::new(JournalOperationLog::in_memory());
        let fs = FileSystemId::new();

        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for i in 0..32u8 {
                        // every thread also races on a shared hash
                        log.append(&fs, &OpHash::new(vec![t, i]).unwrap()).unwrap();
                        log.append(&fs, &hash(0xFF)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let set = log.list(&fs).unwrap();
        assert_eq!(set.len(), 8 * 32 + 1);
    }

    #[test]
    fn busy_filesystem_does_not_block_others() {
        let dir = tempdir().unwrap();
        let log = JournalOperationLog::open(dir.path(), true).unwrap();
        let busy = FileSystemId::new();
        let other = FileSystemId::new();
        log.append(&busy, &hash(1)).unwrap();

        let slot = log.slot(&busy);
        let _held = slot.lock();
        assert!(log.append(&other, &hash(2)).unwrap());
        assert_eq!(log.list(&other).unwrap().len(), 1);
    }

    #[test]
    fn idle_journals_are_closed_and_reopened() {
        let dir = tempdir().unwrap();
        let log = JournalOperationLog::open(dir.path(), true)
            .unwrap()
            .with_max_open(2);
        let ids: Vec<FileSystemId> = (0..5).map(|_| FileSystemId::new()).collect();

        for (i, fs) in ids.iter().enumerate() {
            log.append(fs, &hash(i as u8)).unwrap();
            assert!(log.open_journals() <= 2);
        }

        for (i, fs) in ids.iter().enumerate() {
            assert_eq!(log.list(fs).unwrap(), [hash(i as u8)].into_iter().collect());
            assert!(log.append(fs, &hash(0xF0)).unwrap());
        }
        assert!(log.open_journals() <= 2);
        assert_eq!(log.filesystems().unwrap().len(), 5);
    }

    #[test]
    fn in_memory_journals_stay_open() {
        let log = JournalOperationLog::in_memory().with_max_open(1);
        let a = FileSystemId::new();
        let b = FileSystemId::new();

        log.append(&a, &hash(1)).unwrap();
        log.append(&b, &hash(2)).unwrap();
        assert_eq!(log.open_journals(), 2);
        assert!(log.contains(&a, &hash(1)).unwrap());
    }

    /// Shares its bytes with the test and fails appends on request after
    /// writing part of the record.
    #[derive(Clone, Default)]
    struct FlakyBackend {
        inner: Arc<Mutex<InMemoryBackend>>,
        fail: Arc<AtomicBool>,
    }

    impl StorageBackend for FlakyBackend {
        fn read_at(&self, offset: u64, len: usize) -> StoreResult<Vec<u8>> {
            self.inner.lock().read_at(offset, len)
        }

        fn append(&mut self, data: &[u8]) -> StoreResult<u64> {
            let mut inner = self.inner.lock();
            if self.fail.load(Ordering::SeqCst) {
                inner.append(&data[..data.len() / 2])?;
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            inner.append(data)
        }

        fn size(&self) -> StoreResult<u64> {
            self.inner.lock().size()
        }

        fn sync(&mut self) -> StoreResult<()> {
            Ok(())
        }

        fn truncate(&mut self, new_size: u64) -> StoreResult<()> {
            self.inner.lock().truncate(new_size)
        }
    }

    #[test]
    fn failed_append_changes_nothing() {
        let backend = FlakyBackend::default();
        let (journal, _) = Journal::open(Box::new(backend.clone()), true).unwrap();
        let mut log = FsLog::new(journal, HashSet::new());

        assert_eq!(log.append_all(&[hash(1)]).unwrap(), 1);
        let size = log.journal.size().unwrap();

        backend.fail.store(true, Ordering::SeqCst);
        assert!(log.append_all(&[hash(2), hash(3)]).is_err());
        assert_eq!(log.hashes, [hash(1)].into_iter().collect());
        assert_eq!(log.journal.size().unwrap(), size);

        backend.fail.store(false, Ordering::SeqCst);
        assert_eq!(log.append_all(&[hash(2), hash(3)]).unwrap(), 2);

        let scan = crate::journal::scan(backend.inner.lock().data()).unwrap();
        assert_eq!(scan.records.len(), 2);
        assert_eq!(scan.torn_bytes, 0);
        assert_eq!(scan.hashes().count(), 3);
    }

    proptest! {
        #[test]
        fn union_of_batches(batches in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..8), 1..6)
        ) {
            let log = JournalOperationLog::in_memory();
            let fs = FileSystemId::new();
            let mut expected = BTreeSet::new();

            for batch in &batches {
                let hashes: Vec<OpHash> = batch.iter().map(|b| hash(*b)).collect();
                expected.extend(hashes.iter().cloned());
                log.append_all(&fs, &hashes).unwrap();
            }

            prop_assert_eq!(log.list(&fs).unwrap(), expected);
        }
    }
}
