//! Users, filesystems and replicas.

use crate::atomic::write_atomically;
use crate::error::{StoreError, StoreResult};
use crate::now_millis;
use crfs_protocol::{FileSystemId, ReplicaId, UserId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

const SNAPSHOT_VERSION: u32 = 1;

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id.
    pub id: UserId,
    /// Optional display name.
    pub display_name: Option<String>,
    /// Last registration or lookup, Unix millis.
    pub last_seen: u64,
}

/// A registered filesystem.
///
/// The owner is fixed when the record is first created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystem {
    /// Filesystem id.
    pub id: FileSystemId,
    /// Owning user.
    pub owner: UserId,
    /// Optional display name.
    pub display_name: Option<String>,
    /// Last registration, Unix millis.
    pub last_seen: u64,
    /// Option tokens.
    pub options: BTreeSet<String>,
}

/// A replica seen syncing a filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    /// Replica id.
    pub id: ReplicaId,
    /// Filesystem the replica syncs.
    pub filesystem: FileSystemId,
    /// Last contact, Unix millis.
    pub last_seen: u64,
}

/// User records.
pub trait UserRepo: Send + Sync {
    /// Creates a user or replaces its display name.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be persisted.
    fn register_user(&self, id: UserId, display_name: Option<String>) -> StoreResult<User>;

    /// Looks up a user and refreshes its `last_seen`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UserNotFound`] if the user is not registered.
    fn check_user(&self, id: UserId) -> StoreResult<User>;

    /// Plain lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    fn get_user(&self, id: UserId) -> StoreResult<Option<User>>;
}

/// Filesystem records.
pub trait FileSystemRepo: Send + Sync {
    /// Creates a filesystem or updates its name and options.
    ///
    /// # Errors
    ///
    /// - [`StoreError::UserNotFound`] if `owner` is not registered
    /// - [`StoreError::OwnershipMismatch`] if the filesystem belongs to
    ///   another user
    fn register_fs(
        &self,
        owner: UserId,
        fs: FileSystemId,
        display_name: Option<String>,
        options: BTreeSet<String>,
    ) -> StoreResult<FileSystem>;

    /// Looks up a filesystem on behalf of `owner`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::FileSystemNotFound`] if it is not registered
    /// - [`StoreError::OwnershipMismatch`] if it belongs to another user
    fn check_fs(&self, owner: UserId, fs: FileSystemId) -> StoreResult<FileSystem>;

    /// Plain lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    fn get_filesystem(&self, fs: FileSystemId) -> StoreResult<Option<FileSystem>>;
}

/// Replica records. Informational only.
pub trait ReplicaRepo: Send + Sync {
    /// Creates or refreshes a replica record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::FileSystemNotFound`] if `fs` is not registered.
    fn record_replica(&self, replica: ReplicaId, fs: FileSystemId) -> StoreResult<Replica>;

    /// Plain lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    fn get_replica(&self, replica: ReplicaId) -> StoreResult<Option<Replica>>;
}

#[derive(Debug, Clone, Default)]
struct Records {
    users: HashMap<UserId, User>,
    filesystems: HashMap<FileSystemId, FileSystem>,
    replicas: HashMap<ReplicaId, Replica>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    users: Vec<User>,
    filesystems: Vec<FileSystem>,
    replicas: Vec<Replica>,
}

impl Records {
    fn to_snapshot(&self) -> Snapshot {
        let mut users: Vec<_> = self.users.values().cloned().collect();
        let mut filesystems: Vec<_> = self.filesystems.values().cloned().collect();
        let mut replicas: Vec<_> = self.replicas.values().cloned().collect();
        users.sort_by_key(|u| u.id);
        filesystems.sort_by_key(|f| f.id);
        replicas.sort_by_key(|r| r.id);
        Snapshot {
            version: SNAPSHOT_VERSION,
            users,
            filesystems,
            replicas,
        }
    }

    fn from_snapshot(snapshot: Snapshot) -> StoreResult<Self> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::corrupted(format!(
                "unsupported directory version {}",
                snapshot.version
            )));
        }

        let users: HashMap<_, _> = snapshot.users.into_iter().map(|u| (u.id, u)).collect();
        let mut filesystems = HashMap::new();
        for fs in snapshot.filesystems {
            if !users.contains_key(&fs.owner) {
                return Err(StoreError::corrupted(format!(
                    "filesystem {} has unknown owner {}",
                    fs.id, fs.owner
                )));
            }
            filesystems.insert(fs.id, fs);
        }
        let replicas = snapshot
            .replicas
            .into_iter()
            .filter(|r| filesystems.contains_key(&r.filesystem))
            .map(|r| (r.id, r))
            .collect();

        Ok(Self {
            users,
            filesystems,
            replicas,
        })
    }
}

/// The identity directory.
///
/// Records are held in memory. When opened on a path, every mutation is
/// written out as a JSON snapshot before it becomes visible, so a failed
/// write leaves both the file and the in-memory state untouched.
#[derive(Debug)]
pub struct Directory {
    path: Option<PathBuf>,
    records: RwLock<Records>,
}

impl Directory {
    /// Creates an empty, volatile directory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: RwLock::new(Records::default()),
        }
    }

    /// Opens a directory persisted at `path`, starting empty if the file
    /// does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be read or is invalid.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let records = match std::fs::read(&path) {
            Ok(bytes) => Records::from_snapshot(serde_json::from_slice(&bytes)?)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Records::default(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(
            path = %path.display(),
            users = records.users.len(),
            filesystems = records.filesystems.len(),
            "opened directory"
        );

        Ok(Self {
            path: Some(path),
            records: RwLock::new(records),
        })
    }

    /// Returns the snapshot path, if persistent.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Lists every filesystem record.
    #[must_use]
    pub fn filesystems(&self) -> Vec<FileSystem> {
        let mut all: Vec<_> = self.records.read().filesystems.values().cloned().collect();
        all.sort_by_key(|f| f.id);
        all
    }

    /// Applies `f` to a copy of the records, persists the copy, then
    /// publishes it.
    fn mutate<T>(&self, f: impl FnOnce(&mut Records) -> StoreResult<T>) -> StoreResult<T> {
        let mut records = self.records.write();
        let mut next = records.clone();
        let out = f(&mut next)?;

        if let Some(path) = &self.path {
            let bytes = serde_json::to_vec_pretty(&next.to_snapshot())?;
            write_atomically(path, &bytes).map_err(|e| {
                tracing::error!(path = %path.display(), error = %e, "failed to persist directory");
                StoreError::Io(e)
            })?;
        }

        *records = next;
        Ok(out)
    }
}

impl UserRepo for Directory {
    fn register_user(&self, id: UserId, display_name: Option<String>) -> StoreResult<User> {
        let user = self.mutate(|records| {
            let user = User {
                id,
                display_name,
                last_seen: now_millis(),
            };
            records.users.insert(id, user.clone());
            Ok(user)
        })?;
        tracing::info!(user = %id, "registered user");
        Ok(user)
    }

    fn check_user(&self, id: UserId) -> StoreResult<User> {
        self.mutate(|records| {
            let user = records
                .users
                .get_mut(&id)
                .ok_or(StoreError::UserNotFound(id))?;
            user.last_seen = now_millis();
            Ok(user.clone())
        })
    }

    fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.records.read().users.get(&id).cloned())
    }
}

impl FileSystemRepo for Directory {
    fn register_fs(
        &self,
        owner: UserId,
        fs: FileSystemId,
        display_name: Option<String>,
        options: BTreeSet<String>,
    ) -> StoreResult<FileSystem> {
        let record = self.mutate(|records| {
            if !records.users.contains_key(&owner) {
                return Err(StoreError::UserNotFound(owner));
            }
            if let Some(existing) = records.filesystems.get(&fs) {
                if existing.owner != owner {
                    return Err(StoreError::OwnershipMismatch { fs });
                }
            }
            let record = FileSystem {
                id: fs,
                owner,
                display_name,
                last_seen: now_millis(),
                options,
            };
            records.filesystems.insert(fs, record.clone());
            Ok(record)
        })?;
        tracing::info!(user = %owner, fs = %fs, "registered filesystem");
        Ok(record)
    }

    fn check_fs(&self, owner: UserId, fs: FileSystemId) -> StoreResult<FileSystem> {
        let records = self.records.read();
        let record = records
            .filesystems
            .get(&fs)
            .ok_or(StoreError::FileSystemNotFound(fs))?;
        if record.owner != owner {
            return Err(StoreError::OwnershipMismatch { fs });
        }
        Ok(record.clone())
    }

    fn get_filesystem(&self, fs: FileSystemId) -> StoreResult<Option<FileSystem>> {
        Ok(self.records.read().filesystems.get(&fs).cloned())
    }
}

impl ReplicaRepo for Directory {
    fn record_replica(&self, replica: ReplicaId, fs: FileSystemId) -> StoreResult<Replica> {
        self.mutate(|records| {
            if !records.filesystems.contains_key(&fs) {
                return Err(StoreError::FileSystemNotFound(fs));
            }
            let record = Replica {
                id: replica,
                filesystem: fs,
                last_seen: now_millis(),
            };
            records.replicas.insert(replica, record.clone());
            Ok(record)
        })
    }

    fn get_replica(&self, replica: ReplicaId) -> StoreResult<Option<Replica>> {
        Ok(self.records.read().replicas.get(&replica).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn opts(tokens: &[&str]) -> BTreeSet<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn register_and_check_user() {
        let dir = Directory::in_memory();
        let id = UserId::new();

        assert!(matches!(dir.check_user(id), Err(StoreError::UserNotFound(u)) if u == id));

        dir.register_user(id, Some("alice".into())).unwrap();
        let user = dir.check_user(id).unwrap();
        assert_eq!(user.display_name.as_deref(), Some("alice"));

        dir.register_user(id, None).unwrap();
        assert_eq!(dir.get_user(id).unwrap().unwrap().display_name, None);
    }

    #[test]
    fn register_fs_requires_user() {
        let dir = Directory::in_memory();
        let err = dir
            .register_fs(UserId::new(), FileSystemId::new(), None, BTreeSet::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::UserNotFound(_)));
    }

    #[test]
    fn ownership_is_fixed() {
        let dir = Directory::in_memory();
        let alice = UserId::new();
        let bob = UserId::new();
        let fs = FileSystemId::new();
        dir.register_user(alice, None).unwrap();
        dir.register_user(bob, None).unwrap();

        dir.register_fs(alice, fs, Some("docs".into()), opts(&["nocase"]))
            .unwrap();

        assert!(matches!(
            dir.register_fs(bob, fs, Some("stolen".into()), BTreeSet::new()),
            Err(StoreError::OwnershipMismatch { .. })
        ));
        assert!(matches!(
            dir.check_fs(bob, fs),
            Err(StoreError::OwnershipMismatch { .. })
        ));

        let record = dir.check_fs(alice, fs).unwrap();
        assert_eq!(record.owner, alice);
        assert_eq!(record.display_name.as_deref(), Some("docs"));
        assert_eq!(record.options, opts(&["nocase"]));
    }

    #[test]
    fn reregistration_updates_options() {
        let dir = Directory::in_memory();
        let alice = UserId::new();
        let fs = FileSystemId::new();
        dir.register_user(alice, None).unwrap();

        dir.register_fs(alice, fs, None, opts(&["a", "b"])).unwrap();
        dir.register_fs(alice, fs, Some("renamed".into()), opts(&["c"]))
            .unwrap();

        let record = dir.get_filesystem(fs).unwrap().unwrap();
        assert_eq!(record.options, opts(&["c"]));
        assert_eq!(record.display_name.as_deref(), Some("renamed"));
    }

    #[test]
    fn check_fs_unknown() {
        let dir = Directory::in_memory();
        assert!(matches!(
            dir.check_fs(UserId::new(), FileSystemId::new()),
            Err(StoreError::FileSystemNotFound(_))
        ));
    }

    #[test]
    fn replicas() {
        let dir = Directory::in_memory();
        let alice = UserId::new();
        let fs = FileSystemId::new();
        let replica = ReplicaId::new();

        assert!(matches!(
            dir.record_replica(replica, fs),
            Err(StoreError::FileSystemNotFound(_))
        ));

        dir.register_user(alice, None).unwrap();
        dir.register_fs(alice, fs, None, BTreeSet::new()).unwrap();
        dir.record_replica(replica, fs).unwrap();
        assert_eq!(dir.get_replica(replica).unwrap().unwrap().filesystem, fs);
    }

    #[test]
    fn snapshot_survives_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("directory.json");
        let alice = UserId::new();
        let fs = FileSystemId::new();

        {
            let dir = Directory::open(&path).unwrap();
            dir.register_user(alice, Some("alice".into())).unwrap();
            dir.register_fs(alice, fs, Some("docs".into()), opts(&["x"]))
                .unwrap();
        }

        let dir = Directory::open(&path).unwrap();
        assert_eq!(dir.check_fs(alice, fs).unwrap().options, opts(&["x"]));
        assert_eq!(dir.filesystems().len(), 1);
    }

    #[test]
    fn failed_persist_leaves_state_unchanged() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("gone").join("directory.json");
        let dir = Directory::open(&path).unwrap();

        assert!(dir.register_user(UserId::new(), None).is_err());
        assert!(dir.records.read().users.is_empty());
    }

    #[test]
    fn rejects_dangling_owner() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("directory.json");
        let snapshot = serde_json::json!({
            "version": 1,
            "users": [],
            "filesystems": [{
                "id": FileSystemId::new(),
                "owner": UserId::new(),
                "display_name": null,
                "last_seen": 0,
                "options": []
            }],
            "replicas": []
        });
        std::fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

        assert!(matches!(Directory::open(&path), Err(StoreError::Corrupted(_))));
    }
}
