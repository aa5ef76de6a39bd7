//! Synchronization controller
//!
//! Entry point for every filesystem operation. Coordinates the metadata
//! store, the directory tree, the shadow file cache and the remote store so
//! that stat/read/write/rename/mkdir/rmdir behave consistently.
//!
//! # Path states
//! ```text
//! Unknown --lookup/list--> Cached --write--> Dirty --release--> Uploading --> Cached
//!                          Cached/Dirty --unlink/rmdir--> Deleted
//! ```
//!
//! Private paths (any component starting with `.`) only ever touch the host
//! mirror. Mutating operations hold a per-path lock for their duration.

use std::collections::{BTreeSet, HashSet};
use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use docmount_core::{
    now_secs, AttributeRecord, Config, DocPath, EntryKind, FsError, NewFile, RemoteStore,
    SyncState, TimeRange,
};

use crate::dir_tree::DirectoryTree;
use crate::metadata::MetadataStore;
use crate::mirror::HostMirror;
use crate::path_locks::PathLocks;
use crate::query::{QueryEngine, QueryResult};
use crate::shadow_cache::{OpenMode, ShadowCache};

/// Owns all per-mount state and implements the filesystem operations
pub struct SyncController {
    remote: Arc<dyn RemoteStore>,
    metadata: MetadataStore,
    tree: DirectoryTree,
    cache: Arc<ShadowCache>,
    locks: PathLocks,
    /// Paths removed by unlink/rmdir and not recreated since
    tombstones: RwLock<HashSet<DocPath>>,
}

impl SyncController {
    pub fn new(remote: Arc<dyn RemoteStore>, mirror: HostMirror, config: &Config) -> Self {
        info!(
            "Sync controller over {} store, mirror {:?}",
            remote.name(),
            mirror.root()
        );
        let cache = ShadowCache::with_idle_ttl(
            mirror,
            Duration::from_secs(config.cache.idle_ttl_secs),
        );
        Self {
            remote,
            metadata: MetadataStore::new(),
            tree: DirectoryTree::new(config.remote.reserved_folder.clone()),
            cache: Arc::new(cache),
            locks: PathLocks::new(),
            tombstones: RwLock::new(HashSet::new()),
        }
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn tree(&self) -> &DirectoryTree {
        &self.tree
    }

    /// Shared handle to the shadow cache (for the background reaper)
    pub fn cache(&self) -> Arc<ShadowCache> {
        self.cache.clone()
    }

    fn mirror(&self) -> &HostMirror {
        self.cache.mirror()
    }

    fn remote(&self) -> &dyn RemoteStore {
        self.remote.as_ref()
    }

    /// Current synchronization state of a path
    pub fn state(&self, path: &DocPath) -> SyncState {
        if self.cache.is_uploading(path) {
            SyncState::Uploading
        } else if self.cache.is_dirty(path) {
            SyncState::Dirty
        } else if self.metadata.contains(path) {
            SyncState::Cached
        } else if self.tombstones.read().contains(path) {
            SyncState::Deleted
        } else {
            SyncState::Unknown
        }
    }

    pub fn getattr(&self, path: &DocPath) -> Result<AttributeRecord, FsError> {
        let record = self
            .metadata
            .get_attributes(path, self.remote(), self.mirror())?;
        self.clear_tombstone(path);
        Ok(record)
    }

    /// Forget that `path` was deleted once a record for it exists again
    fn clear_tombstone(&self, path: &DocPath) {
        if self.tombstones.read().contains(path) {
            self.tombstones.write().remove(path);
        }
    }

    fn exists(&self, path: &DocPath) -> Result<bool, FsError> {
        match self.getattr(path) {
            Ok(_) => Ok(true),
            Err(FsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn require_dir(&self, path: &DocPath) -> Result<(), FsError> {
        if self.getattr(path)?.is_dir() {
            Ok(())
        } else {
            Err(FsError::NotDirectory(path.to_string()))
        }
    }

    fn require_file(&self, path: &DocPath) -> Result<(), FsError> {
        if self.getattr(path)?.is_dir() {
            Err(FsError::IsDirectory(path.to_string()))
        } else {
            Ok(())
        }
    }

    fn update_size(&self, path: &DocPath, size: u64) {
        self.metadata.update(path, |record| {
            record.size = size;
            record.mtime = now_secs();
        });
    }

    /// List a directory: `.`, `..`, remote children, private entries
    pub fn readdir(&self, path: &DocPath) -> Result<Vec<String>, FsError> {
        self.require_dir(path)?;
        let keep = self.cache.pending_children(path);
        let listing = self
            .tree
            .list(path, self.remote(), &self.metadata, self.mirror(), &keep)?;

        for name in &listing[2..] {
            if let Ok(child) = path.join(name) {
                self.clear_tombstone(&child);
            }
        }

        // A refetch reports the remote size; unsynced local writes win
        for dirty in self.cache.dirty_children(path) {
            if self.cache.is_pending_create(&dirty) {
                continue;
            }
            if let Some(len) = self.cache.shadow_len(&dirty) {
                self.metadata.update(&dirty, |record| record.size = len);
            }
        }
        Ok(listing)
    }

    /// Cached records holding every label in `labels`
    pub fn readdir_labels(&self, scope: &DocPath, labels: &BTreeSet<String>) -> QueryResult {
        QueryEngine::new(&self.metadata).by_labels(scope, labels)
    }

    /// Cached records modified within `range`
    pub fn readdir_times(&self, scope: &DocPath, range: TimeRange) -> QueryResult {
        QueryEngine::new(&self.metadata).by_time_range(scope, range)
    }

    pub fn readdir_labels_times(
        &self,
        scope: &DocPath,
        labels: &BTreeSet<String>,
        range: TimeRange,
    ) -> QueryResult {
        QueryEngine::new(&self.metadata).by_labels_and_time_range(scope, labels, range)
    }

    /// Create an empty file
    ///
    /// Remote-class files exist only locally until their first release.
    pub fn mknod(&self, path: &DocPath, params: &NewFile) -> Result<AttributeRecord, FsError> {
        let _guard = self.locks.lock(path);
        if path.is_root() {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        let parent = path.parent();
        self.require_dir(&parent)?;
        if self.exists(path)? {
            return Err(FsError::AlreadyExists(path.to_string()));
        }

        if path.is_private() {
            let host = self.mirror().prepare_file(path)?;
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&host)
                .map_err(|e| FsError::local(&host, e))?;
            debug!("mknod private {}", path);
            return self.mirror().stat(path);
        }

        let record = AttributeRecord::file(AttributeRecord::placeholder_size(path.as_str()), params);
        self.metadata.insert(path.clone(), record.clone());
        self.tree
            .mutate_on_create(&parent, path.file_name(), EntryKind::File);
        self.cache.mark_pending_create(path);
        self.tombstones.write().remove(path);
        info!("Created {} (pending upload)", path);
        Ok(record)
    }

    /// Open a file and return its handle
    pub fn open(&self, path: &DocPath, flags: i32) -> Result<u64, FsError> {
        self.require_file(path)?;
        let truncate = flags & libc::O_TRUNC != 0;
        let mode = OpenMode::from_flags(flags);
        let fh = self.cache.open(path, mode, truncate, self.remote())?;
        if truncate && mode.can_write() {
            self.update_size(path, 0);
        } else if !path.is_private() && !self.cache.is_pending_create(path) {
            // Listings may carry no size; the fetched shadow is authoritative
            if let Some(len) = self.cache.shadow_len(path) {
                self.metadata.update(path, |record| record.size = len);
            }
        }
        Ok(fh)
    }

    pub fn read(
        &self,
        path: &DocPath,
        fh: Option<u64>,
        offset: u64,
        size: usize,
    ) -> Result<Vec<u8>, FsError> {
        if fh.is_none() {
            self.require_file(path)?;
        }
        self.cache.read(path, fh, offset, size, self.remote())
    }

    pub fn write(
        &self,
        path: &DocPath,
        fh: Option<u64>,
        data: &[u8],
        offset: u64,
    ) -> Result<usize, FsError> {
        let _guard = self.locks.lock(path);
        if fh.is_none() {
            self.require_file(path)?;
        }
        let written = self.cache.write(path, fh, data, offset, self.remote())?;
        self.tombstones.write().remove(path);
        Ok(written)
    }

    /// Sync the shadow file to disk and refresh the recorded size
    pub fn flush(&self, path: &DocPath, fh: u64) -> Result<(), FsError> {
        let size = self.cache.flush(path, fh)?;
        if !path.is_private() {
            self.update_size(path, size);
        }
        Ok(())
    }

    /// Close a handle, uploading dirty content before returning
    pub fn release(&self, path: &DocPath, fh: u64) -> Result<(), FsError> {
        let _guard = self.locks.lock(path);
        let released = self.cache.release(path, fh, self.remote())?;
        if let Some(size) = released.uploaded {
            self.update_size(path, size);
        }
        if released.reaped > 0 {
            debug!("release of {} reaped {} idle shadows", path, released.reaped);
        }
        Ok(())
    }

    pub fn truncate(&self, path: &DocPath, length: u64) -> Result<(), FsError> {
        let _guard = self.locks.lock(path);
        self.require_file(path)?;
        self.cache.truncate(path, length, self.remote())?;
        if !path.is_private() {
            self.update_size(path, length);
        }
        Ok(())
    }

    pub fn unlink(&self, path: &DocPath) -> Result<(), FsError> {
        let _guard = self.locks.lock(path);
        self.require_file(path)?;

        if path.is_private() {
            self.mirror().remove_file(path)?;
            debug!("unlink private {}", path);
            return Ok(());
        }

        if !self.cache.is_pending_create(path) {
            self.remote().delete_entry(path.as_str(), false)?;
        }
        self.cache.discard(path)?;
        self.metadata.remove(path);
        self.tree.mutate_on_remove(&path.parent(), path.file_name());
        self.tombstones.write().insert(path.clone());
        info!("Deleted {}", path);
        Ok(())
    }

    pub fn mkdir(&self, path: &DocPath) -> Result<AttributeRecord, FsError> {
        let _guard = self.locks.lock(path);
        let parent = path.parent();
        if self.exists(path)? {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        match self.getattr(&parent) {
            Ok(record) if record.is_dir() => {}
            Ok(_) => return Err(FsError::NotDirectory(parent.to_string())),
            Err(FsError::NotFound(_)) => return Err(FsError::NotFound(parent.to_string())),
            Err(e) => return Err(e),
        }

        if path.is_private() {
            self.mirror().ensure_dir(&parent)?;
            self.mirror().create_dir(path)?;
            debug!("mkdir private {}", path);
            return self.mirror().stat(path);
        }

        self.remote().create_folder(path.as_str())?;
        let record = AttributeRecord::directory();
        self.metadata.insert(path.clone(), record.clone());
        self.tree
            .mutate_on_create(&parent, path.file_name(), EntryKind::Directory);
        self.tombstones.write().remove(path);
        info!("Created folder {}", path);
        Ok(record)
    }

    /// Remove an empty directory; the listing is refreshed first
    pub fn rmdir(&self, path: &DocPath) -> Result<(), FsError> {
        let _guard = self.locks.lock(path);
        if path.is_root() {
            return Err(FsError::InvalidPath("cannot remove the root".into()));
        }
        // `.` and `..` are always present
        if self.readdir(path)?.len() > 2 {
            return Err(FsError::NotEmpty(path.to_string()));
        }

        if !path.is_private() {
            self.remote().delete_entry(path.as_str(), true)?;
            self.metadata.remove(path);
            self.metadata.remove_descendants(path);
            self.tree.mutate_on_remove(&path.parent(), path.file_name());
            self.tombstones.write().insert(path.clone());
            info!("Deleted folder {}", path);
        }
        self.mirror().remove_dir(path)?;
        Ok(())
    }

    /// Move an entry into a different folder
    ///
    /// The remote store cannot rename in place, so `from` and `to` must have
    /// different parents. The remote move happens before any local state is
    /// touched; a file still pending creation is moved locally only.
    pub fn rename(&self, from: &DocPath, to: &DocPath) -> Result<(), FsError> {
        let _guard = self.locks.lock_all(&[from.clone(), to.clone()]);
        if from == to {
            return Err(FsError::AlreadyExists(to.to_string()));
        }
        if from.is_root() || to.is_root() {
            return Err(FsError::InvalidPath("cannot rename the root".into()));
        }
        if from.class() != to.class() {
            return Err(FsError::SameFolderRename {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        if from.is_private() {
            if self.mirror().exists(to) {
                return Err(FsError::AlreadyExists(to.to_string()));
            }
            if !self.mirror().rename(from, to)? {
                return Err(FsError::NotFound(from.to_string()));
            }
            debug!("rename private {} -> {}", from, to);
            return Ok(());
        }

        if from.parent() == to.parent() {
            return Err(FsError::SameFolderRename {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let record = self.getattr(from)?;
        if self.exists(to)? {
            return Err(FsError::AlreadyExists(to.to_string()));
        }
        self.require_dir(&to.parent())?;

        if self.cache.is_pending_create(from) {
            debug!("{} has no remote counterpart yet, moving locally", from);
        } else {
            self.remote().move_entry(from.as_str(), to.as_str())?;
        }

        self.cache.transplant(from, to)?;
        self.metadata.transplant(from, to);
        if record.is_dir() {
            self.tree.rename_dir(from, to);
        }
        self.tree.mutate_on_remove(&from.parent(), from.file_name());
        self.tree
            .mutate_on_create(&to.parent(), to.file_name(), record.kind);
        self.tombstones.write().remove(to);
        info!("Renamed {} -> {}", from, to);
        Ok(())
    }

    /// Push every unsynced write to the remote store (unmount)
    pub fn shutdown(&self) {
        let results = self.cache.sync_all(self.remote());
        let mut failed = 0;
        for (path, result) in results {
            match result {
                Ok(size) => self.update_size(&path, size),
                Err(e) => {
                    failed += 1;
                    warn!("Unsynced changes to {} are lost: {}", path, e);
                }
            }
        }
        info!(
            "Shutdown complete ({} open handles, {} failed uploads)",
            self.cache.open_handles(),
            failed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmount_core::MemoryStore;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn p(s: &str) -> DocPath {
        DocPath::parse(s).unwrap()
    }

    fn labels(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn setup() -> (TempDir, Arc<MemoryStore>, SyncController) {
        let temp = TempDir::new().unwrap();
        let mirror = HostMirror::new(temp.path().join("mirror")).unwrap();
        let remote = Arc::new(MemoryStore::new());
        let controller = SyncController::new(remote.clone(), mirror, &Config::default());
        (temp, remote, controller)
    }

    fn write_file(sc: &SyncController, path: &DocPath, data: &[u8]) {
        let fh = sc.open(path, libc::O_WRONLY).unwrap();
        sc.write(path, Some(fh), data, 0).unwrap();
        sc.release(path, fh).unwrap();
    }

    #[test]
    fn test_new_file_reports_placeholder_size() {
        let (_temp, _remote, sc) = setup();
        let path = p("/Projects/x.doc");
        sc.mkdir(&p("/Projects")).unwrap();
        sc.mknod(&path, &NewFile::default()).unwrap();

        let record = sc.getattr(&path).unwrap();
        assert_eq!(record.size, "/Projects/x.doc".len() as u64);
        assert_ne!(record.size, 0);
        assert_eq!(record.perm, 0o744);
        assert_eq!(sc.state(&path), SyncState::Cached);
    }

    #[test]
    fn test_listing_twice_is_stable() {
        let (_temp, remote, sc) = setup();
        remote.add_document("/a.doc", b"a", &[], 1);
        remote.add_document("/b.xls", b"b", &[], 2);
        remote.add_folder("/My folders");

        let first = sc.readdir(&DocPath::root()).unwrap();
        let second = sc.readdir(&DocPath::root()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec![".", "..", "a.doc", "b.xls"]);
    }

    #[test]
    fn test_write_release_evict_reread() {
        let (_temp, remote, sc) = setup();
        let path = p("/x.doc");
        sc.mknod(&path, &NewFile::default()).unwrap();
        write_file(&sc, &path, b"payload");

        sc.cache().evict(&path).unwrap();
        let fetches = remote.fetch_calls();
        assert_eq!(sc.read(&path, None, 0, 64).unwrap(), b"payload");
        assert_eq!(remote.fetch_calls(), fetches + 1);
        assert_eq!(sc.getattr(&path).unwrap().size, 7);
    }

    #[test]
    fn test_by_labels_empty_and_superset() {
        let (_temp, remote, sc) = setup();
        remote.add_document("/ab.doc", b"", &["a", "b"], 1);
        remote.add_document("/abc.doc", b"", &["a", "b", "c"], 1);
        remote.add_document("/a.doc", b"", &["a"], 1);
        sc.readdir(&DocPath::root()).unwrap();

        let all = sc.readdir_labels(&DocPath::root(), &BTreeSet::new());
        assert_eq!(all.len(), sc.metadata().len());

        let ab = sc.readdir_labels(&DocPath::root(), &labels(&["a", "b"]));
        assert_eq!(ab.len(), 2);
        assert!(ab.contains(&p("/ab.doc")));
        assert!(ab.contains(&p("/abc.doc")));
    }

    #[test]
    fn test_queries_do_not_touch_remote() {
        let (_temp, remote, sc) = setup();
        remote.add_document("/a.doc", b"", &["a"], 1);

        let result = sc.readdir_labels(&DocPath::root(), &labels(&["a"]));
        assert!(result.is_empty());
        assert_eq!(remote.listing_calls(), 0);
    }

    #[test]
    fn test_time_queries() {
        let (_temp, remote, sc) = setup();
        remote.add_document("/old.doc", b"", &["t"], 1_000);
        remote.add_document("/new.doc", b"", &["t"], 2_000);
        sc.readdir(&DocPath::root()).unwrap();

        let result = sc.readdir_times(&DocPath::root(), TimeRange::new(1_000, 1_500));
        assert!(result.contains(&p("/old.doc")));
        assert!(!result.contains(&p("/new.doc")));

        let result =
            sc.readdir_labels_times(&DocPath::root(), &labels(&["t"]), TimeRange::new(1_500, 2_000));
        assert_eq!(result.records.keys().collect::<Vec<_>>(), vec![&p("/new.doc")]);
    }

    #[test]
    fn test_rmdir_not_empty_then_empty() {
        let (_temp, remote, sc) = setup();
        remote.add_document("/d/x.doc", b"", &[], 1);
        let dir = p("/d");
        sc.readdir(&DocPath::root()).unwrap();

        assert!(matches!(sc.rmdir(&dir), Err(FsError::NotEmpty(_))));

        sc.unlink(&p("/d/x.doc")).unwrap();
        sc.rmdir(&dir).unwrap();
        assert!(!sc.metadata().contains(&dir));
        assert!(!sc.tree().children(&DocPath::root()).unwrap().contains("d"));
        assert!(!remote.contains("/d"));
        assert_eq!(sc.state(&dir), SyncState::Deleted);
        assert!(matches!(sc.getattr(&dir), Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_rmdir_counts_private_children() {
        let (_temp, _remote, sc) = setup();
        let dir = p("/d");
        sc.mkdir(&dir).unwrap();
        sc.mknod(&p("/d/.lock"), &NewFile::default()).unwrap();

        assert!(matches!(sc.rmdir(&dir), Err(FsError::NotEmpty(_))));
    }

    #[test]
    fn test_rmdir_sees_remote_children_added_elsewhere() {
        let (_temp, remote, sc) = setup();
        let dir = p("/d");
        sc.mkdir(&dir).unwrap();
        remote.add_document("/d/late.doc", b"", &[], 1);

        assert!(matches!(sc.rmdir(&dir), Err(FsError::NotEmpty(_))));
    }

    #[test]
    fn test_rename_same_folder_rejected() {
        let (_temp, remote, sc) = setup();
        remote.add_document("/a.doc", b"a", &[], 1);
        let err = sc.rename(&p("/a.doc"), &p("/b.doc")).unwrap_err();
        assert!(matches!(err, FsError::SameFolderRename { .. }));
        assert_eq!(err.to_errno(), libc::EXDEV);
    }

    #[test]
    fn test_rename_to_self_and_onto_existing() {
        let (_temp, remote, sc) = setup();
        remote.add_document("/a.doc", b"a", &[], 1);
        remote.add_document("/f/a.doc", b"f", &[], 1);

        assert!(matches!(
            sc.rename(&p("/a.doc"), &p("/a.doc")),
            Err(FsError::AlreadyExists(_))
        ));
        assert!(matches!(
            sc.rename(&p("/a.doc"), &p("/f/a.doc")),
            Err(FsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_rename_transplants_record() {
        let (_temp, remote, sc) = setup();
        remote.add_document("/a.doc", b"body", &["k"], 1_000);
        remote.add_folder("/f");
        let from = p("/a.doc");
        let to = p("/f/a.doc");

        let before = sc.getattr(&from).unwrap();
        sc.rename(&from, &to).unwrap();

        assert_eq!(sc.getattr(&to).unwrap(), before);
        assert!(matches!(sc.getattr(&from), Err(FsError::NotFound(_))));
        assert_eq!(remote.content("/f/a.doc").unwrap(), b"body");
        assert!(sc.tree().children(&p("/f")).unwrap().contains("a.doc"));
        assert!(!sc.tree().children(&DocPath::root()).unwrap().contains("a.doc"));
    }

    #[test]
    fn test_rename_remote_failure_leaves_local_state() {
        let (_temp, remote, sc) = setup();
        remote.add_document("/a.doc", b"body", &[], 1);
        remote.add_folder("/f");
        sc.readdir(&DocPath::root()).unwrap();
        sc.readdir(&p("/f")).unwrap();

        remote.set_offline(true);
        assert!(matches!(
            sc.rename(&p("/a.doc"), &p("/f/a.doc")),
            Err(FsError::Remote(_))
        ));
        assert!(sc.metadata().contains(&p("/a.doc")));
        assert!(!sc.metadata().contains(&p("/f/a.doc")));
    }

    #[test]
    fn test_rename_pending_file_moves_locally() {
        let (_temp, remote, sc) = setup();
        sc.mkdir(&p("/f")).unwrap();
        let from = p("/draft.doc");
        let to = p("/f/draft.doc");
        sc.mknod(&from, &NewFile::default()).unwrap();

        sc.rename(&from, &to).unwrap();
        assert!(!remote.contains("/draft.doc"));
        assert!(!remote.contains("/f/draft.doc"));
        assert!(sc.metadata().contains(&to));
        assert!(!sc.metadata().contains(&from));

        write_file(&sc, &to, b"late");
        assert_eq!(remote.content("/f/draft.doc").unwrap(), b"late");
    }

    #[test]
    fn test_rename_directory_rewrites_descendants() {
        let (_temp, remote, sc) = setup();
        remote.add_document("/a/b/c.doc", b"c", &[], 1);
        remote.add_folder("/z");
        sc.readdir(&DocPath::root()).unwrap();
        sc.readdir(&p("/a")).unwrap();
        sc.readdir(&p("/a/b")).unwrap();

        sc.rename(&p("/a"), &p("/z/a")).unwrap();
        assert!(sc.metadata().contains(&p("/z/a/b/c.doc")));
        assert!(!sc.metadata().contains(&p("/a/b/c.doc")));
        assert!(sc.tree().children(&p("/z/a/b")).unwrap().contains("c.doc"));
        assert_eq!(sc.read(&p("/z/a/b/c.doc"), None, 0, 8).unwrap(), b"c");
    }

    #[test]
    fn test_rename_between_private_and_remote_rejected() {
        let (_temp, _remote, sc) = setup();
        sc.mkdir(&p("/f")).unwrap();
        sc.mknod(&p("/.swap"), &NewFile::default()).unwrap();
        assert!(matches!(
            sc.rename(&p("/.swap"), &p("/f/x.doc")),
            Err(FsError::SameFolderRename { .. })
        ));
    }

    #[test]
    fn test_private_rename_within_folder() {
        let (_temp, remote, sc) = setup();
        sc.mknod(&p("/.a.swp"), &NewFile::default()).unwrap();
        sc.rename(&p("/.a.swp"), &p("/.b.swp")).unwrap();
        assert!(sc.getattr(&p("/.b.swp")).is_ok());
        assert_eq!(remote.listing_calls(), 0);
    }

    #[test]
    fn test_mknod_labels_scenario() {
        let (_temp, remote, sc) = setup();
        let path = p("/x.doc");
        sc.mknod(&path, &NewFile::with_labels(["t"])).unwrap();
        let fh = sc.open(&path, libc::O_RDWR).unwrap();
        sc.write(&path, Some(fh), b"hi", 0).unwrap();
        assert_eq!(sc.state(&path), SyncState::Dirty);
        sc.release(&path, fh).unwrap();

        assert_eq!(remote.content("/x.doc").unwrap(), b"hi");
        assert_eq!(sc.state(&path), SyncState::Cached);
        let result = sc.readdir_labels(&DocPath::root(), &labels(&["t"]));
        assert!(result.contains(&path));

        // A later listing keeps the local labels the remote entry lacks
        sc.readdir(&DocPath::root()).unwrap();
        assert!(sc
            .readdir_labels(&DocPath::root(), &labels(&["t"]))
            .contains(&path));
    }

    #[test]
    fn test_idle_shadow_reaped_on_unrelated_release() {
        let (_temp, remote, sc) = setup();
        remote.add_document("/idle.doc", b"zzz", &[], 1);
        remote.add_document("/busy.doc", b"", &[], 1);
        let idle = p("/idle.doc");
        let busy = p("/busy.doc");

        assert_eq!(sc.read(&idle, None, 0, 3).unwrap(), b"zzz");
        let before = sc.getattr(&idle).unwrap();
        sc.cache().set_last_access(
            &idle,
            SystemTime::now() - Duration::from_secs(docmount_core::DEFAULT_IDLE_TTL_SECS + 1),
        );

        let fh = sc.open(&busy, libc::O_RDONLY).unwrap();
        sc.release(&busy, fh).unwrap();

        assert!(!sc.cache().has_shadow(&idle));
        assert_eq!(sc.getattr(&idle).unwrap(), before);
    }

    #[test]
    fn test_failed_upload_stays_dirty_and_retries() {
        let (_temp, remote, sc) = setup();
        let path = p("/x.doc");
        sc.mknod(&path, &NewFile::default()).unwrap();
        let fh = sc.open(&path, libc::O_WRONLY).unwrap();
        sc.write(&path, Some(fh), b"data", 0).unwrap();

        remote.set_offline(true);
        assert!(sc.release(&path, fh).is_err());
        assert_eq!(sc.state(&path), SyncState::Dirty);

        sc.cache().set_last_access(
            &path,
            SystemTime::now() - Duration::from_secs(docmount_core::DEFAULT_IDLE_TTL_SECS + 1),
        );
        assert_eq!(sc.cache().reap(), 0);

        remote.set_offline(false);
        let fh = sc.open(&path, libc::O_RDONLY).unwrap();
        sc.release(&path, fh).unwrap();
        assert_eq!(remote.content("/x.doc").unwrap(), b"data");
        assert_eq!(sc.state(&path), SyncState::Cached);
    }

    #[test]
    fn test_flush_updates_size_without_upload() {
        let (_temp, remote, sc) = setup();
        let path = p("/x.doc");
        sc.mknod(&path, &NewFile::default()).unwrap();
        let fh = sc.open(&path, libc::O_RDWR).unwrap();
        sc.write(&path, Some(fh), b"abc", 0).unwrap();

        sc.flush(&path, fh).unwrap();
        assert_eq!(sc.getattr(&path).unwrap().size, 3);
        assert_eq!(remote.upload_calls(), 0);
        sc.release(&path, fh).unwrap();
    }

    #[test]
    fn test_open_directory_is_wrong_type() {
        let (_temp, _remote, sc) = setup();
        sc.mkdir(&p("/d")).unwrap();
        let err = sc.open(&p("/d"), libc::O_RDONLY).unwrap_err();
        assert!(err.is_wrong_type());
        assert_eq!(err.to_errno(), libc::EISDIR);
        assert!(matches!(sc.unlink(&p("/d")), Err(FsError::IsDirectory(_))));
    }

    #[test]
    fn test_readdir_on_file_is_not_directory() {
        let (_temp, remote, sc) = setup();
        remote.add_document("/a.doc", b"", &[], 1);
        assert!(matches!(
            sc.readdir(&p("/a.doc")),
            Err(FsError::NotDirectory(_))
        ));
    }

    #[test]
    fn test_mkdir_rules() {
        let (_temp, remote, sc) = setup();
        sc.mkdir(&p("/d")).unwrap();
        assert!(remote.contains("/d"));
        assert!(matches!(sc.mkdir(&p("/d")), Err(FsError::AlreadyExists(_))));
        assert!(matches!(
            sc.mkdir(&p("/missing/d")),
            Err(FsError::NotFound(_))
        ));

        sc.mkdir(&p("/.private")).unwrap();
        assert!(!remote.contains("/.private"));
        assert!(sc.readdir(&DocPath::root()).unwrap().contains(&".private".to_string()));
    }

    #[test]
    fn test_unlink_pending_file_skips_remote() {
        let (_temp, remote, sc) = setup();
        let path = p("/x.doc");
        sc.mknod(&path, &NewFile::default()).unwrap();
        sc.unlink(&path).unwrap();

        assert_eq!(sc.state(&path), SyncState::Deleted);
        assert!(!sc.tree().children(&DocPath::root()).unwrap().contains("x.doc"));
        assert!(!remote.contains("/x.doc"));
    }

    #[test]
    fn test_unlink_remote_file() {
        let (_temp, remote, sc) = setup();
        remote.add_document("/a.doc", b"a", &[], 1);
        sc.read(&p("/a.doc"), None, 0, 1).unwrap();

        sc.unlink(&p("/a.doc")).unwrap();
        assert!(!remote.contains("/a.doc"));
        assert!(!sc.cache().has_shadow(&p("/a.doc")));
        assert!(matches!(sc.unlink(&p("/a.doc")), Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_private_file_lifecycle() {
        let (_temp, remote, sc) = setup();
        let path = p("/.notes");
        sc.mknod(&path, &NewFile::default()).unwrap();
        let fh = sc.open(&path, libc::O_RDWR).unwrap();
        sc.write(&path, Some(fh), b"secret", 0).unwrap();
        sc.release(&path, fh).unwrap();

        assert_eq!(sc.getattr(&path).unwrap().size, 6);
        assert_eq!(sc.read(&path, None, 0, 6).unwrap(), b"secret");
        assert_eq!(remote.upload_calls(), 0);
        assert_eq!(remote.fetch_calls(), 0);

        sc.unlink(&path).unwrap();
        assert!(matches!(sc.getattr(&path), Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_truncate_updates_size() {
        let (_temp, remote, sc) = setup();
        remote.add_document("/a.doc", b"abcdef", &[], 1);
        let path = p("/a.doc");

        sc.truncate(&path, 2).unwrap();
        assert_eq!(sc.getattr(&path).unwrap().size, 2);
        assert_eq!(sc.state(&path), SyncState::Dirty);
    }

    #[test]
    fn test_open_with_trunc_flag() {
        let (_temp, remote, sc) = setup();
        remote.add_document("/a.doc", b"abcdef", &[], 1);
        let path = p("/a.doc");

        let fh = sc.open(&path, libc::O_WRONLY | libc::O_TRUNC).unwrap();
        assert_eq!(sc.getattr(&path).unwrap().size, 0);
        sc.write(&path, Some(fh), b"xy", 0).unwrap();
        sc.release(&path, fh).unwrap();
        assert_eq!(remote.content("/a.doc").unwrap(), b"xy");
    }

    #[test]
    fn test_shutdown_uploads_dirty_files() {
        let (_temp, remote, sc) = setup();
        let path = p("/x.doc");
        sc.mknod(&path, &NewFile::default()).unwrap();
        sc.write(&path, None, b"unsaved", 0).unwrap();

        sc.shutdown();
        assert_eq!(remote.content("/x.doc").unwrap(), b"unsaved");
        assert_eq!(sc.state(&path), SyncState::Cached);
    }

    #[test]
    fn test_state_unknown_until_seen() {
        let (_temp, remote, sc) = setup();
        remote.add_document("/a.doc", b"", &[], 1);
        let path = p("/a.doc");
        assert_eq!(sc.state(&path), SyncState::Unknown);
        sc.getattr(&path).unwrap();
        assert_eq!(sc.state(&path), SyncState::Cached);
    }

    /// Store whose listings carry no content length
    struct SizelessStore(MemoryStore);

    impl RemoteStore for SizelessStore {
        fn fetch_listing(
            &self,
            folder: &str,
            filter: docmount_core::TypeFilter,
        ) -> Result<Vec<docmount_core::RemoteEntry>, docmount_core::RemoteError> {
            let mut entries = self.0.fetch_listing(folder, filter)?;
            for entry in &mut entries {
                entry.size = None;
            }
            Ok(entries)
        }

        fn fetch_content(&self, path: &str) -> Result<Vec<u8>, docmount_core::RemoteError> {
            self.0.fetch_content(path)
        }

        fn create_folder(&self, path: &str) -> Result<(), docmount_core::RemoteError> {
            self.0.create_folder(path)
        }

        fn delete_entry(&self, path: &str, is_folder: bool) -> Result<(), docmount_core::RemoteError> {
            self.0.delete_entry(path, is_folder)
        }

        fn move_entry(&self, from: &str, to: &str) -> Result<(), docmount_core::RemoteError> {
            self.0.move_entry(from, to)
        }

        fn create_or_update_content(
            &self,
            path: &str,
            content: &[u8],
        ) -> Result<(), docmount_core::RemoteError> {
            self.0.create_or_update_content(path, content)
        }

        fn name(&self) -> &'static str {
            "sizeless"
        }
    }

    #[test]
    fn test_open_takes_size_from_fetched_content() {
        let temp = TempDir::new().unwrap();
        let mirror = HostMirror::new(temp.path().join("mirror")).unwrap();
        let remote = Arc::new(SizelessStore(MemoryStore::new()));
        remote.0.add_document("/a.doc", &[7u8; 1000], &[], 1);
        let sc = SyncController::new(remote.clone(), mirror, &Config::default());
        let path = p("/a.doc");

        assert_eq!(sc.getattr(&path).unwrap().size, "/a.doc".len() as u64);
        let fh = sc.open(&path, libc::O_RDONLY).unwrap();
        assert_eq!(sc.getattr(&path).unwrap().size, 1000);
        assert_eq!(sc.read(&path, Some(fh), 0, 4096).unwrap().len(), 1000);
        sc.release(&path, fh).unwrap();
    }

    #[test]
    fn test_open_pending_file_keeps_placeholder() {
        let (_temp, _remote, sc) = setup();
        let path = p("/new.doc");
        sc.mknod(&path, &NewFile::default()).unwrap();

        let fh = sc.open(&path, libc::O_RDONLY).unwrap();
        assert_eq!(sc.getattr(&path).unwrap().size, "/new.doc".len() as u64);
        sc.release(&path, fh).unwrap();
    }

    #[test]
    fn test_relisted_path_is_no_longer_deleted() {
        let (_temp, remote, sc) = setup();
        remote.add_document("/a.doc", b"one", &[], 1);
        let path = p("/a.doc");
        sc.getattr(&path).unwrap();

        sc.unlink(&path).unwrap();
        assert_eq!(sc.state(&path), SyncState::Deleted);

        remote.add_document("/a.doc", b"two", &[], 2);
        sc.readdir(&DocPath::root()).unwrap();
        assert_eq!(sc.state(&path), SyncState::Cached);
        assert!(sc.getattr(&path).is_ok());
        assert!(sc.tombstones.read().is_empty());
    }

    #[test]
    fn test_query_forgets_folder_removed_elsewhere() {
        let (_temp, remote, sc) = setup();
        remote.add_document("/d/x.doc", b"", &["t"], 1);
        sc.readdir(&DocPath::root()).unwrap();
        sc.readdir(&p("/d")).unwrap();
        assert_eq!(sc.readdir_labels(&DocPath::root(), &labels(&["t"])).len(), 1);

        remote.delete_entry("/d", true).unwrap();
        assert_eq!(sc.readdir(&DocPath::root()).unwrap(), vec![".", ".."]);
        assert!(sc.readdir_labels(&DocPath::root(), &labels(&["t"])).is_empty());
        assert!(!sc.tree().is_known_dir(&p("/d")));
    }
}
