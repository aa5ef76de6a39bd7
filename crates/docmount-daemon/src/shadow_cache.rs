//! Local write-back cache
//!
//! Remote documents are read and written through shadow files in the host
//! mirror. The first open of a document downloads its body into the shadow
//! file; writes land there and mark the path dirty; `release` pushes dirty
//! content back to the remote store.
//!
//! # State per path
//! - `access`: known shadow files and their last touch, drives idle reaping
//! - `dirty`: written since the last successful upload
//! - `pending_create`: created locally, no remote counterpart yet
//! - `uploading`: upload in flight
//!
//! `release`, `flush` and the reaper sweep run under one process-wide lock;
//! `open`, `read` and `write` do not take it.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use docmount_core::{DocPath, FsError, RemoteStore, DEFAULT_IDLE_TTL_SECS};

use crate::mirror::HostMirror;
use crate::positional;

/// Access mode requested by `open`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
    Append,
    #[default]
    AppendReadWrite,
}

impl OpenMode {
    /// Decode POSIX open flags; anything unrecognized is append-read-write
    pub fn from_flags(flags: i32) -> Self {
        let append = flags & libc::O_APPEND != 0;
        match flags & libc::O_ACCMODE {
            libc::O_RDONLY => OpenMode::Read,
            libc::O_WRONLY if append => OpenMode::Append,
            libc::O_WRONLY => OpenMode::Write,
            libc::O_RDWR if append => OpenMode::AppendReadWrite,
            libc::O_RDWR => OpenMode::ReadWrite,
            _ => OpenMode::AppendReadWrite,
        }
    }

    pub fn can_read(&self) -> bool {
        matches!(
            self,
            OpenMode::Read | OpenMode::ReadWrite | OpenMode::AppendReadWrite
        )
    }

    pub fn can_write(&self) -> bool {
        !matches!(self, OpenMode::Read)
    }

    fn options(&self) -> OpenOptions {
        let mut options = OpenOptions::new();
        options.read(self.can_read()).write(self.can_write());
        options
    }
}

struct OpenFile {
    path: DocPath,
    mode: OpenMode,
    file: Arc<File>,
}

/// Result of a `release`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Released {
    /// Size of the uploaded body, when an upload happened
    pub uploaded: Option<u64>,
    /// Shadow files removed by the sweep
    pub reaped: usize,
}

/// Shadow file cache in front of the remote store
pub struct ShadowCache {
    mirror: HostMirror,
    handles: DashMap<u64, OpenFile>,
    next_handle: AtomicU64,
    access: RwLock<HashMap<DocPath, SystemTime>>,
    dirty: RwLock<HashSet<DocPath>>,
    pending_create: RwLock<HashSet<DocPath>>,
    uploading: RwLock<HashSet<DocPath>>,
    release_lock: Mutex<()>,
    idle_ttl: Duration,
}

impl ShadowCache {
    /// Create a cache with the default idle TTL
    pub fn new(mirror: HostMirror) -> Self {
        Self::with_idle_ttl(mirror, Duration::from_secs(DEFAULT_IDLE_TTL_SECS))
    }

    pub fn with_idle_ttl(mirror: HostMirror, idle_ttl: Duration) -> Self {
        Self {
            mirror,
            handles: DashMap::new(),
            next_handle: AtomicU64::new(1),
            access: RwLock::new(HashMap::new()),
            dirty: RwLock::new(HashSet::new()),
            pending_create: RwLock::new(HashSet::new()),
            uploading: RwLock::new(HashSet::new()),
            release_lock: Mutex::new(()),
            idle_ttl,
        }
    }

    pub fn mirror(&self) -> &HostMirror {
        &self.mirror
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    pub fn is_dirty(&self, path: &DocPath) -> bool {
        self.dirty.read().contains(path)
    }

    pub fn is_pending_create(&self, path: &DocPath) -> bool {
        self.pending_create.read().contains(path)
    }

    pub fn is_uploading(&self, path: &DocPath) -> bool {
        self.uploading.read().contains(path)
    }

    /// True if a shadow file for this path is resident
    pub fn has_shadow(&self, path: &DocPath) -> bool {
        if path.is_private() {
            return self.mirror.exists(path);
        }
        self.access.read().contains_key(path) && self.mirror.exists(path)
    }

    pub fn is_open(&self, path: &DocPath) -> bool {
        self.handles.iter().any(|h| h.path == *path)
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Length of the shadow file, if present
    pub fn shadow_len(&self, path: &DocPath) -> Option<u64> {
        self.mirror.file_len(path)
    }

    /// Flag a locally created file that has no remote counterpart yet
    pub fn mark_pending_create(&self, path: &DocPath) {
        self.pending_create.write().insert(path.clone());
    }

    /// Names of pending-create children of `dir`
    pub fn pending_children(&self, dir: &DocPath) -> BTreeSet<String> {
        self.pending_create
            .read()
            .iter()
            .filter(|p| p.parent() == *dir && !p.is_root())
            .map(|p| p.file_name().to_string())
            .collect()
    }

    /// Children of `dir` that still hold unsynced writes
    pub fn dirty_children(&self, dir: &DocPath) -> Vec<DocPath> {
        self.dirty
            .read()
            .iter()
            .filter(|p| p.parent() == *dir)
            .cloned()
            .collect()
    }

    fn touch(&self, path: &DocPath) {
        if !path.is_private() {
            self.access.write().insert(path.clone(), SystemTime::now());
        }
    }

    fn mark_dirty(&self, path: &DocPath) {
        if !path.is_private() && self.dirty.write().insert(path.clone()) {
            debug!("Marked dirty: {}", path);
        }
    }

    /// Backdate the last access of a shadow file
    pub fn set_last_access(&self, path: &DocPath, when: SystemTime) {
        if let Some(t) = self.access.write().get_mut(path) {
            *t = when;
        }
    }

    /// Make sure a shadow file exists, downloading it when needed
    fn materialize(&self, path: &DocPath, remote: &dyn RemoteStore) -> Result<PathBuf, FsError> {
        let host = self.mirror.prepare_file(path)?;

        if path.is_private() {
            if !host.exists() {
                File::create(&host).map_err(|e| FsError::local(&host, e))?;
            }
            return Ok(host);
        }

        if self.access.read().contains_key(path) && host.exists() {
            self.touch(path);
            return Ok(host);
        }

        if self.is_pending_create(path) {
            if !host.exists() {
                File::create(&host).map_err(|e| FsError::local(&host, e))?;
            }
        } else {
            let content = remote.fetch_content(path.as_str())?;
            write_atomic(&host, &content)?;
            debug!("Fetched {} ({} bytes) into shadow", path, content.len());
        }
        self.touch(path);
        Ok(host)
    }

    /// Open a shadow file, returning a handle (numbered from 1)
    pub fn open(
        &self,
        path: &DocPath,
        mode: OpenMode,
        truncate: bool,
        remote: &dyn RemoteStore,
    ) -> Result<u64, FsError> {
        let host = self.materialize(path, remote)?;
        let file = mode.options().open(&host).map_err(|e| FsError::local(&host, e))?;

        if truncate && mode.can_write() {
            file.set_len(0).map_err(|e| FsError::local(&host, e))?;
            self.mark_dirty(path);
        }

        let fh = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.handles.insert(
            fh,
            OpenFile {
                path: path.clone(),
                mode,
                file: Arc::new(file),
            },
        );
        trace!("open {} as fh={} ({:?})", path, fh, mode);
        Ok(fh)
    }

    fn handle(&self, fh: u64, path: &DocPath) -> Result<(OpenMode, Arc<File>), FsError> {
        match self.handles.get(&fh) {
            Some(open) if open.path == *path => Ok((open.mode, open.file.clone())),
            Some(open) => {
                warn!("fh={} belongs to {}, not {}", fh, open.path, path);
                Err(FsError::BadHandle(fh))
            }
            None => Err(FsError::BadHandle(fh)),
        }
    }

    /// Read from a shadow file; without a handle a transient one is used
    pub fn read(
        &self,
        path: &DocPath,
        fh: Option<u64>,
        offset: u64,
        size: usize,
        remote: &dyn RemoteStore,
    ) -> Result<Vec<u8>, FsError> {
        let (fh, transient) = match fh {
            Some(fh) => (fh, false),
            None => (self.open(path, OpenMode::Read, false, remote)?, true),
        };
        let result = self.handle(fh, path).and_then(|(mode, file)| {
            if !mode.can_read() {
                return Err(FsError::BadHandle(fh));
            }
            positional::read_exact_or_eof(&file, offset, size)
                .map_err(|e| FsError::local(path.as_str(), e))
        });
        if transient {
            self.handles.remove(&fh);
        }
        self.touch(path);
        result
    }

    /// Write into a shadow file at `offset`, marking the path dirty
    pub fn write(
        &self,
        path: &DocPath,
        fh: Option<u64>,
        data: &[u8],
        offset: u64,
        remote: &dyn RemoteStore,
    ) -> Result<usize, FsError> {
        let (fh, transient) = match fh {
            Some(fh) => (fh, false),
            None => (self.open(path, OpenMode::Write, false, remote)?, true),
        };
        let result = self.handle(fh, path).and_then(|(mode, file)| {
            if !mode.can_write() {
                return Err(FsError::BadHandle(fh));
            }
            positional::write_all_at(&file, data, offset)
                .map_err(|e| FsError::local(path.as_str(), e))
        });
        if transient {
            self.handles.remove(&fh);
        }
        result?;
        self.mark_dirty(path);
        self.touch(path);
        trace!("write {} bytes at {} to {}", data.len(), offset, path);
        Ok(data.len())
    }

    /// Set the shadow file length
    pub fn truncate(
        &self,
        path: &DocPath,
        length: u64,
        remote: &dyn RemoteStore,
    ) -> Result<(), FsError> {
        let host = self.materialize(path, remote)?;
        let file = OpenOptions::new()
            .write(true)
            .open(&host)
            .map_err(|e| FsError::local(&host, e))?;
        file.set_len(length).map_err(|e| FsError::local(&host, e))?;
        self.mark_dirty(path);
        self.touch(path);
        Ok(())
    }

    /// Sync a handle's shadow file to disk and report its length
    ///
    /// Never uploads.
    pub fn flush(&self, path: &DocPath, fh: u64) -> Result<u64, FsError> {
        let _guard = self.release_lock.lock();
        let (_, file) = self.handle(fh, path)?;
        file.sync_all()
            .map_err(|e| FsError::local(path.as_str(), e))?;
        let len = file
            .metadata()
            .map_err(|e| FsError::local(path.as_str(), e))?
            .len();
        Ok(len)
    }

    /// Close a handle, upload dirty content, then sweep idle shadows
    ///
    /// A failed upload leaves the path dirty so a later release retries.
    pub fn release(
        &self,
        path: &DocPath,
        fh: u64,
        remote: &dyn RemoteStore,
    ) -> Result<Released, FsError> {
        let _guard = self.release_lock.lock();

        let known = matches!(self.handles.get(&fh), Some(open) if open.path == *path);
        if !known {
            return Err(FsError::BadHandle(fh));
        }
        self.handles.remove(&fh);

        let mut released = Released::default();
        let upload = if path.is_private() || !self.is_dirty(path) {
            Ok(None)
        } else if self.is_pending_create(path) {
            self.upload(path, remote).map(|size| {
                self.pending_create.write().remove(path);
                Some(size)
            })
        } else if self.mirror.exists(path) {
            self.upload(path, remote).map(Some)
        } else {
            Ok(None)
        };

        released.reaped = self.reap_locked();
        released.uploaded = upload?;
        Ok(released)
    }

    fn upload(&self, path: &DocPath, remote: &dyn RemoteStore) -> Result<u64, FsError> {
        let host = self.mirror.resolve(path)?;
        self.uploading.write().insert(path.clone());

        let result = fs::read(&host)
            .map_err(|e| FsError::local(&host, e))
            .and_then(|content| {
                remote
                    .create_or_update_content(path.as_str(), &content)
                    .map(|()| content.len() as u64)
                    .map_err(FsError::from)
            });

        self.uploading.write().remove(path);
        match &result {
            Ok(size) => {
                self.dirty.write().remove(path);
                info!("Uploaded {} ({} bytes)", path, size);
            }
            Err(e) => warn!("Upload of {} failed, keeping it dirty: {}", path, e),
        }
        result
    }

    /// Upload every dirty path, reporting the outcome per path
    pub fn sync_all(&self, remote: &dyn RemoteStore) -> Vec<(DocPath, Result<u64, FsError>)> {
        let _guard = self.release_lock.lock();
        let dirty: Vec<DocPath> = self.dirty.read().iter().cloned().collect();
        dirty
            .into_iter()
            .map(|path| {
                let result = self.upload(&path, remote);
                if result.is_ok() {
                    self.pending_create.write().remove(&path);
                }
                (path, result)
            })
            .collect()
    }

    /// Delete idle shadow files (takes the release lock)
    pub fn reap(&self) -> usize {
        let _guard = self.release_lock.lock();
        self.reap_locked()
    }

    fn reap_locked(&self) -> usize {
        let now = SystemTime::now();
        let idle: Vec<DocPath> = self
            .access
            .read()
            .iter()
            .filter(|(_, last)| {
                now.duration_since(**last)
                    .map(|age| age > self.idle_ttl)
                    .unwrap_or(false)
            })
            .map(|(path, _)| path.clone())
            .collect();

        let mut reaped = 0;
        for path in idle {
            if self.is_exempt(&path) {
                trace!("reaper skipping {}", path);
                continue;
            }
            match self.mirror.remove_file(&path) {
                Ok(_) => {
                    self.access.write().remove(&path);
                    reaped += 1;
                    debug!("Reaped idle shadow {}", path);
                }
                Err(e) => warn!("Failed to reap {}: {}", path, e),
            }
        }
        reaped
    }

    fn is_exempt(&self, path: &DocPath) -> bool {
        path.is_private()
            || self.is_dirty(path)
            || self.is_pending_create(path)
            || self.is_uploading(path)
            || self.is_open(path)
    }

    /// Drop the shadow file and access entry of a path
    pub fn evict(&self, path: &DocPath) -> Result<(), FsError> {
        self.access.write().remove(path);
        self.mirror.remove_file(path)?;
        Ok(())
    }

    /// Evict and forget every flag for a removed path
    pub fn discard(&self, path: &DocPath) -> Result<(), FsError> {
        self.dirty.write().remove(path);
        self.pending_create.write().remove(path);
        self.evict(path)
    }

    /// Move shadow content and state from `from` (and below) to `to`
    pub fn transplant(&self, from: &DocPath, to: &DocPath) -> Result<(), FsError> {
        self.mirror.rename(from, to)?;

        rebase_set(&mut self.dirty.write(), from, to);
        rebase_set(&mut self.pending_create.write(), from, to);
        {
            let mut access = self.access.write();
            let moved: Vec<DocPath> = access
                .keys()
                .filter(|p| *p == from || p.is_descendant_of(from))
                .cloned()
                .collect();
            for old in moved {
                if let (Some(t), Some(new)) = (access.remove(&old), old.rebase(from, to)) {
                    access.insert(new, t);
                }
            }
        }
        for mut open in self.handles.iter_mut() {
            if let Some(new) = open.path.rebase(from, to) {
                open.path = new;
            }
        }
        Ok(())
    }
}

fn rebase_set(set: &mut HashSet<DocPath>, from: &DocPath, to: &DocPath) {
    let moved: Vec<DocPath> = set
        .iter()
        .filter(|p| *p == from || p.is_descendant_of(from))
        .cloned()
        .collect();
    for old in moved {
        set.remove(&old);
        if let Some(new) = old.rebase(from, to) {
            set.insert(new);
        }
    }
}

/// Write a shadow file atomically (tmp file + rename)
fn write_atomic(target: &Path, data: &[u8]) -> Result<(), FsError> {
    let mut tmp_name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".docmount-tmp");
    let temp_path = target.with_file_name(tmp_name);
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| FsError::local(&temp_path, e))?;
        file.write_all(data)
            .map_err(|e| FsError::local(&temp_path, e))?;
        file.sync_all()
            .map_err(|e| FsError::local(&temp_path, e))?;
    }
    fs::rename(&temp_path, target).map_err(|e| FsError::local(target, e))
}
