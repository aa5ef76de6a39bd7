//! FUSE filesystem implementation
//!
//! Implements `fuser::Filesystem` on top of [`SyncController`]. The kernel
//! speaks inode numbers; this layer resolves them to mount paths through an
//! [`InodeTable`] and maps every [`FsError`] to an errno.
//!
//! - `create` is `mknod` followed by `open`
//! - `setattr` with a size is a truncate; other attribute changes are ignored
//! - `destroy` pushes outstanding writes to the remote store

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use fuser::{
    FileAttr as FuserAttr, FileType as FuserFileType, Filesystem, KernelConfig, ReplyAttr,
    ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite,
    Request,
};
use tracing::{debug, error, info, trace, warn};

use docmount_core::{AttributeRecord, DocPath, EntryKind, FsError, NewFile};

use crate::inodes::{InodeTable, ROOT_INODE};
use crate::sync_engine::SyncController;

/// Block size reported to the kernel
const BLOCK_SIZE: u32 = 512;

/// FUSE adapter over a sync controller
pub struct DocFs {
    controller: Arc<SyncController>,
    inodes: InodeTable,
    ttl: Duration,
    uid: u32,
    gid: u32,
}

impl DocFs {
    pub fn new(controller: Arc<SyncController>, attr_ttl: Duration) -> Self {
        info!("Initializing DocFs (attr TTL {:?})", attr_ttl);
        Self {
            controller,
            inodes: InodeTable::new(),
            ttl: attr_ttl,
            // SAFETY: libc::getuid() and libc::getgid() are thread-safe syscall wrappers
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    pub fn controller(&self) -> Arc<SyncController> {
        self.controller.clone()
    }

    fn to_fuser_kind(kind: EntryKind) -> FuserFileType {
        match kind {
            EntryKind::File => FuserFileType::RegularFile,
            EntryKind::Directory => FuserFileType::Directory,
        }
    }

    /// Convert an attribute record to fuser's FileAttr
    fn to_fuser_attr(&self, ino: u64, record: &AttributeRecord) -> FuserAttr {
        let at = |secs: i64| UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64);
        FuserAttr {
            ino,
            size: record.size,
            blocks: record.size.div_ceil(BLOCK_SIZE as u64),
            atime: at(record.atime),
            mtime: at(record.mtime),
            ctime: at(record.ctime),
            crtime: at(record.ctime),
            kind: Self::to_fuser_kind(record.kind),
            perm: record.perm,
            nlink: record.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    fn path_of(&self, ino: u64) -> Result<DocPath, i32> {
        self.inodes.path(ino).ok_or_else(|| {
            trace!("unknown inode {}", ino);
            libc::ENOENT
        })
    }

    fn child_of(&self, parent: u64, name: &OsStr) -> Result<DocPath, i32> {
        let name = name.to_str().ok_or(libc::EINVAL)?;
        let parent = self.path_of(parent)?;
        parent.join(name).map_err(|e| e.to_errno())
    }

    /// Log an operation failure and return its errno
    fn errno(op: &str, path: &DocPath, e: &FsError) -> i32 {
        match e {
            FsError::NotFound(_) => trace!("{} {}: {}", op, path, e),
            FsError::Remote(_) | FsError::LocalIo { .. } => error!("{} {}: {}", op, path, e),
            _ => debug!("{} {}: {}", op, path, e),
        }
        e.to_errno()
    }

    fn entry_reply(&self, path: &DocPath, record: &AttributeRecord, reply: ReplyEntry) {
        let ino = self.inodes.assign(path);
        reply.entry(&self.ttl, &self.to_fuser_attr(ino, record), 0);
    }
}

impl Filesystem for DocFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        info!("docmount filesystem mounted");
        Ok(())
    }

    fn destroy(&mut self) {
        info!("docmount filesystem unmounting, syncing dirty files");
        self.controller.shutdown();
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = match self.child_of(parent, name) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        trace!("lookup: {}", path);

        match self.controller.getattr(&path) {
            Ok(record) => self.entry_reply(&path, &record, reply),
            Err(e) => reply.error(Self::errno("lookup", &path, &e)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };

        match self.controller.getattr(&path) {
            Ok(record) => reply.attr(&self.ttl, &self.to_fuser_attr(ino, &record)),
            Err(e) => reply.error(Self::errno("getattr", &path, &e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        debug!("readdir: {} offset={}", path, offset);

        let names = match self.controller.readdir(&path) {
            Ok(names) => names,
            Err(e) => return reply.error(Self::errno("readdir", &path, &e)),
        };

        for (i, name) in names.iter().enumerate().skip(offset.max(0) as usize) {
            let (child_ino, kind) = match name.as_str() {
                "." => (ino, FuserFileType::Directory),
                ".." => (self.inodes.assign(&path.parent()), FuserFileType::Directory),
                _ => {
                    let child = match path.join(name) {
                        Ok(c) => c,
                        Err(e) => {
                            warn!("readdir: skipping {:?} in {}: {}", name, path, e);
                            continue;
                        }
                    };
                    let kind = self
                        .controller
                        .getattr(&child)
                        .map(|r| Self::to_fuser_kind(r.kind))
                        .unwrap_or(FuserFileType::RegularFile);
                    (self.inodes.assign(&child), kind)
                }
            };
            if reply.add(child_ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        trace!("opendir: ino={}", ino);
        reply.opened(0, 0);
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        trace!("releasedir: ino={}", ino);
        reply.ok();
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let path = match self.child_of(parent, name) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        debug!("mknod: {} mode={:o}", path, mode);

        // Only regular files
        #[allow(clippy::unnecessary_cast)]
        let file_type = mode & libc::S_IFMT as u32;
        #[allow(clippy::unnecessary_cast)]
        if file_type != libc::S_IFREG as u32 && file_type != 0 {
            warn!("mknod: unsupported file type {:o}", file_type);
            return reply.error(libc::ENOTSUP);
        }

        match self.controller.mknod(&path, &NewFile::default()) {
            Ok(record) => self.entry_reply(&path, &record, reply),
            Err(e) => reply.error(Self::errno("mknod", &path, &e)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let path = match self.child_of(parent, name) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        debug!("create: {} mode={:o}", path, mode);

        let created = self
            .controller
            .mknod(&path, &NewFile::default())
            .and_then(|record| self.controller.open(&path, flags).map(|fh| (record, fh)));
        match created {
            Ok((record, fh)) => {
                let ino = self.inodes.assign(&path);
                reply.created(&self.ttl, &self.to_fuser_attr(ino, &record), 0, fh, 0);
            }
            Err(e) => reply.error(Self::errno("create", &path, &e)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        trace!("open: {} flags={:#x}", path, flags);

        match self.controller.open(&path, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(Self::errno("open", &path, &e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        trace!("read: {} offset={} size={}", path, offset, size);

        match self
            .controller
            .read(&path, Some(fh), offset.max(0) as u64, size as usize)
        {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(Self::errno("read", &path, &e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        trace!("write: {} offset={} size={}", path, offset, data.len());

        match self
            .controller
            .write(&path, Some(fh), data, offset.max(0) as u64)
        {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(Self::errno("write", &path, &e)),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        debug!("flush: {}", path);

        match self.controller.flush(&path, fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Self::errno("flush", &path, &e)),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        debug!("fsync: {}", path);

        match self.controller.flush(&path, fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Self::errno("fsync", &path, &e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        trace!("release: {} fh={}", path, fh);

        match self.controller.release(&path, fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Self::errno("release", &path, &e)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_of(parent, name) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        debug!("unlink: {}", path);

        match self.controller.unlink(&path) {
            Ok(()) => {
                self.inodes.forget(&path);
                reply.ok();
            }
            Err(e) => reply.error(Self::errno("unlink", &path, &e)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = match self.child_of(parent, name) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        debug!("mkdir: {} mode={:o}", path, mode);

        match self.controller.mkdir(&path) {
            Ok(record) => self.entry_reply(&path, &record, reply),
            Err(e) => reply.error(Self::errno("mkdir", &path, &e)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_of(parent, name) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        debug!("rmdir: {}", path);

        match self.controller.rmdir(&path) {
            Ok(()) => {
                self.inodes.forget(&path);
                reply.ok();
            }
            Err(e) => reply.error(Self::errno("rmdir", &path, &e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (from, to) = match (self.child_of(parent, name), self.child_of(newparent, newname)) {
            (Ok(from), Ok(to)) => (from, to),
            (Err(errno), _) | (_, Err(errno)) => return reply.error(errno),
        };
        debug!("rename: {} -> {}", from, to);

        match self.controller.rename(&from, &to) {
            Ok(()) => {
                self.inodes.rename(&from, &to);
                reply.ok();
            }
            Err(e) => reply.error(Self::errno("rename", &from, &e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        debug!("setattr: {} mode={:?} size={:?}", path, mode, size);

        if let Some(size) = size {
            if let Err(e) = self.controller.truncate(&path, size) {
                return reply.error(Self::errno("truncate", &path, &e));
            }
        }
        match self.controller.getattr(&path) {
            Ok(record) => reply.attr(&self.ttl, &self.to_fuser_attr(ino, &record)),
            Err(e) => reply.error(Self::errno("setattr", &path, &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::HostMirror;
    use docmount_core::{Config, MemoryStore};
    use tempfile::TempDir;

    fn docfs() -> (TempDir, DocFs) {
        let temp = TempDir::new().unwrap();
        let mirror = HostMirror::new(temp.path()).unwrap();
        let controller = SyncController::new(Arc::new(MemoryStore::new()), mirror, &Config::default());
        (temp, DocFs::new(Arc::new(controller), Duration::from_secs(1)))
    }

    #[test]
    fn test_attr_conversion() {
        let (_temp, fs) = docfs();
        let record = AttributeRecord::file(1024, &NewFile::default());
        let attr = fs.to_fuser_attr(42, &record);

        assert_eq!(attr.ino, 42);
        assert_eq!(attr.size, 1024);
        assert_eq!(attr.blocks, 2);
        assert_eq!(attr.perm, 0o744);
        assert!(matches!(attr.kind, FuserFileType::RegularFile));
    }

    #[test]
    fn test_dir_attr_conversion() {
        let (_temp, fs) = docfs();
        let attr = fs.to_fuser_attr(ROOT_INODE, &AttributeRecord::directory());

        assert_eq!(attr.ino, 1);
        assert_eq!(attr.nlink, 2);
        assert!(matches!(attr.kind, FuserFileType::Directory));
    }

    #[test]
    fn test_child_resolution() {
        let (_temp, fs) = docfs();
        assert_eq!(
            fs.child_of(ROOT_INODE, OsStr::new("a.doc")).unwrap(),
            DocPath::parse("/a.doc").unwrap()
        );
        assert_eq!(fs.child_of(999, OsStr::new("a.doc")), Err(libc::ENOENT));
        assert_eq!(fs.path_of(ROOT_INODE).unwrap(), DocPath::root());
    }
}
