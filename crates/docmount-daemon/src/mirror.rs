//! Host mirror tree
//!
//! A side-by-side directory on the host filesystem that holds shadow files
//! for remote documents and the full content of filesystem-private paths.
//! Mount path `/a/b.doc` lives at `<root>/a/b.doc`.
//!
//! # Layout
//! ```text
//! ~/docmount-mirror/
//! ├── Projects/
//! │   ├── report.doc      # shadow of a remote document
//! │   └── .report.doc.swp # private, never uploaded
//! └── .Trash/             # private directory
//! ```

use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, trace};

use docmount_core::path::safe_path;
use docmount_core::{AttributeRecord, DocPath, EntryKind, FsError, NewFile, PRIVATE_MARKER};

/// Host-side mirror rooted at a configured directory
#[derive(Debug, Clone)]
pub struct HostMirror {
    root: PathBuf,
}

impl HostMirror {
    /// Open (creating if needed) a mirror rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, FsError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| FsError::local(&root, e))?;
        debug!("Host mirror at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path for a mount path
    pub fn resolve(&self, path: &DocPath) -> Result<PathBuf, FsError> {
        safe_path(&self.root, path.relative())
    }

    pub fn exists(&self, path: &DocPath) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    /// Create the directory for `path` (and its ancestors)
    pub fn ensure_dir(&self, path: &DocPath) -> Result<PathBuf, FsError> {
        let host = self.resolve(path)?;
        fs::create_dir_all(&host).map_err(|e| FsError::local(&host, e))?;
        Ok(host)
    }

    /// Host path for a file, with its parent directory created
    pub fn prepare_file(&self, path: &DocPath) -> Result<PathBuf, FsError> {
        self.ensure_dir(&path.parent())?;
        self.resolve(path)
    }

    /// Native stat of a mirror entry, as an attribute record
    pub fn stat(&self, path: &DocPath) -> Result<AttributeRecord, FsError> {
        let host = self.resolve(path)?;
        let meta = fs::metadata(&host).map_err(|e| FsError::local(&host, e))?;
        Ok(metadata_to_record(&meta))
    }

    /// Length of a mirror file, if it exists
    pub fn file_len(&self, path: &DocPath) -> Option<u64> {
        let host = self.resolve(path).ok()?;
        fs::metadata(host).ok().filter(|m| m.is_file()).map(|m| m.len())
    }

    /// Private entries of a directory (all entries if the directory itself is private)
    ///
    /// The mirror directory is created when missing.
    pub fn scan_private(&self, dir: &DocPath) -> Result<Vec<String>, FsError> {
        let host = self.ensure_dir(dir)?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&host).map_err(|e| FsError::local(&host, e))? {
            let entry = entry.map_err(|e| FsError::local(&host, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if dir.is_private() || name.starts_with(PRIVATE_MARKER) {
                names.push(name);
            }
        }
        names.sort();
        trace!("mirror scan {}: {} private entries", dir, names.len());
        Ok(names)
    }

    pub fn create_dir(&self, path: &DocPath) -> Result<(), FsError> {
        let host = self.resolve(path)?;
        match fs::create_dir(&host) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(FsError::AlreadyExists(path.to_string()))
            }
            Err(e) => Err(FsError::local(&host, e)),
        }
    }

    /// Remove a file; a missing file is not an error
    pub fn remove_file(&self, path: &DocPath) -> Result<bool, FsError> {
        let host = self.resolve(path)?;
        match fs::remove_file(&host) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FsError::local(&host, e)),
        }
    }

    /// Remove a directory and whatever shadow content is left in it
    pub fn remove_dir(&self, path: &DocPath) -> Result<(), FsError> {
        let host = self.resolve(path)?;
        match fs::remove_dir_all(&host) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FsError::local(&host, e)),
        }
    }

    /// Move a mirror entry; returns false when there was nothing to move
    pub fn rename(&self, from: &DocPath, to: &DocPath) -> Result<bool, FsError> {
        let src = self.resolve(from)?;
        if !src.exists() {
            return Ok(false);
        }
        let dst = self.prepare_file(to)?;
        fs::rename(&src, &dst).map_err(|e| FsError::local(&src, e))?;
        Ok(true)
    }
}

fn epoch_secs(t: std::io::Result<SystemTime>) -> i64 {
    t.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Convert host metadata to an attribute record
fn metadata_to_record(meta: &Metadata) -> AttributeRecord {
    let mut record = if meta.is_dir() {
        AttributeRecord::directory()
    } else {
        AttributeRecord::file(meta.len(), &NewFile::default())
    };
    let mtime = epoch_secs(meta.modified());
    // Birth time is not reported by every host filesystem
    let ctime = match epoch_secs(meta.created()) {
        0 => mtime,
        t => t,
    };
    record.set_access_times(mtime, ctime, Some(epoch_secs(meta.accessed())));
    record
}
