//! Local-directory remote store
//!
//! Serves an ordinary host directory through the [`RemoteStore`] seam so a
//! mount can run without a network adapter. Document titles are file stems,
//! kinds come from extensions, and timestamps come from file metadata.
//! Hidden host entries are not listed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use docmount_core::path::safe_path;
use docmount_core::remote::split_parent;
use docmount_core::{
    DocumentKind, RemoteEntry, RemoteError, RemoteStore, TypeFilter, PRIVATE_MARKER,
};

/// Remote store backed by a host directory
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
}

fn io_error(path: &str, e: io::Error) -> RemoteError {
    match e.kind() {
        io::ErrorKind::NotFound => RemoteError::NotFound(path.to_string()),
        io::ErrorKind::AlreadyExists => RemoteError::AlreadyExists(path.to_string()),
        _ => RemoteError::Transport(format!("{}: {}", path, e)),
    }
}

fn timestamp(t: io::Result<SystemTime>) -> Option<String> {
    t.ok().map(|t| {
        DateTime::<Utc>::from(t)
            .format("%Y-%m-%dT%H:%M:%S%.3fZ")
            .to_string()
    })
}

impl LocalDirStore {
    /// Serve `root`, which must be an existing directory
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, RemoteError> {
        let root = root.into();
        let meta = fs::metadata(&root).map_err(|e| io_error(&root.to_string_lossy(), e))?;
        if !meta.is_dir() {
            return Err(RemoteError::Rejected(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        debug!("Local directory store at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, RemoteError> {
        safe_path(&self.root, path.trim_start_matches('/'))
            .map_err(|e| RemoteError::Rejected(e.to_string()))
    }

    fn require_folder(&self, path: &str) -> Result<PathBuf, RemoteError> {
        let host = self.resolve(path)?;
        if host.is_dir() {
            Ok(host)
        } else {
            Err(RemoteError::NotFound(path.to_string()))
        }
    }

    fn entry_for(name: &str, meta: &fs::Metadata) -> RemoteEntry {
        let (title, kind) = if meta.is_dir() {
            (name.to_string(), DocumentKind::Folder)
        } else {
            DocumentKind::split_file_name(name)
        };
        let updated = timestamp(meta.modified()).unwrap_or_default();
        let published = timestamp(meta.created()).unwrap_or_else(|| updated.clone());
        RemoteEntry {
            size: (!meta.is_dir()).then(|| meta.len()),
            title,
            kind,
            updated,
            published,
            last_viewed: timestamp(meta.accessed()),
            labels: Default::default(),
        }
    }
}

impl RemoteStore for LocalDirStore {
    fn fetch_listing(
        &self,
        folder: &str,
        filter: TypeFilter,
    ) -> Result<Vec<RemoteEntry>, RemoteError> {
        let host = self.require_folder(folder)?;
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&host).map_err(|e| io_error(folder, e))? {
            let dirent = dirent.map_err(|e| io_error(folder, e))?;
            let name = dirent.file_name().to_string_lossy().into_owned();
            if name.starts_with(PRIVATE_MARKER) {
                continue;
            }
            let meta = dirent.metadata().map_err(|e| io_error(folder, e))?;
            let entry = Self::entry_for(&name, &meta);
            if filter.matches(&entry.kind) {
                entries.push(entry);
            }
        }
        trace!("listed {}: {} entries", folder, entries.len());
        Ok(entries)
    }

    fn fetch_content(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        let host = self.resolve(path)?;
        if host.is_dir() {
            return Err(RemoteError::Rejected(format!("{} is a folder", path)));
        }
        fs::read(&host).map_err(|e| io_error(path, e))
    }

    fn create_folder(&self, path: &str) -> Result<(), RemoteError> {
        let (parent, _) = split_parent(path);
        self.require_folder(parent)?;
        let host = self.resolve(path)?;
        fs::create_dir(&host).map_err(|e| io_error(path, e))
    }

    fn delete_entry(&self, path: &str, is_folder: bool) -> Result<(), RemoteError> {
        let host = self.resolve(path)?;
        let meta = fs::metadata(&host).map_err(|e| io_error(path, e))?;
        if meta.is_dir() != is_folder {
            return Err(RemoteError::Rejected(format!("{} has a different kind", path)));
        }
        if is_folder {
            fs::remove_dir_all(&host)
        } else {
            fs::remove_file(&host)
        }
        .map_err(|e| io_error(path, e))?;
        debug!("deleted {}", path);
        Ok(())
    }

    fn move_entry(&self, from: &str, to: &str) -> Result<(), RemoteError> {
        let src = self.resolve(from)?;
        if !src.exists() {
            return Err(RemoteError::NotFound(from.to_string()));
        }
        let dst = self.resolve(to)?;
        if dst.exists() {
            return Err(RemoteError::AlreadyExists(to.to_string()));
        }
        self.require_folder(split_parent(to).0)?;
        fs::rename(&src, &dst).map_err(|e| io_error(from, e))?;
        debug!("moved {} -> {}", from, to);
        Ok(())
    }

    fn create_or_update_content(&self, path: &str, content: &[u8]) -> Result<(), RemoteError> {
        self.require_folder(split_parent(path).0)?;
        let host = self.resolve(path)?;
        if host.is_dir() {
            return Err(RemoteError::Rejected(format!("{} is a folder", path)));
        }
        fs::write(&host, content).map_err(|e| io_error(path, e))?;
        trace!("stored {} ({} bytes)", path, content.len());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "local-dir"
    }
}
