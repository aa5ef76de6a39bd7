//! Directory tree cache
//!
//! Maps each known directory to the set of its remote-class child basenames.
//! Every listing is a full refetch from the remote store; the cached sets
//! exist so mutations can be reflected immediately without a round trip.
//! Private children are never stored here; they are discovered by scanning
//! the host mirror.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use tracing::{debug, trace};

use docmount_core::{DocPath, EntryKind, FsError, RemoteStore, TypeFilter};

use crate::metadata::MetadataStore;
use crate::mirror::HostMirror;

/// Directory path -> child basenames
pub struct DirectoryTree {
    children: RwLock<HashMap<DocPath, BTreeSet<String>>>,
    reserved_folder: String,
}

impl DirectoryTree {
    /// Create a tree holding only the (empty) root
    pub fn new(reserved_folder: impl Into<String>) -> Self {
        let mut children = HashMap::new();
        children.insert(DocPath::root(), BTreeSet::new());
        Self {
            children: RwLock::new(children),
            reserved_folder: reserved_folder.into(),
        }
    }

    /// Cached children of a directory, if it is known
    pub fn children(&self, dir: &DocPath) -> Option<BTreeSet<String>> {
        self.children.read().get(dir).cloned()
    }

    pub fn is_known_dir(&self, dir: &DocPath) -> bool {
        self.children.read().contains_key(dir)
    }

    /// Refetch the remote children of `dir` and replace its child set
    ///
    /// Every child is materialized into `metadata`; records of children that
    /// vanished remotely are dropped unless listed in `keep`. Folder children
    /// get an empty child set of their own when none exists yet.
    pub fn refresh(
        &self,
        dir: &DocPath,
        remote: &dyn RemoteStore,
        metadata: &MetadataStore,
        keep: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, FsError> {
        let mut entries = remote.fetch_listing(dir.as_str(), TypeFilter::All)?;
        if dir.is_root() {
            entries.retain(|e| !(e.kind.is_folder() && e.title == self.reserved_folder));
        }
        let materialized = metadata.materialize(dir, &entries);

        let mut names: BTreeSet<String> = BTreeSet::new();
        let mut children = self.children.write();
        for (path, kind) in &materialized {
            names.insert(path.file_name().to_string());
            if *kind == EntryKind::Directory {
                children.entry(path.clone()).or_default();
            }
        }
        for name in keep {
            names.insert(name.clone());
        }

        let vanished: Vec<DocPath> = children
            .get(dir)
            .map(|previous| {
                previous
                    .difference(&names)
                    .filter_map(|stale| dir.join(stale).ok())
                    .collect()
            })
            .unwrap_or_default();
        for path in vanished {
            trace!("dropping vanished entry {}", path);
            metadata.remove(&path);
            metadata.remove_descendants(&path);
            children.retain(|known, _| *known != path && !known.is_descendant_of(&path));
        }
        children.insert(dir.clone(), names.clone());
        debug!("refreshed {}: {} remote children", dir, names.len());
        Ok(names)
    }

    /// Full directory listing: `.`, `..`, remote children, then private entries
    ///
    /// A private directory lists its mirror contents only.
    pub fn list(
        &self,
        dir: &DocPath,
        remote: &dyn RemoteStore,
        metadata: &MetadataStore,
        mirror: &HostMirror,
        keep: &BTreeSet<String>,
    ) -> Result<Vec<String>, FsError> {
        let mut listing = vec![".".to_string(), "..".to_string()];
        if !dir.is_private() {
            listing.extend(self.refresh(dir, remote, metadata, keep)?);
        }
        listing.extend(mirror.scan_private(dir)?);
        Ok(listing)
    }

    /// Record a newly created child
    pub fn mutate_on_create(&self, parent: &DocPath, name: &str, kind: EntryKind) {
        let mut children = self.children.write();
        children
            .entry(parent.clone())
            .or_default()
            .insert(name.to_string());
        if kind == EntryKind::Directory {
            if let Ok(path) = parent.join(name) {
                children.entry(path).or_default();
            }
        }
    }

    /// Forget a removed child (and, for directories, everything below it)
    pub fn mutate_on_remove(&self, parent: &DocPath, name: &str) {
        let mut children = self.children.write();
        if let Some(set) = children.get_mut(parent) {
            set.remove(name);
        }
        if let Ok(path) = parent.join(name) {
            children.retain(|dir, _| *dir != path && !dir.is_descendant_of(&path));
        }
    }

    /// Rewrite the keys of a renamed directory and all of its descendants
    pub fn rename_dir(&self, from: &DocPath, to: &DocPath) {
        let mut children = self.children.write();
        let moved: Vec<DocPath> = children
            .keys()
            .filter(|dir| *dir == from || dir.is_descendant_of(from))
            .cloned()
            .collect();
        for old in moved {
            if let (Some(set), Some(new)) = (children.remove(&old), old.rebase(from, to)) {
                children.insert(new, set);
            }
        }
    }
}
