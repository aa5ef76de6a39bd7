//! Metadata store
//!
//! Maps every known mount path to its [`AttributeRecord`]. Lookups go
//! through to the remote store: a miss on a remote-class path fetches the
//! parent folder listing and materializes every entry in it.
//!
//! The store also maintains two secondary indices, updated on every insert
//! and removal, that back label and time-window queries:
//!
//! ```text
//! labels: "work" -> {/a.doc, /b/c.xls}
//! times:  1236169845 -> {/a.doc}      (ordered by mtime)
//! ```
//!
//! Private paths are never stored here; their attributes come from the
//! host mirror on every call.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use docmount_core::{
    parse_remote_timestamp, AttributeRecord, DocPath, EntryKind, FsError, NewFile, RemoteEntry,
    RemoteStore, TimeRange, TypeFilter,
};

use crate::mirror::HostMirror;

#[derive(Default)]
struct Indexed {
    records: HashMap<DocPath, AttributeRecord>,
    labels: HashMap<String, HashSet<DocPath>>,
    times: BTreeMap<i64, HashSet<DocPath>>,
}

impl Indexed {
    fn index(&mut self, path: &DocPath, record: &AttributeRecord) {
        for label in &record.labels {
            self.labels
                .entry(label.clone())
                .or_default()
                .insert(path.clone());
        }
        self.times
            .entry(record.mtime)
            .or_default()
            .insert(path.clone());
    }

    fn unindex(&mut self, path: &DocPath, record: &AttributeRecord) {
        for label in &record.labels {
            if let Some(paths) = self.labels.get_mut(label) {
                paths.remove(path);
                if paths.is_empty() {
                    self.labels.remove(label);
                }
            }
        }
        if let Some(paths) = self.times.get_mut(&record.mtime) {
            paths.remove(path);
            if paths.is_empty() {
                self.times.remove(&record.mtime);
            }
        }
    }

    fn insert(&mut self, path: DocPath, record: AttributeRecord) -> Option<AttributeRecord> {
        let old = self.records.remove(&path);
        if let Some(old) = &old {
            self.unindex(&path, old);
        }
        self.index(&path, &record);
        self.records.insert(path, record);
        old
    }

    fn remove(&mut self, path: &DocPath) -> Option<AttributeRecord> {
        let old = self.records.remove(path)?;
        self.unindex(path, &old);
        Some(old)
    }
}

/// Path-keyed attribute cache with label and time indices
pub struct MetadataStore {
    inner: RwLock<Indexed>,
}

impl MetadataStore {
    /// Create a store holding only the root directory
    pub fn new() -> Self {
        let mut inner = Indexed::default();
        inner.insert(DocPath::root(), AttributeRecord::directory());
        Self {
            inner: RwLock::new(inner),
        }
    }

    pub fn get(&self, path: &DocPath) -> Option<AttributeRecord> {
        self.inner.read().records.get(path).cloned()
    }

    pub fn contains(&self, path: &DocPath) -> bool {
        self.inner.read().records.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace a record, returning the previous one
    ///
    /// Private paths are ignored.
    pub fn insert(&self, path: DocPath, record: AttributeRecord) -> Option<AttributeRecord> {
        if path.is_private() {
            trace!("not caching private path {}", path);
            return None;
        }
        self.inner.write().insert(path, record)
    }

    /// Remove a record; the root is never removed
    pub fn remove(&self, path: &DocPath) -> Option<AttributeRecord> {
        if path.is_root() {
            return None;
        }
        self.inner.write().remove(path)
    }

    /// Mutate a cached record in place, keeping the indices current
    pub fn update<F>(&self, path: &DocPath, f: F) -> Option<AttributeRecord>
    where
        F: FnOnce(&mut AttributeRecord),
    {
        let mut inner = self.inner.write();
        let mut record = inner.records.get(path)?.clone();
        f(&mut record);
        inner.insert(path.clone(), record.clone());
        Some(record)
    }

    /// Move the record at `from` (and every record below it) under `to`
    pub fn transplant(&self, from: &DocPath, to: &DocPath) -> usize {
        let mut inner = self.inner.write();
        let moved: Vec<DocPath> = inner
            .records
            .keys()
            .filter(|p| *p == from || p.is_descendant_of(from))
            .cloned()
            .collect();
        let mut count = 0;
        for old in moved {
            let Some(new) = old.rebase(from, to) else {
                continue;
            };
            if let Some(record) = inner.remove(&old) {
                inner.insert(new, record);
                count += 1;
            }
        }
        count
    }

    /// Drop every record strictly below `dir`
    pub fn remove_descendants(&self, dir: &DocPath) -> usize {
        let mut inner = self.inner.write();
        let doomed: Vec<DocPath> = inner
            .records
            .keys()
            .filter(|p| p.is_descendant_of(dir))
            .cloned()
            .collect();
        for path in &doomed {
            inner.remove(path);
        }
        doomed.len()
    }

    /// Materialize records for every entry of a folder listing
    ///
    /// Returns the child paths in listing order. Entries whose names are not
    /// valid basenames are skipped.
    pub fn materialize(&self, folder: &DocPath, entries: &[RemoteEntry]) -> Vec<(DocPath, EntryKind)> {
        let mut children = Vec::with_capacity(entries.len());
        let mut inner = self.inner.write();
        for entry in entries {
            let name = entry.file_name();
            let path = match folder.join(&name) {
                Ok(path) => path,
                Err(e) => {
                    warn!("Skipping remote entry {:?} in {}: {}", name, folder, e);
                    continue;
                }
            };
            if path.is_private() {
                // Remote titles starting with the marker would shadow private files
                trace!("skipping remote entry with private name {}", path);
                continue;
            }
            let record = record_from_entry(&path, entry, inner.records.get(&path));
            let kind = record.kind;
            inner.insert(path.clone(), record);
            children.push((path, kind));
        }
        debug!("materialized {} records under {}", children.len(), folder);
        children
    }

    /// Lookup-through attribute fetch
    ///
    /// Cached records are returned directly. Private paths are answered by a
    /// native stat of the mirror. Anything else triggers a listing of the
    /// parent folder before the cache is consulted again.
    pub fn get_attributes(
        &self,
        path: &DocPath,
        remote: &dyn RemoteStore,
        mirror: &HostMirror,
    ) -> Result<AttributeRecord, FsError> {
        if let Some(record) = self.get(path) {
            return Ok(record);
        }
        if path.is_private() {
            return mirror.stat(path);
        }

        let parent = path.parent();
        trace!("attribute miss for {}, listing {}", path, parent);
        let entries = remote.fetch_listing(parent.as_str(), TypeFilter::All)?;
        self.materialize(&parent, &entries);

        self.get(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    /// Every record holding all of `required` (every record if empty)
    pub fn with_labels(&self, required: &BTreeSet<String>) -> Vec<(DocPath, AttributeRecord)> {
        let inner = self.inner.read();
        if required.is_empty() {
            return inner
                .records
                .iter()
                .map(|(p, r)| (p.clone(), r.clone()))
                .collect();
        }

        let mut postings = Vec::with_capacity(required.len());
        for label in required {
            match inner.labels.get(label) {
                Some(paths) => postings.push(paths),
                None => return Vec::new(),
            }
        }
        postings.sort_by_key(|paths| paths.len());

        let (smallest, rest) = match postings.split_first() {
            Some(split) => split,
            None => return Vec::new(),
        };
        smallest
            .iter()
            .filter(|path| rest.iter().all(|paths| paths.contains(*path)))
            .filter_map(|path| inner.records.get(path).map(|r| (path.clone(), r.clone())))
            .collect()
    }

    /// Every record whose mtime lies in the inclusive window
    pub fn in_time_range(&self, range: TimeRange) -> Vec<(DocPath, AttributeRecord)> {
        if range.is_empty() {
            return Vec::new();
        }
        let inner = self.inner.read();
        inner
            .times
            .range(range.min..=range.max)
            .flat_map(|(_, paths)| paths.iter())
            .filter_map(|path| inner.records.get(path).map(|r| (path.clone(), r.clone())))
            .collect()
    }

    /// Snapshot of every record
    pub fn snapshot(&self) -> Vec<(DocPath, AttributeRecord)> {
        self.inner
            .read()
            .records
            .iter()
            .map(|(p, r)| (p.clone(), r.clone()))
            .collect()
    }
}

impl Default for MetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize a remote listing entry into an attribute record
///
/// Fields the remote store does not carry (service type, freshness, shelf
/// life) are kept from `cached`. Labels come from the entry unless it has
/// none. Entries without a size report the path-length placeholder.
pub fn record_from_entry(
    path: &DocPath,
    entry: &RemoteEntry,
    cached: Option<&AttributeRecord>,
) -> AttributeRecord {
    let kind = entry.kind.entry_kind();
    let mut record = match cached {
        Some(existing) if existing.kind == kind => existing.clone(),
        _ if kind == EntryKind::Directory => AttributeRecord::directory(),
        _ => AttributeRecord::file(0, &NewFile::default()),
    };

    if kind == EntryKind::File {
        record.size = entry
            .size
            .unwrap_or_else(|| AttributeRecord::placeholder_size(path.as_str()));
    }
    if !entry.labels.is_empty() {
        record.labels = entry.labels.clone();
    }

    let mtime = parse_remote_timestamp(&entry.updated).unwrap_or(record.mtime);
    let ctime = parse_remote_timestamp(&entry.published).unwrap_or(record.ctime);
    let atime = entry
        .last_viewed
        .as_deref()
        .and_then(parse_remote_timestamp);
    record.set_access_times(mtime, ctime, atime);
    record
}
