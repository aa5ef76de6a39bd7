//! Core type definitions for docmount
//!
//! These types are shared by the metadata store, the write-back cache and
//! the synchronization controller.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::DIR_SIZE;

/// Type of filesystem entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryKind {
    File = 0,
    Directory = 1,
}

/// Document type as reported by the remote store
///
/// File basenames carry an extension derived from this kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    Folder,
    Document,
    Spreadsheet,
    Presentation,
    /// Any other remote type, named by its own type string
    Other(String),
}

impl DocumentKind {
    /// Extension used for the local basename ("" for folders)
    pub fn extension(&self) -> &str {
        match self {
            DocumentKind::Folder => "",
            DocumentKind::Document => "doc",
            DocumentKind::Spreadsheet => "xls",
            DocumentKind::Presentation => "ppt",
            DocumentKind::Other(ext) => ext,
        }
    }

    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "doc" => DocumentKind::Document,
            "xls" => DocumentKind::Spreadsheet,
            "ppt" => DocumentKind::Presentation,
            other => DocumentKind::Other(other.to_string()),
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, DocumentKind::Folder)
    }

    pub fn entry_kind(&self) -> EntryKind {
        if self.is_folder() {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }

    /// Basename for a remote entry with this kind and title
    pub fn file_name(&self, title: &str) -> String {
        let ext = self.extension();
        if ext.is_empty() {
            title.to_string()
        } else {
            format!("{}.{}", title, ext)
        }
    }

    /// Split a local file basename back into (title, kind)
    pub fn split_file_name(name: &str) -> (String, DocumentKind) {
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
                (stem.to_string(), DocumentKind::from_extension(ext))
            }
            _ => (name.to_string(), DocumentKind::Other(String::new())),
        }
    }
}

/// Creation parameters for a new file (mknod)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewFile {
    pub labels: BTreeSet<String>,
    pub service_type: String,
    pub freshness: f64,
    pub shelf_life: u64,
}

impl NewFile {
    pub fn with_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

impl Default for NewFile {
    fn default() -> Self {
        Self {
            labels: BTreeSet::new(),
            service_type: "proc".to_string(),
            freshness: 0.1,
            shelf_life: 1,
        }
    }
}

/// Attribute record for one path (similar to struct stat, plus labels)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub kind: EntryKind,
    pub size: u64,
    pub perm: u16,
    pub nlink: u32,
    pub labels: BTreeSet<String>,
    pub service_type: String,
    /// Fraction of shelf life after which content counts as stale (0..1)
    pub freshness: f64,
    pub shelf_life: u64,
    pub mtime: i64,
    pub ctime: i64,
    pub atime: i64,
}

impl AttributeRecord {
    /// Default permissions for every entry (rwxr--r--)
    pub const MODE: u16 = 0o744;

    /// Create attributes for a directory
    pub fn directory() -> Self {
        let now = now_secs();
        let defaults = NewFile::default();
        Self {
            kind: EntryKind::Directory,
            size: DIR_SIZE,
            perm: Self::MODE,
            nlink: 2,
            labels: BTreeSet::new(),
            service_type: defaults.service_type,
            freshness: defaults.freshness,
            shelf_life: defaults.shelf_life,
            mtime: now,
            ctime: now,
            atime: now,
        }
    }

    /// Create attributes for a file
    pub fn file(size: u64, params: &NewFile) -> Self {
        let now = now_secs();
        Self {
            kind: EntryKind::File,
            size,
            perm: Self::MODE,
            nlink: 1,
            labels: params.labels.clone(),
            service_type: params.service_type.clone(),
            freshness: params.freshness,
            shelf_life: params.shelf_life,
            mtime: now,
            ctime: now,
            atime: now,
        }
    }

    /// Size reported for a file whose content has never been flushed
    pub fn placeholder_size(path: &str) -> u64 {
        path.len() as u64
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Apply remote timestamps; atime falls back to ctime when absent
    pub fn set_access_times(&mut self, mtime: i64, ctime: i64, atime: Option<i64>) {
        self.mtime = mtime;
        self.ctime = ctime;
        self.atime = match atime {
            Some(t) if t > 0 => t,
            _ => ctime,
        };
    }

    /// Conjunctive label match: holds every required label
    pub fn has_labels(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.labels)
    }
}

/// Per-path synchronization state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// Never looked up or listed
    Unknown,
    /// Record resident, no unsynced writes
    Cached,
    /// Written since the last successful upload
    Dirty,
    /// Upload in progress
    Uploading,
    /// Removed by unlink/rmdir
    Deleted,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::Unknown => "unknown",
            SyncState::Cached => "cached",
            SyncState::Dirty => "dirty",
            SyncState::Uploading => "uploading",
            SyncState::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Inclusive modification-time window in epoch seconds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeRange {
    pub min: i64,
    pub max: i64,
}

impl TimeRange {
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, t: i64) -> bool {
        self.min <= t && t <= self.max
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }
}

/// Current time as whole epoch seconds
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Parse a remote date/time string (`2009-03-04T12:30:45.000Z`) to epoch seconds
///
/// Fractional seconds and the zone suffix are dropped; no timezone adjustment
/// is applied.
pub fn parse_remote_timestamp(s: &str) -> Option<i64> {
    let head = s.get(..19)?;
    NaiveDateTime::parse_from_str(head, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/// Format epoch seconds the way the remote API reports them
pub fn format_remote_timestamp(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S.000Z").to_string())
        .unwrap_or_else(|| "1970-01-01T00:00:00.000Z".to_string())
}
