//! Remote document store seam
//!
//! The transport and authentication client live outside docmount. Anything
//! that can list folders, fetch and upload document bodies, and create,
//! delete and move entries implements [`RemoteStore`].
//!
//! Paths handed to a store are absolute mount paths; document basenames
//! carry the kind-derived extension (`/Projects/report.doc`).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::DocumentKind;

pub mod memory;

pub use memory::MemoryStore;

/// Remote adapter failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote entry not found: {0}")]
    NotFound(String),

    #[error("remote entry already exists: {0}")]
    AlreadyExists(String),

    #[error("remote store rejected request: {0}")]
    Rejected(String),

    #[error("remote transport failure: {0}")]
    Transport(String),
}

/// Entry kinds requested from a folder listing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TypeFilter {
    #[default]
    All,
    FoldersOnly,
    DocumentsOnly,
}

impl TypeFilter {
    pub fn matches(&self, kind: &DocumentKind) -> bool {
        match self {
            TypeFilter::All => true,
            TypeFilter::FoldersOnly => kind.is_folder(),
            TypeFilter::DocumentsOnly => !kind.is_folder(),
        }
    }
}

/// One child in a remote folder listing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub title: String,
    pub kind: DocumentKind,
    /// Last modification (`YYYY-MM-DDTHH:MM:SS[.fff][Z]`)
    pub updated: String,
    /// Creation/publication time, same format
    pub published: String,
    pub last_viewed: Option<String>,
    pub labels: BTreeSet<String>,
    /// Content length when the store reports one
    pub size: Option<u64>,
}

impl RemoteEntry {
    /// Local basename: the title plus the kind-derived extension
    pub fn file_name(&self) -> String {
        self.kind.file_name(&self.title)
    }
}

/// Blocking remote document store
///
/// Calls are synchronous and may block on the network. Implementations apply
/// their own timeouts; docmount neither retries nor cancels.
pub trait RemoteStore: Send + Sync {
    /// List the children of `folder` ("/" for the root)
    fn fetch_listing(&self, folder: &str, filter: TypeFilter)
        -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Download the full body of a document
    fn fetch_content(&self, path: &str) -> Result<Vec<u8>, RemoteError>;

    fn create_folder(&self, path: &str) -> Result<(), RemoteError>;

    fn delete_entry(&self, path: &str, is_folder: bool) -> Result<(), RemoteError>;

    /// Move an entry into another folder (possibly under a new name)
    fn move_entry(&self, from: &str, to: &str) -> Result<(), RemoteError>;

    /// Upload a document body, creating the document if it does not exist
    fn create_or_update_content(&self, path: &str, content: &[u8]) -> Result<(), RemoteError>;

    /// Name of this backend for logging
    fn name(&self) -> &'static str;
}

/// Split a store path into (parent folder, basename)
pub fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("/", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_filter() {
        assert!(TypeFilter::All.matches(&DocumentKind::Folder));
        assert!(TypeFilter::FoldersOnly.matches(&DocumentKind::Folder));
        assert!(!TypeFilter::FoldersOnly.matches(&DocumentKind::Document));
        assert!(TypeFilter::DocumentsOnly.matches(&DocumentKind::Spreadsheet));
    }

    #[test]
    fn test_split_parent() {
        assert_eq!(split_parent("/x.doc"), ("/", "x.doc"));
        assert_eq!(split_parent("/a/b/x.doc"), ("/a/b", "x.doc"));
    }

    #[test]
    fn test_entry_file_name() {
        let entry = RemoteEntry {
            title: "budget".into(),
            kind: DocumentKind::Spreadsheet,
            updated: "2009-03-04T12:30:45.000Z".into(),
            published: "2009-03-04T12:30:45.000Z".into(),
            last_viewed: None,
            labels: BTreeSet::new(),
            size: None,
        };
        assert_eq!(entry.file_name(), "budget.xls");
    }
}
