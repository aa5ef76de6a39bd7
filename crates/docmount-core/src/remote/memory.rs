//! In-memory remote store
//!
//! Keeps the whole remote tree in a map keyed by path. Counts calls per
//! operation and can be switched offline so callers can observe how often
//! the remote is consulted and how they behave when it fails.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::trace;

use super::{split_parent, RemoteEntry, RemoteError, RemoteStore, TypeFilter};
use crate::types::{format_remote_timestamp, now_secs, DocumentKind};

#[derive(Clone, Debug)]
struct Node {
    kind: DocumentKind,
    title: String,
    content: Vec<u8>,
    labels: BTreeSet<String>,
    updated: i64,
    published: i64,
    last_viewed: Option<i64>,
}

impl Node {
    fn folder(name: &str, now: i64) -> Self {
        Self {
            kind: DocumentKind::Folder,
            title: name.to_string(),
            content: Vec::new(),
            labels: BTreeSet::new(),
            updated: now,
            published: now,
            last_viewed: None,
        }
    }

    fn document(name: &str, content: Vec<u8>, now: i64) -> Self {
        let (title, kind) = DocumentKind::split_file_name(name);
        Self {
            kind,
            title,
            content,
            labels: BTreeSet::new(),
            updated: now,
            published: now,
            last_viewed: None,
        }
    }

    fn to_entry(&self) -> RemoteEntry {
        RemoteEntry {
            title: self.title.clone(),
            kind: self.kind.clone(),
            updated: format_remote_timestamp(self.updated),
            published: format_remote_timestamp(self.published),
            last_viewed: self.last_viewed.map(format_remote_timestamp),
            labels: self.labels.clone(),
            size: if self.kind.is_folder() {
                None
            } else {
                Some(self.content.len() as u64)
            },
        }
    }
}

/// Per-operation call counts
#[derive(Debug, Default)]
pub struct CallCounts {
    pub listings: AtomicU64,
    pub fetches: AtomicU64,
    pub uploads: AtomicU64,
    pub moves: AtomicU64,
    pub deletes: AtomicU64,
    pub folders: AtomicU64,
}

/// Remote store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    nodes: RwLock<BTreeMap<String, Node>>,
    offline: AtomicBool,
    calls: CallCounts,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a folder (parents are created as needed)
    pub fn add_folder(&self, path: &str) {
        let now = now_secs();
        let mut nodes = self.nodes.write();
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            nodes
                .entry(current.clone())
                .or_insert_with(|| Node::folder(part, now));
        }
    }

    /// Seed a document with content, labels and a modification time
    pub fn add_document(&self, path: &str, content: &[u8], labels: &[&str], updated: i64) {
        let (parent, name) = split_parent(path);
        if parent != "/" {
            self.add_folder(parent);
        }
        let mut node = Node::document(name, content.to_vec(), updated);
        node.labels = labels.iter().map(|l| l.to_string()).collect();
        self.nodes.write().insert(path.to_string(), node);
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.nodes
            .read()
            .get(path)
            .filter(|n| !n.kind.is_folder())
            .map(|n| n.content.clone())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.read().contains_key(path)
    }

    /// Simulate a lost connection: every call fails with a transport error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> &CallCounts {
        &self.calls
    }

    pub fn listing_calls(&self) -> u64 {
        self.calls.listings.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> u64 {
        self.calls.fetches.load(Ordering::SeqCst)
    }

    pub fn upload_calls(&self) -> u64 {
        self.calls.uploads.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RemoteError::Transport("store offline".into()))
        } else {
            Ok(())
        }
    }

    fn is_folder(nodes: &BTreeMap<String, Node>, path: &str) -> bool {
        path == "/" || nodes.get(path).map(|n| n.kind.is_folder()).unwrap_or(false)
    }
}

fn is_below(path: &str, folder: &str) -> bool {
    path.len() > folder.len() && path.starts_with(folder) && path.as_bytes()[folder.len()] == b'/'
}

impl RemoteStore for MemoryStore {
    fn fetch_listing(
        &self,
        folder: &str,
        filter: TypeFilter,
    ) -> Result<Vec<RemoteEntry>, RemoteError> {
        self.calls.listings.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        trace!("memory store listing {}", folder);

        let nodes = self.nodes.read();
        if !Self::is_folder(&nodes, folder) {
            return Err(RemoteError::NotFound(folder.to_string()));
        }
        Ok(nodes
            .iter()
            .filter(|(path, _)| split_parent(path).0 == folder)
            .filter(|(_, node)| filter.matches(&node.kind))
            .map(|(_, node)| node.to_entry())
            .collect())
    }

    fn fetch_content(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        self.calls.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let nodes = self.nodes.read();
        match nodes.get(path) {
            Some(node) if node.kind.is_folder() => {
                Err(RemoteError::Rejected(format!("{} is a folder", path)))
            }
            Some(node) => Ok(node.content.clone()),
            None => Err(RemoteError::NotFound(path.to_string())),
        }
    }

    fn create_folder(&self, path: &str) -> Result<(), RemoteError> {
        self.calls.folders.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let mut nodes = self.nodes.write();
        if nodes.contains_key(path) {
            return Err(RemoteError::AlreadyExists(path.to_string()));
        }
        let (parent, name) = split_parent(path);
        if !Self::is_folder(&nodes, parent) {
            return Err(RemoteError::NotFound(parent.to_string()));
        }
        nodes.insert(path.to_string(), Node::folder(name, now_secs()));
        Ok(())
    }

    fn delete_entry(&self, path: &str, is_folder: bool) -> Result<(), RemoteError> {
        self.calls.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let mut nodes = self.nodes.write();
        match nodes.get(path) {
            None => return Err(RemoteError::NotFound(path.to_string())),
            Some(node) if node.kind.is_folder() != is_folder => {
                return Err(RemoteError::Rejected(format!("{} has a different kind", path)))
            }
            Some(_) => {}
        }
        nodes.remove(path);
        if is_folder {
            nodes.retain(|p, _| !is_below(p, path));
        }
        Ok(())
    }

    fn move_entry(&self, from: &str, to: &str) -> Result<(), RemoteError> {
        self.calls.moves.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let mut nodes = self.nodes.write();
        if !nodes.contains_key(from) {
            return Err(RemoteError::NotFound(from.to_string()));
        }
        if nodes.contains_key(to) {
            return Err(RemoteError::AlreadyExists(to.to_string()));
        }
        let (to_parent, to_name) = split_parent(to);
        if !Self::is_folder(&nodes, to_parent) {
            return Err(RemoteError::NotFound(to_parent.to_string()));
        }

        let moved: Vec<String> = nodes
            .keys()
            .filter(|p| p.as_str() == from || is_below(p, from))
            .cloned()
            .collect();
        for old in moved {
            if let Some(mut node) = nodes.remove(&old) {
                if old == from {
                    if node.kind.is_folder() {
                        node.title = to_name.to_string();
                    } else {
                        node.title = DocumentKind::split_file_name(to_name).0;
                    }
                }
                let new_path = format!("{}{}", to, &old[from.len()..]);
                nodes.insert(new_path, node);
            }
        }
        Ok(())
    }

    fn create_or_update_content(&self, path: &str, content: &[u8]) -> Result<(), RemoteError> {
        self.calls.uploads.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let now = now_secs();
        let mut nodes = self.nodes.write();
        let (parent, name) = split_parent(path);
        if !Self::is_folder(&nodes, parent) {
            return Err(RemoteError::NotFound(parent.to_string()));
        }
        match nodes.get_mut(path) {
            Some(node) if node.kind.is_folder() => {
                return Err(RemoteError::Rejected(format!("{} is a folder", path)))
            }
            Some(node) => {
                node.content = content.to_vec();
                node.updated = now;
            }
            None => {
                nodes.insert(path.to_string(), Node::document(name, content.to_vec(), now));
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
