//! Inode <-> path table
//!
//! The kernel addresses entries by inode number while every docmount
//! operation is path based. Inodes are handed out on first sight of a path
//! and stay stable until the path is removed or renamed away.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::trace;

use docmount_core::DocPath;

/// Inode number of the mount root
pub const ROOT_INODE: u64 = 1;

/// Bidirectional inode table
pub struct InodeTable {
    by_ino: DashMap<u64, DocPath>,
    by_path: DashMap<DocPath, u64>,
    next: AtomicU64,
}

impl InodeTable {
    pub fn new() -> Self {
        let table = Self {
            by_ino: DashMap::new(),
            by_path: DashMap::new(),
            next: AtomicU64::new(ROOT_INODE + 1),
        };
        table.by_ino.insert(ROOT_INODE, DocPath::root());
        table.by_path.insert(DocPath::root(), ROOT_INODE);
        table
    }

    pub fn path(&self, ino: u64) -> Option<DocPath> {
        self.by_ino.get(&ino).map(|p| p.clone())
    }

    /// Inode for a path, assigning a fresh one on first sight
    pub fn assign(&self, path: &DocPath) -> u64 {
        if let Some(ino) = self.by_path.get(path) {
            return *ino;
        }
        let ino = *self
            .by_path
            .entry(path.clone())
            .or_insert_with(|| self.next.fetch_add(1, Ordering::SeqCst));
        self.by_ino.insert(ino, path.clone());
        trace!("inode {} -> {}", ino, path);
        ino
    }

    /// Drop a path and everything below it
    pub fn forget(&self, path: &DocPath) {
        if path.is_root() {
            return;
        }
        self.by_path.retain(|p, ino| {
            let doomed = p == path || p.is_descendant_of(path);
            if doomed {
                self.by_ino.remove(&*ino);
            }
            !doomed
        });
    }

    /// Re-point the inodes of `from` (and below) at their paths under `to`
    ///
    /// Any inode previously bound to a destination path is dropped.
    pub fn rename(&self, from: &DocPath, to: &DocPath) {
        self.forget(to);
        let moved: Vec<(DocPath, u64)> = self
            .by_path
            .iter()
            .filter(|e| e.key() == from || e.key().is_descendant_of(from))
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        for (old, ino) in moved {
            if let Some(new) = old.rebase(from, to) {
                self.by_path.remove(&old);
                self.by_path.insert(new.clone(), ino);
                self.by_ino.insert(ino, new);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_ino.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ino.is_empty()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> DocPath {
        DocPath::parse(s).unwrap()
    }

    #[test]
    fn test_root_is_one() {
        let table = InodeTable::new();
        assert_eq!(table.path(ROOT_INODE), Some(DocPath::root()));
        assert_eq!(table.assign(&DocPath::root()), ROOT_INODE);
    }

    #[test]
    fn test_assign_is_stable() {
        let table = InodeTable::new();
        let a = table.assign(&p("/a.doc"));
        let b = table.assign(&p("/b.doc"));
        assert_ne!(a, b);
        assert_eq!(table.assign(&p("/a.doc")), a);
        assert_eq!(table.path(b), Some(p("/b.doc")));
    }

    #[test]
    fn test_forget_subtree() {
        let table = InodeTable::new();
        let dir = table.assign(&p("/d"));
        let child = table.assign(&p("/d/x.doc"));
        let other = table.assign(&p("/dx.doc"));

        table.forget(&p("/d"));
        assert_eq!(table.path(dir), None);
        assert_eq!(table.path(child), None);
        assert_eq!(table.path(other), Some(p("/dx.doc")));

        table.forget(&DocPath::root());
        assert_eq!(table.path(ROOT_INODE), Some(DocPath::root()));
    }

    #[test]
    fn test_rename_keeps_inode_numbers() {
        let table = InodeTable::new();
        let dir = table.assign(&p("/a"));
        let child = table.assign(&p("/a/c.doc"));
        let stale = table.assign(&p("/z/a"));

        table.rename(&p("/a"), &p("/z/a"));
        assert_eq!(table.path(dir), Some(p("/z/a")));
        assert_eq!(table.path(child), Some(p("/z/a/c.doc")));
        assert_eq!(table.path(stale), None);
        assert_eq!(table.assign(&p("/z/a/c.doc")), child);
    }
}
