//! Per-path locks for mutating operations
//!
//! Mutations on the same path (write, truncate, unlink, rename, ...) are
//! serialized; mutations on different paths run concurrently. Locks are
//! exclusive and blocking, and released when the guard drops.

use std::collections::HashSet;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use docmount_core::DocPath;

/// Set of currently locked paths
#[derive(Default)]
pub struct PathLocks {
    held: Mutex<HashSet<DocPath>>,
    released: Condvar,
}

/// Holds one or more path locks until dropped
pub struct PathGuard<'a> {
    locks: &'a PathLocks,
    paths: Vec<DocPath>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock a single path, blocking while another operation holds it
    pub fn lock(&self, path: &DocPath) -> PathGuard<'_> {
        self.lock_all(std::slice::from_ref(path))
    }

    /// Lock several paths at once
    ///
    /// Paths are acquired together in sorted order, so two callers locking
    /// overlapping sets cannot deadlock. Duplicates are collapsed.
    pub fn lock_all(&self, paths: &[DocPath]) -> PathGuard<'_> {
        let mut wanted: Vec<DocPath> = paths.to_vec();
        wanted.sort();
        wanted.dedup();

        let mut held = self.held.lock();
        for path in &wanted {
            while held.contains(path) {
                trace!("waiting for lock on {}", path);
                self.released.wait(&mut held);
            }
            held.insert(path.clone());
        }
        PathGuard {
            locks: self,
            paths: wanted,
        }
    }

    pub fn is_locked(&self, path: &DocPath) -> bool {
        self.held.lock().contains(path)
    }
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock();
        for path in &self.paths {
            held.remove(path);
        }
        self.locks.released.notify_all();
    }
}
