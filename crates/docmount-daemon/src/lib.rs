//! Docmount Daemon - Filesystem over a remote document store
//!
//! This crate provides:
//! - The synchronization controller behind every filesystem operation
//! - Metadata and directory caches populated from remote listings
//! - A write-back shadow file cache with idle reaping
//! - Label and modification-time queries over cached records
//! - The FUSE adapter (Unix only) and a local-directory remote store
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              FUSE callbacks (DocFs, inode -> path)          │
//! └─────────────────────────────┬───────────────────────────────┘
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  SyncController                             │
//! │  per-path locks, state machine, remote orchestration        │
//! └──────┬──────────────┬──────────────┬──────────────┬─────────┘
//!        ▼              ▼              ▼              ▼
//!  MetadataStore  DirectoryTree   ShadowCache     QueryEngine
//!  (+ indices)    (child sets)    (HostMirror)    (over MS)
//!        └──────────────┴──────┬───────┘
//!                              ▼
//!                    dyn RemoteStore (blocking)
//! ```
//!
//! Remote calls are synchronous. The only async component is the
//! background [`Reaper`], which runs on a tokio runtime thread.

pub mod dir_tree;
#[cfg(unix)]
pub mod fuse;
pub mod inodes;
pub mod local_store;
pub mod metadata;
pub mod mirror;
pub mod path_locks;
pub mod positional;
pub mod query;
pub mod reaper;
pub mod shadow_cache;
pub mod sync_engine;

pub use dir_tree::DirectoryTree;
#[cfg(unix)]
pub use fuse::DocFs;
pub use inodes::{InodeTable, ROOT_INODE};
pub use local_store::LocalDirStore;
pub use metadata::MetadataStore;
pub use mirror::HostMirror;
pub use path_locks::{PathGuard, PathLocks};
pub use query::{QueryEngine, QueryResult};
pub use reaper::Reaper;
pub use shadow_cache::{OpenMode, Released, ShadowCache};
pub use sync_engine::SyncController;
