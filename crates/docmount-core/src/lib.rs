//! Docmount Core - Shared types, error taxonomy, configuration and the remote-store seam
//!
//! This crate contains the foundational types used across all docmount components.
//! It has no dependencies on FUSE or on any particular remote transport.

pub mod config;
pub mod error;
pub mod path;
pub mod remote;
pub mod types;

pub use config::{CacheConfig, Config, ConfigError, MountConfig, RemoteConfig};
pub use error::*;
pub use path::{DocPath, PathClass};
pub use remote::{MemoryStore, RemoteEntry, RemoteError, RemoteStore, TypeFilter};
pub use types::*;

/// Basename prefix marking a filesystem-private (never synchronized) path
pub const PRIVATE_MARKER: char = '.';

/// Folder name the remote API injects into the root listing
pub const DEFAULT_RESERVED_FOLDER: &str = "My folders";

/// Idle time after which an unused shadow file is reaped (5 minutes)
pub const DEFAULT_IDLE_TTL_SECS: u64 = 300;

/// Interval of the background reaper sweep
pub const DEFAULT_REAP_INTERVAL_SECS: u64 = 60;

/// Reported size of directory records
pub const DIR_SIZE: u64 = 4096;

/// Maximum path length in bytes
pub const MAX_PATH_LEN: usize = 4096;

/// Maximum filename length in bytes
pub const MAX_FILENAME_LEN: usize = 255;
