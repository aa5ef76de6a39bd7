//! Error types for docmount filesystem operations

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::remote::RemoteError;

/// Errors surfaced by filesystem operations
///
/// Every variant maps onto a negative errno at the dispatcher boundary via
/// [`FsError::to_errno`].
#[derive(Error, Debug)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("is a directory: {0}")]
    IsDirectory(String),

    #[error("not a directory: {0}")]
    NotDirectory(String),

    /// The remote store has no in-place rename
    #[error("cannot rename within the same folder: {from} -> {to}")]
    SameFolderRename { from: String, to: String },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("bad file handle: {0}")]
    BadHandle(u64),

    #[error("remote store failure: {0}")]
    Remote(RemoteError),

    #[error("local I/O failure on {path:?}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FsError {
    /// Translate a host filesystem error, keeping "not found" distinguishable
    pub fn local(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            FsError::NotFound(path.to_string_lossy().into_owned())
        } else {
            FsError::LocalIo { path, source }
        }
    }

    /// True for the file/directory type mismatch family
    pub fn is_wrong_type(&self) -> bool {
        matches!(self, FsError::IsDirectory(_) | FsError::NotDirectory(_))
    }

    /// Map to libc errno
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::NotEmpty(_) => libc::ENOTEMPTY,
            FsError::IsDirectory(_) => libc::EISDIR,
            FsError::NotDirectory(_) => libc::ENOTDIR,
            FsError::SameFolderRename { .. } => libc::EXDEV,
            FsError::InvalidPath(_) => libc::EINVAL,
            FsError::BadHandle(_) => libc::EBADF,
            FsError::Remote(_) => libc::EIO,
            FsError::LocalIo { .. } => libc::EIO,
        }
    }
}

impl From<RemoteError> for FsError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::NotFound(path) => FsError::NotFound(path),
            RemoteError::AlreadyExists(path) => FsError::AlreadyExists(path),
            other => FsError::Remote(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FsError::NotFound("/a".into()).to_errno(), libc::ENOENT);
        assert_eq!(FsError::NotEmpty("/a".into()).to_errno(), libc::ENOTEMPTY);
        assert_eq!(FsError::IsDirectory("/a".into()).to_errno(), libc::EISDIR);
        assert_eq!(
            FsError::SameFolderRename {
                from: "/a.doc".into(),
                to: "/b.doc".into()
            }
            .to_errno(),
            libc::EXDEV
        );
    }

    #[test]
    fn test_local_not_found_translated() {
        let err = FsError::local(
            "/tmp/mirror/x",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, FsError::NotFound(_)));

        let err = FsError::local(
            "/tmp/mirror/x",
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
        );
        assert!(matches!(err, FsError::LocalIo { .. }));
        assert_eq!(err.to_errno(), libc::EIO);
    }

    #[test]
    fn test_remote_not_found_becomes_not_found() {
        let err: FsError = RemoteError::NotFound("/x.doc".into()).into();
        assert!(matches!(err, FsError::NotFound(_)));

        let err: FsError = RemoteError::Transport("reset".into()).into();
        assert!(matches!(err, FsError::Remote(_)));
    }
}
