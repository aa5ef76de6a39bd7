//! Path classification and mirror path resolution
//!
//! Every filesystem path entering docmount is parsed once into a [`DocPath`],
//! which carries its [`PathClass`]. Operations branch on the class instead of
//! re-inspecting basenames at each call site.
//!
//! Mirror paths are resolved with [`safe_path`] so a request can never
//! escape the mirror directory.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::FsError;
use crate::{MAX_FILENAME_LEN, MAX_PATH_LEN, PRIVATE_MARKER};

/// Whether a path is synchronized with the remote store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathClass {
    /// Backed by the remote store, buffered through shadow files
    Remote,
    /// Lives only in the host mirror (some component starts with `.`)
    Private,
}

impl PathClass {
    fn of_component(name: &str) -> Self {
        if name.starts_with(PRIVATE_MARKER) {
            PathClass::Private
        } else {
            PathClass::Remote
        }
    }
}

/// Normalized absolute path inside the mount, with its class
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath {
    path: String,
    class: PathClass,
}

impl DocPath {
    pub fn root() -> Self {
        Self {
            path: "/".to_string(),
            class: PathClass::Remote,
        }
    }

    /// Parse and normalize an absolute mount path
    ///
    /// Empty and `.` components are dropped; `..` is rejected.
    pub fn parse(raw: &str) -> Result<Self, FsError> {
        if raw.contains('\0') {
            return Err(FsError::InvalidPath("path contains null byte".into()));
        }
        if raw.len() > MAX_PATH_LEN {
            return Err(FsError::InvalidPath(format!(
                "path too long: {} bytes (max {})",
                raw.len(),
                MAX_PATH_LEN
            )));
        }
        if !raw.starts_with('/') {
            return Err(FsError::InvalidPath(format!("not absolute: {}", raw)));
        }

        let mut class = PathClass::Remote;
        let mut components = Vec::new();
        for component in raw.split('/') {
            match component {
                "" | "." => continue,
                ".." => {
                    return Err(FsError::InvalidPath(format!(
                        "parent component not allowed: {}",
                        raw
                    )))
                }
                name => {
                    if name.len() > MAX_FILENAME_LEN {
                        return Err(FsError::InvalidPath(format!(
                            "filename too long: {} bytes (max {})",
                            name.len(),
                            MAX_FILENAME_LEN
                        )));
                    }
                    if PathClass::of_component(name) == PathClass::Private {
                        class = PathClass::Private;
                    }
                    components.push(name);
                }
            }
        }

        Ok(Self {
            path: format!("/{}", components.join("/")),
            class,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn class(&self) -> PathClass {
        self.class
    }

    pub fn is_private(&self) -> bool {
        self.class == PathClass::Private
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// Last component ("" for the root)
    pub fn file_name(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) => &self.path[idx + 1..],
            None => "",
        }
    }

    /// Containing folder (the root is its own parent)
    pub fn parent(&self) -> DocPath {
        match self.path.rfind('/') {
            Some(0) | None => DocPath::root(),
            Some(idx) => {
                // Prefix of an already validated path
                DocPath::parse(&self.path[..idx]).unwrap_or_else(|_| DocPath::root())
            }
        }
    }

    /// Child path for a single basename
    pub fn join(&self, name: &str) -> Result<DocPath, FsError> {
        validate_filename(name)?;
        if self.is_root() {
            DocPath::parse(&format!("/{}", name))
        } else {
            DocPath::parse(&format!("{}/{}", self.path, name))
        }
    }

    /// Path without the leading slash, for joining under a host directory
    pub fn relative(&self) -> &str {
        self.path.trim_start_matches('/')
    }

    /// True when `self` lies strictly below `dir`
    pub fn is_descendant_of(&self, dir: &DocPath) -> bool {
        if dir.is_root() {
            return !self.is_root();
        }
        self.path.len() > dir.path.len()
            && self.path.starts_with(&dir.path)
            && self.path.as_bytes()[dir.path.len()] == b'/'
    }

    /// Re-home a descendant of `from` under `to`
    pub fn rebase(&self, from: &DocPath, to: &DocPath) -> Option<DocPath> {
        if self == from {
            return Some(to.clone());
        }
        if !self.is_descendant_of(from) {
            return None;
        }
        let suffix = if from.is_root() {
            &self.path[..]
        } else {
            &self.path[from.path.len()..]
        };
        let joined = if to.is_root() {
            suffix.to_string()
        } else {
            format!("{}{}", to.path, suffix)
        };
        DocPath::parse(&joined).ok()
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl AsRef<str> for DocPath {
    fn as_ref(&self) -> &str {
        &self.path
    }
}

/// Validate and resolve a path safely within a base directory.
///
/// This function prevents path traversal by:
/// 1. Rejecting absolute paths in the relative component
/// 2. Rejecting paths with `..` components
/// 3. Rejecting paths with null bytes
/// 4. Ensuring the final path is within the base directory
///
/// Unlike canonicalize(), this works on non-existent paths by
/// manually resolving components without following symlinks.
pub fn safe_path(base: &Path, relative: &str) -> Result<PathBuf, FsError> {
    if relative.contains('\0') {
        return Err(FsError::InvalidPath("path contains null byte".into()));
    }

    if relative.len() > MAX_PATH_LEN {
        return Err(FsError::InvalidPath(format!(
            "path too long: {} bytes (max {})",
            relative.len(),
            MAX_PATH_LEN
        )));
    }

    let relative_path = Path::new(relative);

    if relative_path.is_absolute() {
        return Err(FsError::InvalidPath("absolute paths not allowed".into()));
    }

    let mut result = base.to_path_buf();

    for component in relative_path.components() {
        match component {
            Component::Normal(name) => {
                let name_str = name.to_string_lossy();
                if name_str.len() > MAX_FILENAME_LEN {
                    return Err(FsError::InvalidPath(format!(
                        "filename too long: {} bytes (max {})",
                        name_str.len(),
                        MAX_FILENAME_LEN
                    )));
                }
                result.push(name);
            }
            Component::ParentDir => {
                return Err(FsError::InvalidPath(
                    "parent directory (..) not allowed".into(),
                ));
            }
            Component::CurDir => {}
            Component::Prefix(_) | Component::RootDir => {
                return Err(FsError::InvalidPath("path prefixes not allowed".into()));
            }
        }
    }

    if !result.starts_with(base) {
        return Err(FsError::InvalidPath("path escapes base directory".into()));
    }

    Ok(result)
}

/// Validate a filename (single path component)
pub fn validate_filename(name: &str) -> Result<(), FsError> {
    if name.is_empty() {
        return Err(FsError::InvalidPath("empty filename".into()));
    }

    if name.contains('\0') {
        return Err(FsError::InvalidPath("filename contains null byte".into()));
    }

    if name.len() > MAX_FILENAME_LEN {
        return Err(FsError::InvalidPath(format!(
            "filename too long: {} bytes (max {})",
            name.len(),
            MAX_FILENAME_LEN
        )));
    }

    if name == "." || name == ".." {
        return Err(FsError::InvalidPath(
            "special directory names not allowed".into(),
        ));
    }

    if name.contains('/') || name.contains('\\') {
        return Err(FsError::InvalidPath(
            "filename contains path separator".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> DocPath {
        DocPath::parse(s).unwrap()
    }

    #[test]
    fn test_parse_normalizes() {
        assert_eq!(p("/").as_str(), "/");
        assert_eq!(p("//a//b/").as_str(), "/a/b");
        assert_eq!(p("/a/./b").as_str(), "/a/b");
        assert!(DocPath::parse("a/b").is_err());
        assert!(DocPath::parse("/a/../b").is_err());
        assert!(DocPath::parse("/a\0").is_err());
    }

    #[test]
    fn test_classification() {
        assert_eq!(p("/report.doc").class(), PathClass::Remote);
        assert_eq!(p("/.swap").class(), PathClass::Private);
        assert_eq!(p("/Projects/.x.doc.swp").class(), PathClass::Private);
        // Anything under a private directory stays private
        assert_eq!(p("/.cache/notes").class(), PathClass::Private);
        assert_eq!(DocPath::root().class(), PathClass::Remote);
    }

    #[test]
    fn test_parent_and_name() {
        assert_eq!(p("/x.doc").parent(), DocPath::root());
        assert_eq!(p("/a/b/c.doc").parent(), p("/a/b"));
        assert_eq!(p("/a/b/c.doc").file_name(), "c.doc");
        assert_eq!(DocPath::root().parent(), DocPath::root());
        assert_eq!(DocPath::root().file_name(), "");
    }

    #[test]
    fn test_join() {
        assert_eq!(DocPath::root().join("x.doc").unwrap(), p("/x.doc"));
        assert_eq!(p("/a").join("b").unwrap(), p("/a/b"));
        assert!(p("/a").join("..").is_err());
        assert!(p("/a").join("b/c").is_err());
    }

    #[test]
    fn test_descendant_and_rebase() {
        let from = p("/a");
        let to = p("/z/a");
        assert!(p("/a/b").is_descendant_of(&from));
        assert!(!p("/ab").is_descendant_of(&from));
        assert!(!from.is_descendant_of(&from));
        assert_eq!(p("/a/b/c.doc").rebase(&from, &to), Some(p("/z/a/b/c.doc")));
        assert_eq!(from.rebase(&from, &to), Some(to.clone()));
        assert_eq!(p("/ab").rebase(&from, &to), None);
    }

    fn base() -> PathBuf {
        PathBuf::from("/mirror")
    }

    #[test]
    fn test_safe_path_normal() {
        assert_eq!(
            safe_path(&base(), "dir/file.doc").unwrap(),
            PathBuf::from("/mirror/dir/file.doc")
        );
        assert_eq!(safe_path(&base(), "").unwrap(), PathBuf::from("/mirror"));
    }

    #[test]
    fn test_safe_path_rejects_traversal() {
        assert!(safe_path(&base(), "../etc/passwd").is_err());
        assert!(safe_path(&base(), "foo/../../../etc/passwd").is_err());
        assert!(safe_path(&base(), "/etc/passwd").is_err());
        assert!(safe_path(&base(), "file\0.txt").is_err());
    }

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("file.doc").is_ok());
        assert!(validate_filename(".hidden").is_ok());

        assert!(validate_filename("").is_err());
        assert!(validate_filename(".").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename("file/name").is_err());

        let long_name = "a".repeat(MAX_FILENAME_LEN + 1);
        assert!(validate_filename(&long_name).is_err());
    }
}
