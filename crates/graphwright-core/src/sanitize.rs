//! Validation of externally supplied file paths
//!
//! Every path that arrives from a caller is resolved against a root
//! directory before it reaches the filesystem or is embedded in a graph
//! lookup. Rejections are logged with the rejection kind and input length
//! only.

use std::path::{Component, Path, PathBuf};

use crate::error::SecurityError;
use crate::limits::MAX_PATH_LEN;

/// A path proven to lie under the sanitizer root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedPath {
    absolute: PathBuf,
    relative: String,
}

impl SanitizedPath {
    pub fn absolute(&self) -> &Path {
        &self.absolute
    }

    /// Root-relative path with `/` separators, as stored in the graph
    pub fn relative(&self) -> &str {
        &self.relative
    }

    pub fn into_absolute(self) -> PathBuf {
        self.absolute
    }
}

#[derive(Debug, Clone)]
pub struct PathSanitizer {
    root: PathBuf,
    allow_absolute: bool,
}

impl PathSanitizer {
    /// Create a sanitizer rooted at an existing directory
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SecurityError> {
        let root = root
            .as_ref()
            .canonicalize()
            .map_err(|_| SecurityError::RootUnavailable)?;
        if !root.is_dir() {
            return Err(SecurityError::RootUnavailable);
        }
        Ok(Self {
            root,
            allow_absolute: false,
        })
    }

    /// Accept absolute paths as long as they resolve under the root
    pub fn allow_absolute(mut self, allow: bool) -> Self {
        self.allow_absolute = allow;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sanitize(&self, raw: &str) -> Result<SanitizedPath, SecurityError> {
        self.check(raw).map_err(|e| {
            tracing::warn!(reason = %e, input_len = raw.len(), "Rejected path");
            e
        })
    }

    fn check(&self, raw: &str) -> Result<SanitizedPath, SecurityError> {
        if raw.trim().is_empty() {
            return Err(SecurityError::EmptyPath);
        }
        if raw.contains('\0') {
            return Err(SecurityError::NullByte);
        }
        if raw.len() > MAX_PATH_LEN {
            return Err(SecurityError::TooLong {
                len: raw.len(),
                max: MAX_PATH_LEN,
            });
        }
        if raw.split(['/', '\\']).any(|segment| segment == "..") {
            return Err(SecurityError::Traversal);
        }

        let path = Path::new(raw);
        let relative_input = if path.is_absolute() || path.has_root() {
            if !self.allow_absolute {
                return Err(SecurityError::AbsolutePath);
            }
            path.strip_prefix(&self.root)
                .map_err(|_| SecurityError::EscapesRoot)?
                .to_path_buf()
        } else {
            path.to_path_buf()
        };

        let mut parts: Vec<String> = Vec::new();
        for component in relative_input.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                Component::ParentDir => return Err(SecurityError::Traversal),
                Component::RootDir | Component::Prefix(_) => return Err(SecurityError::AbsolutePath),
            }
        }

        let mut absolute = self.root.clone();
        for part in &parts {
            absolute.push(part);
        }

        self.ensure_within_root(&absolute)?;

        Ok(SanitizedPath {
            absolute,
            relative: parts.join("/"),
        })
    }

    /// Resolve symlinks on the longest existing prefix and require that it
    /// stays under the root.
    fn ensure_within_root(&self, candidate: &Path) -> Result<(), SecurityError> {
        let mut existing = candidate;
        loop {
            if existing.exists() {
                break;
            }
            match existing.parent() {
                Some(parent) => existing = parent,
                None => return Err(SecurityError::EscapesRoot),
            }
        }
        let resolved = existing
            .canonicalize()
            .map_err(|_| SecurityError::EscapesRoot)?;
        if resolved.starts_with(&self.root) {
            Ok(())
        } else {
            Err(SecurityError::EscapesRoot)
        }
    }
}

/// Resolve `raw` under `root` in one call
pub fn sanitize(raw: &str, root: impl AsRef<Path>) -> Result<SanitizedPath, SecurityError> {
    PathSanitizer::new(root)?.sanitize(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn root() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        (dir, canonical)
    }

    #[test]
    fn test_rejects_traversal() {
        let (_dir, root) = root();
        assert_eq!(
            sanitize("../../etc/passwd", &root),
            Err(SecurityError::Traversal)
        );
        assert_eq!(sanitize("a/../../b", &root), Err(SecurityError::Traversal));
        assert_eq!(sanitize("a\\..\\b", &root), Err(SecurityError::Traversal));
    }

    #[test]
    fn test_resolves_relative_path() {
        let (_dir, root) = root();
        let p = sanitize("sub/dir/file.yml", &root).unwrap();
        assert_eq!(p.absolute(), root.join("sub/dir/file.yml"));
        assert_eq!(p.relative(), "sub/dir/file.yml");
    }

    #[test]
    fn test_normalizes_current_dir_segments() {
        let (_dir, root) = root();
        let p = sanitize("./sub//./file.yml", &root).unwrap();
        assert_eq!(p.relative(), "sub/file.yml");
    }

    #[test]
    fn test_rejects_null_and_empty() {
        let (_dir, root) = root();
        assert_eq!(sanitize("", &root), Err(SecurityError::EmptyPath));
        assert_eq!(sanitize("   ", &root), Err(SecurityError::EmptyPath));
        assert_eq!(sanitize("a\0b", &root), Err(SecurityError::NullByte));
    }

    #[test]
    fn test_absolute_paths() {
        let (_dir, root) = root();
        let inside = root.join("x.yml");
        let inside = inside.to_str().unwrap();

        assert_eq!(sanitize("/etc/passwd", &root), Err(SecurityError::AbsolutePath));
        assert_eq!(sanitize(inside, &root), Err(SecurityError::AbsolutePath));

        let permissive = PathSanitizer::new(&root).unwrap().allow_absolute(true);
        assert_eq!(permissive.sanitize(inside).unwrap().relative(), "x.yml");
        assert_eq!(permissive.sanitize("/etc/passwd"), Err(SecurityError::EscapesRoot));
    }

    #[test]
    fn test_rejects_too_long() {
        let (_dir, root) = root();
        let long = "a/".repeat(MAX_PATH_LEN);
        assert!(matches!(
            sanitize(&long, &root),
            Err(SecurityError::TooLong { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_escape() {
        let (_dir, root) = root();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();

        assert_eq!(
            sanitize("link/secret.txt", &root),
            Err(SecurityError::EscapesRoot)
        );
    }

    #[test]
    fn test_error_message_omits_input() {
        let (_dir, root) = root();
        let err = sanitize("../../etc/shadow", &root).unwrap_err();
        assert!(!err.to_string().contains("shadow"));
    }
}
