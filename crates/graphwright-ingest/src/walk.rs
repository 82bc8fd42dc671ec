//! Enumerate the files of a repository that an extractor accepts

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{IngestError, Result};
use crate::extract::Extractor;

/// Directories never descended into
const EXCLUDED_DIRS: &[&str] = &["node_modules", "__pycache__", "venv", "target"];

/// A file selected for extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// `/`-separated path relative to the repository root
    pub rel_path: String,
    pub size: u64,
}

#[derive(Debug, Default)]
pub struct Listing {
    /// Sorted by relative path
    pub files: Vec<SourceFile>,
    /// Accepted by the extractor but over the size limit
    pub oversized: Vec<String>,
    /// Entries that could not be read while walking
    pub errors: Vec<(String, String)>,
}

pub(crate) fn is_excluded_dir(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.') || EXCLUDED_DIRS.contains(&name.as_ref())
}

/// Walk `root` and keep the files `extractor` handles
pub fn list_files(root: &Path, extractor: &dyn Extractor, max_file_size: u64) -> Result<Listing> {
    if !root.is_dir() {
        return Err(IngestError::NotADirectory(root.to_path_buf()));
    }

    let mut listing = Listing::default();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !(e.file_type().is_dir() && is_excluded_dir(e.file_name())));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let at = e
                    .path()
                    .and_then(|p| p.strip_prefix(root).ok())
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                tracing::debug!("Walk error at '{}': {}", at, e);
                listing.errors.push((at, e.to_string()));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(rel) = entry.path().strip_prefix(root) else { continue };
        let rel_path = rel.to_string_lossy().replace('\\', "/");
        if !extractor.handles(&rel_path) {
            continue;
        }

        let size = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                listing.errors.push((rel_path, e.to_string()));
                continue;
            }
        };
        if size > max_file_size {
            tracing::debug!("Skipping '{}' ({} bytes)", rel_path, size);
            listing.oversized.push(rel_path);
            continue;
        }

        listing.files.push(SourceFile {
            path: entry.into_path(),
            rel_path,
            size,
        });
    }

    listing.files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    listing.oversized.sort();
    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{GenericExtractor, PythonExtractor};
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("pkg/sub")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("pkg/__pycache__")).unwrap();
        fs::write(root.join("pkg/__init__.py"), "").unwrap();
        fs::write(root.join("pkg/sub/mod.py"), "x = 1\n").unwrap();
        fs::write(root.join("pkg/__pycache__/mod.cpython-311.pyc"), "bin").unwrap();
        fs::write(root.join(".git/config"), "[core]").unwrap();
        fs::write(root.join("README.md"), "# readme").unwrap();
        dir
    }

    #[test]
    fn test_lists_handled_files_sorted() {
        let dir = tree();
        let listing = list_files(dir.path(), &PythonExtractor::new(), 1024).unwrap();
        let paths: Vec<_> = listing.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["pkg/__init__.py", "pkg/sub/mod.py"]);
        assert_eq!(listing.files[1].size, 6);
    }

    #[test]
    fn test_excludes_hidden_and_cache_dirs() {
        let dir = tree();
        let listing = list_files(dir.path(), &GenericExtractor::new(), 1024).unwrap();
        let paths: Vec<_> = listing.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["README.md", "pkg/__init__.py", "pkg/sub/mod.py"]);
    }

    #[test]
    fn test_oversized_files_are_reported() {
        let dir = tree();
        let listing = list_files(dir.path(), &GenericExtractor::new(), 5).unwrap();
        assert_eq!(listing.oversized, vec!["README.md", "pkg/sub/mod.py"]);
        assert_eq!(listing.files.len(), 1);
    }

    #[test]
    fn test_not_a_directory() {
        let dir = tree();
        let err = list_files(&dir.path().join("README.md"), &GenericExtractor::new(), 1024);
        assert!(matches!(err, Err(IngestError::NotADirectory(_))));
    }
}
