//! Extractors turn one parsed file into entity and relationship records
//!
//! An extractor sees a single file at a time and keeps no state between
//! calls; files are extracted concurrently and their records only meet in
//! the graph builder. Tree shapes an extractor does not understand are
//! skipped and reported as soft failures.

mod ansible;
mod generic;
mod python;
mod registry;

use std::path::Path;

use graphwright_core::{
    EntityRecord, NodeRef, RelationshipRecord, RepoType, RepositoryContext, SoftFailure,
};
use serde::Serialize;

use crate::parse::ParseResult;

pub use ansible::AnsibleExtractor;
pub use generic::GenericExtractor;
pub use python::PythonExtractor;
pub use registry::{ExtractorFactory, ExtractorRegistry};

/// What an extractor knows about the file besides its parse tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    /// Path relative to the repository root, `/`-separated
    pub rel_path: String,
    pub size: u64,
    /// Hex sha256 of the raw bytes
    pub content_hash: String,
}

impl SourceInfo {
    pub fn new(rel_path: impl Into<String>, size: u64, content_hash: impl Into<String>) -> Self {
        Self {
            rel_path: rel_path.into(),
            size,
            content_hash: content_hash.into(),
        }
    }

    pub fn path(&self) -> &Path {
        Path::new(&self.rel_path)
    }

    pub fn file_name(&self) -> &str {
        self.rel_path.rsplit('/').next().unwrap_or(&self.rel_path)
    }

    pub fn extension(&self) -> Option<&str> {
        self.path().extension().and_then(|e| e.to_str())
    }

    /// Directory part of the relative path, empty at the repository root
    pub fn dir(&self) -> &str {
        self.rel_path.rsplit_once('/').map(|(d, _)| d).unwrap_or("")
    }

    pub fn file_ref(&self) -> NodeRef {
        NodeRef::new("File").with("path", self.rel_path.as_str())
    }
}

/// Records produced from one file
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub entities: Vec<EntityRecord>,
    pub relationships: Vec<RelationshipRecord>,
    pub soft_failures: Vec<SoftFailure>,
}

impl Extraction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity and return a reference to it
    pub fn entity(&mut self, record: EntityRecord) -> NodeRef {
        let node_ref = record.node_ref();
        self.entities.push(record);
        node_ref
    }

    pub fn relate(&mut self, from: &NodeRef, rel_type: &str, to: &NodeRef) -> &mut RelationshipRecord {
        self.relationships
            .push(RelationshipRecord::new(from.clone(), rel_type, to.clone()));
        let last = self.relationships.len() - 1;
        &mut self.relationships[last]
    }

    pub fn soft_failure(&mut self, failure: SoftFailure) {
        self.soft_failures.push(failure);
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    pub fn extend(&mut self, other: Extraction) {
        self.entities.extend(other.entities);
        self.relationships.extend(other.relationships);
        self.soft_failures.extend(other.soft_failures);
    }
}

/// One extraction strategy per repository flavor
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn repo_type(&self) -> RepoType;

    /// Whether a file (relative path) is handed to this extractor at all
    fn handles(&self, rel_path: &str) -> bool;

    fn extract(&self, source: &SourceInfo, parse: &ParseResult, ctx: &RepositoryContext) -> Extraction;
}

/// The `File` record every extractor emits for the file it processes
pub fn file_record(source: &SourceInfo, parse: &ParseResult) -> EntityRecord {
    EntityRecord::keyed("File", [("path", source.rel_path.as_str())])
        .with("name", source.file_name())
        .with_opt("extension", source.extension())
        .with("file_type", parse.language)
        .with("size", source.size)
        .with("content_hash", source.content_hash.as_str())
}

/// Join a relative reference onto a directory, folding `.` and `..`.
///
/// Returns `None` for references that are absolute, templated, or climb
/// above the repository root.
pub fn resolve_relative(dir: &str, reference: &str) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with('/') || reference.contains("{{") {
        return None;
    }

    let mut parts: Vec<&str> = dir.split('/').filter(|p| !p.is_empty()).collect();
    for segment in reference.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
