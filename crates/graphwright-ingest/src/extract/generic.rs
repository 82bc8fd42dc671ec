//! Containment-only extractor for repositories of no known flavor

use graphwright_core::{EntityRecord, RepoType, RepositoryContext};

use super::{file_record, Extraction, Extractor, SourceInfo};
use crate::parse::ParseResult;

/// Emits the file, its ancestor directories and `CONTAINS` edges
#[derive(Debug, Default)]
pub struct GenericExtractor;

impl GenericExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for GenericExtractor {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn repo_type(&self) -> RepoType {
        RepoType::Generic
    }

    fn handles(&self, _rel_path: &str) -> bool {
        true
    }

    fn extract(&self, source: &SourceInfo, parse: &ParseResult, _ctx: &RepositoryContext) -> Extraction {
        let mut out = Extraction::new();
        let file = out.entity(file_record(source, parse));

        let segments: Vec<&str> = source.dir().split('/').filter(|s| !s.is_empty()).collect();
        let mut parent = None;
        for depth in 1..=segments.len() {
            let path = segments[..depth].join("/");
            let dir = out.entity(
                EntityRecord::keyed("Directory", [("path", path.as_str())]).with("name", segments[depth - 1]),
            );
            if let Some(parent) = &parent {
                out.relate(parent, "CONTAINS", &dir);
            }
            parent = Some(dir);
        }

        if let Some(parent) = &parent {
            out.relate(parent, "CONTAINS", &file);
        }
        out
    }
}
