//! End-of-run build report

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::context::{RepoType, RepositoryContext};

/// Sample lists in the report are capped at this many entries
pub const MAX_REPORTED_SAMPLES: usize = 200;

/// A record rejected by schema validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub file: String,
    /// Node or relationship type of the rejected record
    pub record_type: String,
    pub reason: String,
}

/// A relationship whose endpoint never appeared during the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedRelationship {
    pub from: String,
    pub rel_type: String,
    pub to: String,
}

/// A subtree an extractor skipped without failing the file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftFailure {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub message: String,
}

impl SoftFailure {
    pub fn new(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
            message: message.into(),
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub run_id: Ulid,
    pub repo_id: String,
    pub repo_type: RepoType,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    pub files_processed: usize,
    pub files_failed: usize,
    pub files_skipped: usize,

    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub relationships_created: usize,
    pub relationships_existing: usize,

    /// Records received from extractors, by type
    pub entities_by_type: BTreeMap<String, usize>,
    pub relationships_by_type: BTreeMap<String, usize>,

    pub rejected_count: usize,
    pub rejected: Vec<Rejection>,
    pub unresolved_count: usize,
    pub unresolved: Vec<UnresolvedRelationship>,

    /// Syntax errors per file
    pub parse_errors: BTreeMap<String, usize>,
    /// Read or extraction failures per file
    pub file_errors: BTreeMap<String, String>,
    pub soft_failures: Vec<SoftFailure>,

    /// Records lost to failed batch commits
    pub records_failed: usize,
    pub commit_failures: Vec<String>,

    pub cancelled: bool,
}

impl BuildReport {
    pub fn new(ctx: &RepositoryContext) -> Self {
        Self {
            run_id: Ulid::new(),
            repo_id: ctx.repo_id.clone(),
            repo_type: ctx.repo_type,
            started_at: Utc::now(),
            finished_at: None,
            files_processed: 0,
            files_failed: 0,
            files_skipped: 0,
            nodes_created: 0,
            nodes_updated: 0,
            relationships_created: 0,
            relationships_existing: 0,
            entities_by_type: BTreeMap::new(),
            relationships_by_type: BTreeMap::new(),
            rejected_count: 0,
            rejected: Vec::new(),
            unresolved_count: 0,
            unresolved: Vec::new(),
            parse_errors: BTreeMap::new(),
            file_errors: BTreeMap::new(),
            soft_failures: Vec::new(),
            records_failed: 0,
            commit_failures: Vec::new(),
            cancelled: false,
        }
    }

    pub fn record_rejection(&mut self, rejection: Rejection) {
        self.rejected_count += 1;
        if self.rejected.len() < MAX_REPORTED_SAMPLES {
            self.rejected.push(rejection);
        }
    }

    pub fn record_unresolved(&mut self, unresolved: UnresolvedRelationship) {
        self.unresolved_count += 1;
        if self.unresolved.len() < MAX_REPORTED_SAMPLES {
            self.unresolved.push(unresolved);
        }
    }

    pub fn record_soft_failure(&mut self, failure: SoftFailure) {
        if self.soft_failures.len() < MAX_REPORTED_SAMPLES {
            self.soft_failures.push(failure);
        }
    }

    pub fn record_file_error(&mut self, file: impl Into<String>, error: impl Into<String>) {
        self.files_failed += 1;
        self.file_errors.insert(file.into(), error.into());
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn total_entities(&self) -> usize {
        self.entities_by_type.values().sum()
    }

    pub fn total_relationships(&self) -> usize {
        self.relationships_by_type.values().sum()
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        format!(
            "{} [{}]: {} files, {} nodes created, {} updated, {} relationships created, {} existing, {} rejected, {} unresolved{}",
            self.repo_id,
            self.repo_type,
            self.files_processed,
            self.nodes_created,
            self.nodes_updated,
            self.relationships_created,
            self.relationships_existing,
            self.rejected_count,
            self.unresolved_count,
            if self.cancelled { " (cancelled)" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_are_capped() {
        let ctx = RepositoryContext::new("r", RepoType::Generic).unwrap();
        let mut report = BuildReport::new(&ctx);
        for i in 0..(MAX_REPORTED_SAMPLES + 5) {
            report.record_unresolved(UnresolvedRelationship {
                from: format!("a{}", i),
                rel_type: "IMPORTS".into(),
                to: "b".into(),
            });
        }
        assert_eq!(report.unresolved_count, MAX_REPORTED_SAMPLES + 5);
        assert_eq!(report.unresolved.len(), MAX_REPORTED_SAMPLES);
    }

    #[test]
    fn test_report_serializes() {
        let ctx = RepositoryContext::new("r", RepoType::Ansible).unwrap();
        let mut report = BuildReport::new(&ctx);
        report.finish();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["repo_type"], "ansible");
        assert!(json["finished_at"].is_string());
    }
}
