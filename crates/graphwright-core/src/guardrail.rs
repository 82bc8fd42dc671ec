//! Lexical pre-execution checks for graph query strings
//!
//! This is deliberately not a parser. A query is rejected when any forbidden
//! keyword appears anywhere in it, string literals included, or when it
//! names a node or relationship type the schema does not know.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Serialize;

use crate::error::GuardrailError;
use crate::limits::{MAX_QUERY_LEN, MAX_RESULTS_ABSOLUTE, MAX_RESULTS_DEFAULT};
use crate::schema::GraphSchema;

/// Mutating or administrative operations, matched case-insensitively on
/// word boundaries. Multi-word entries come first so they are reported
/// by their full name.
const FORBIDDEN: &[(&str, &str)] = &[
    ("DETACH DELETE", r"\bDETACH\s+DELETE\b"),
    ("LOAD CSV", r"\bLOAD\s+CSV\b"),
    ("CREATE", r"\bCREATE\b"),
    ("MERGE", r"\bMERGE\b"),
    ("DELETE", r"\bDELETE\b"),
    ("REMOVE", r"\bREMOVE\b"),
    ("SET", r"\bSET\b"),
    ("DROP", r"\bDROP\b"),
    ("CALL", r"\bCALL\b"),
    ("FOREACH", r"\bFOREACH\b"),
];

fn forbidden_patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        FORBIDDEN
            .iter()
            .map(|(name, pattern)| {
                let re = Regex::new(&format!("(?i){}", pattern)).expect("static regex");
                (*name, re)
            })
            .collect()
    })
}

fn label_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // (var:Label) or (var:Label:Other {..})
    RE.get_or_init(|| {
        Regex::new(r"\(\s*[A-Za-z_]?\w*\s*((?::\s*`?[A-Za-z_]\w*`?\s*)+)").expect("static regex")
    })
}

fn rel_type_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // [var:TYPE] or [:TYPE|OTHER*1..3]
    RE.get_or_init(|| {
        Regex::new(r"\[\s*[A-Za-z_]?\w*\s*:\s*((?:`?[A-Za-z_]\w*`?\s*\|?\s*:?\s*)+)").expect("static regex")
    })
}

fn limit_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bLIMIT\s+(\d+)").expect("static regex"))
}

/// Outcome of a successful check: the query may run, possibly with warnings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryCheck {
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct QueryGuardrail {
    schema: Arc<GraphSchema>,
    max_len: usize,
}

impl QueryGuardrail {
    pub fn new(schema: Arc<GraphSchema>) -> Self {
        Self {
            schema,
            max_len: MAX_QUERY_LEN,
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    /// Reject forbidden operations and unknown type names
    pub fn validate_query(&self, query: &str) -> Result<(), GuardrailError> {
        self.check(query).map(|_| ())
    }

    /// Like [`validate_query`](Self::validate_query), also reporting
    /// patterns that are allowed but likely expensive.
    pub fn check(&self, query: &str) -> Result<QueryCheck, GuardrailError> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(GuardrailError::Empty);
        }
        if trimmed.chars().count() > self.max_len {
            return Err(GuardrailError::TooLong {
                len: trimmed.chars().count(),
                max: self.max_len,
            });
        }

        if let Some((name, _)) = forbidden_patterns().iter().find(|(_, re)| re.is_match(trimmed)) {
            tracing::warn!(operation = name, "Rejected query with forbidden operation");
            return Err(GuardrailError::Forbidden((*name).to_string()));
        }

        for caps in label_pattern().captures_iter(trimmed) {
            for label in split_names(&caps[1]) {
                if !self.schema.has_node_type(&label) {
                    return Err(GuardrailError::UnknownNodeType(label));
                }
            }
        }

        for caps in rel_type_pattern().captures_iter(trimmed) {
            for rel in split_names(&caps[1]) {
                if !self.schema.has_relationship_type(&rel) {
                    return Err(GuardrailError::UnknownRelationshipType(rel));
                }
            }
        }

        let mut warnings = Vec::new();
        if trimmed.contains("*]") || trimmed.contains("*..]") {
            warnings.push("unbounded variable-length path".to_string());
        }
        let upper = trimmed.to_ascii_uppercase();
        if upper.contains("RETURN *") {
            warnings.push("RETURN * may return large payloads".to_string());
        }
        if !limit_pattern().is_match(trimmed) {
            warnings.push("no LIMIT clause".to_string());
        }
        Ok(QueryCheck { warnings })
    }
}

fn split_names(raw: &str) -> Vec<String> {
    raw.split([':', '|'])
        .map(|s| s.trim().trim_matches('`').trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Add a default LIMIT to a query without one and cap an existing one
pub fn enforce_limit(query: &str, default: usize, max: usize) -> String {
    let trimmed = query.trim().trim_end_matches(';').trim_end();
    match limit_pattern().captures(trimmed) {
        Some(caps) => {
            let current: usize = caps[1].parse().unwrap_or(usize::MAX);
            if current > max {
                limit_pattern()
                    .replace(trimmed, format!("LIMIT {}", max).as_str())
                    .into_owned()
            } else {
                trimmed.to_string()
            }
        }
        None => format!("{} LIMIT {}", trimmed, default.min(max)),
    }
}

/// [`enforce_limit`] with the standard result limits
pub fn enforce_default_limit(query: &str) -> String {
    enforce_limit(query, MAX_RESULTS_DEFAULT, MAX_RESULTS_ABSOLUTE)
}
