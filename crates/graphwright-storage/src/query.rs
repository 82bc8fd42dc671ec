//! Read-only pattern queries
//!
//! Supports one node or one hop:
//!
//! ```text
//! MATCH (a:Type {prop: "v"})-[:REL|OTHER]->(b:Type)
//! WHERE a.prop = "v" AND b.prop = 3
//! RETURN a.prop, b
//! LIMIT 10
//! ```
//!
//! `<-[:REL]-` reverses the hop. Every query passes the guardrail before it
//! is parsed, and result sizes are capped.

use std::sync::OnceLock;

use graphwright_core::limits::{MAX_RESULTS_ABSOLUTE, MAX_RESULTS_DEFAULT};
use graphwright_core::{QueryGuardrail, Scalar};
use regex::Regex;
use serde::Serialize;

use crate::error::{StorageError, StorageResult};
use crate::model::{EdgeFilter, NodeFilter, StoredEdge, StoredNode};
use crate::traits::GraphStore;

const LITERAL: &str = r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|-?\d+(?:\.\d+)?|true|false"#;

fn statement_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?is)^\s*MATCH\s+(?P<pattern>.+?)(?:\s+WHERE\s+(?P<where>.+?))?\s+RETURN\s+(?P<ret>.+?)(?:\s+LIMIT\s+(?P<limit>\d+))?\s*;?\s*$",
        )
        .expect("static regex")
    })
}

fn path_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?s)^\((?P<a>[^()]*)\)(?:\s*(?P<ldir><)?-\[(?P<rel>[^\]]*)\]-(?P<rdir>>)?\s*\((?P<b>[^()]*)\))?$",
        )
        .expect("static regex")
    })
}

fn node_body_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)^\s*(?P<var>[A-Za-z_]\w*)?\s*(?::\s*(?P<label>[A-Za-z_]\w*))?\s*(?:\{(?P<props>.*)\})?\s*$")
            .expect("static regex")
    })
}

fn rel_body_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?P<var>[A-Za-z_]\w*)?\s*(?::\s*(?P<types>[A-Za-z_]\w*(?:\s*\|\s*:?\s*[A-Za-z_]\w*)*))?\s*$")
            .expect("static regex")
    })
}

fn property_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"^\s*(?P<name>[A-Za-z_]\w*)\s*:\s*(?P<value>{})\s*$", LITERAL)).expect("static regex")
    })
}

fn condition_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"^\s*(?P<var>[A-Za-z_]\w*)\.(?P<prop>[A-Za-z_]\w*)\s*=\s*(?P<value>{})\s*$",
            LITERAL
        ))
        .expect("static regex")
    })
}

fn and_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s+AND\s+").expect("static regex"))
}

fn unsupported(msg: impl Into<String>) -> StorageError {
    StorageError::UnsupportedQuery(msg.into())
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodePattern {
    pub var: Option<String>,
    pub node_type: Option<String>,
    pub properties: Vec<(String, Scalar)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelPattern {
    pub var: Option<String>,
    pub rel_types: Vec<String>,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReturnItem {
    Property { var: String, prop: String, alias: Option<String> },
    Var(String),
}

impl ReturnItem {
    fn column(&self) -> String {
        match self {
            Self::Property { alias: Some(alias), .. } => alias.clone(),
            Self::Property { var, prop, .. } => format!("{}.{}", var, prop),
            Self::Var(var) => var.clone(),
        }
    }
}

/// A parsed single-hop pattern query
#[derive(Debug, Clone, PartialEq)]
pub struct PatternQuery {
    pub start: NodePattern,
    pub hop: Option<(RelPattern, NodePattern)>,
    pub returns: Vec<ReturnItem>,
    pub limit: Option<usize>,
}

impl PatternQuery {
    pub fn parse(query: &str) -> StorageResult<Self> {
        let caps = statement_pattern()
            .captures(query)
            .ok_or_else(|| unsupported("expected MATCH ... RETURN ..."))?;

        let path = path_pattern()
            .captures(caps["pattern"].trim())
            .ok_or_else(|| unsupported("only single nodes and single hops are supported"))?;

        let mut start = parse_node(&path["a"])?;
        let mut hop = match (path.name("rel"), path.name("b")) {
            (Some(rel), Some(b)) => {
                let direction = match (path.name("ldir").is_some(), path.name("rdir").is_some()) {
                    (false, true) => Direction::Outgoing,
                    (true, false) => Direction::Incoming,
                    _ => return Err(unsupported("relationship direction is required")),
                };
                Some((parse_rel(rel.as_str(), direction)?, parse_node(b.as_str())?))
            }
            _ => None,
        };

        if let Some(conditions) = caps.name("where") {
            for clause in and_pattern().split(conditions.as_str()) {
                let c = condition_pattern()
                    .captures(clause)
                    .ok_or_else(|| unsupported("WHERE supports `var.prop = literal` joined by AND"))?;
                let target = if start.var.as_deref() == Some(&c["var"]) {
                    &mut start
                } else {
                    match hop.as_mut() {
                        Some((_, end)) if end.var.as_deref() == Some(&c["var"]) => end,
                        _ => return Err(unsupported(format!("unknown variable '{}'", &c["var"]))),
                    }
                };
                target.properties.push((c["prop"].to_string(), parse_literal(&c["value"])));
            }
        }

        let mut returns = Vec::new();
        for item in caps["ret"].split(',') {
            returns.push(parse_return(item)?);
        }
        let known = |var: &str| {
            start.var.as_deref() == Some(var)
                || hop.as_ref().is_some_and(|(rel, end)| {
                    rel.var.as_deref() == Some(var) || end.var.as_deref() == Some(var)
                })
        };
        for item in &returns {
            let var = match item {
                ReturnItem::Property { var, .. } | ReturnItem::Var(var) => var,
            };
            if !known(var) {
                return Err(unsupported(format!("unknown variable '{}'", var)));
            }
        }

        let limit = caps.name("limit").and_then(|m| m.as_str().parse().ok());
        Ok(Self {
            start,
            hop,
            returns,
            limit,
        })
    }
}

fn parse_node(body: &str) -> StorageResult<NodePattern> {
    let caps = node_body_pattern()
        .captures(body)
        .ok_or_else(|| unsupported("malformed node pattern"))?;
    let mut properties = Vec::new();
    if let Some(props) = caps.name("props") {
        for pair in split_top_level(props.as_str()) {
            if pair.trim().is_empty() {
                continue;
            }
            let p = property_pattern()
                .captures(&pair)
                .ok_or_else(|| unsupported("node properties must be `name: literal`"))?;
            properties.push((p["name"].to_string(), parse_literal(&p["value"])));
        }
    }
    Ok(NodePattern {
        var: caps.name("var").map(|m| m.as_str().to_string()),
        node_type: caps.name("label").map(|m| m.as_str().to_string()),
        properties,
    })
}

fn parse_rel(body: &str, direction: Direction) -> StorageResult<RelPattern> {
    if body.contains('*') {
        return Err(unsupported("variable-length paths are not supported"));
    }
    let caps = rel_body_pattern()
        .captures(body)
        .ok_or_else(|| unsupported("malformed relationship pattern"))?;
    let rel_types = caps
        .name("types")
        .map(|m| {
            m.as_str()
                .split('|')
                .map(|t| t.trim().trim_start_matches(':').trim().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();
    Ok(RelPattern {
        var: caps.name("var").map(|m| m.as_str().to_string()),
        rel_types,
        direction,
    })
}

fn parse_return(item: &str) -> StorageResult<ReturnItem> {
    let item = item.trim();
    let (expr, alias) = match item.to_ascii_uppercase().find(" AS ") {
        Some(at) => (item[..at].trim(), Some(item[at + 4..].trim().to_string())),
        None => (item, None),
    };
    let is_ident = |s: &str| {
        !s.is_empty()
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !s.starts_with(|c: char| c.is_ascii_digit())
    };
    match expr.split_once('.') {
        Some((var, prop)) if is_ident(var) && is_ident(prop) => Ok(ReturnItem::Property {
            var: var.to_string(),
            prop: prop.to_string(),
            alias,
        }),
        None if is_ident(expr) => Ok(ReturnItem::Var(expr.to_string())),
        _ => Err(unsupported(format!("unsupported RETURN item '{}'", expr))),
    }
}

/// Split on commas that are outside quotes
fn split_top_level(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in s.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                current.push(c);
            }
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                current.push(c);
            }
            None if c == ',' => parts.push(std::mem::take(&mut current)),
            None => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn parse_literal(raw: &str) -> Scalar {
    let raw = raw.trim();
    if raw.len() >= 2 && (raw.starts_with('"') || raw.starts_with('\'')) {
        let inner = &raw[1..raw.len() - 1];
        return Scalar::String(inner.replace("\\\"", "\"").replace("\\'", "'").replace("\\\\", "\\"));
    }
    match raw {
        "true" => Scalar::Bool(true),
        "false" => Scalar::Bool(false),
        _ => raw
            .parse::<i64>()
            .map(Scalar::Int)
            .or_else(|_| raw.parse::<f64>().map(Scalar::Float))
            .unwrap_or_else(|_| Scalar::String(raw.to_string())),
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub warnings: Vec<String>,
    /// More rows matched than the limit allowed
    pub truncated: bool,
}

/// Runs guarded pattern queries against a store
pub struct QueryRunner<'a> {
    store: &'a dyn GraphStore,
    guardrail: &'a QueryGuardrail,
    repository: Option<String>,
}

impl<'a> QueryRunner<'a> {
    pub fn new(store: &'a dyn GraphStore, guardrail: &'a QueryGuardrail) -> Self {
        Self {
            store,
            guardrail,
            repository: None,
        }
    }

    /// Restrict matches to one repository (shared nodes stay visible)
    pub fn in_repository(mut self, repo_id: Option<String>) -> Self {
        self.repository = repo_id;
        self
    }

    /// Check, parse and execute `query`.
    ///
    /// The effective limit is the query's own LIMIT, else `limit`, else
    /// the default, never above the absolute maximum.
    pub async fn run(&self, query: &str, limit: Option<usize>) -> StorageResult<QueryResult> {
        let check = self.guardrail.check(query)?;
        let parsed = PatternQuery::parse(query)?;
        let limit = parsed
            .limit
            .or(limit)
            .unwrap_or(MAX_RESULTS_DEFAULT)
            .clamp(1, MAX_RESULTS_ABSOLUTE);

        let mut result = QueryResult {
            columns: parsed.returns.iter().map(ReturnItem::column).collect(),
            rows: Vec::new(),
            warnings: check.warnings,
            truncated: false,
        };

        let starts = self.store.find_nodes(&self.node_filter(&parsed.start)).await?;

        match &parsed.hop {
            None => {
                for node in &starts {
                    if result.rows.len() >= limit {
                        result.truncated = true;
                        break;
                    }
                    result.rows.push(project(&parsed, node, None));
                }
            }
            Some((rel, end)) => {
                let end_filter = self.node_filter(end);
                'outer: for node in &starts {
                    let mut filter = match rel.direction {
                        Direction::Outgoing => EdgeFilter::outgoing(node.key.clone()),
                        Direction::Incoming => EdgeFilter::incoming(node.key.clone()),
                    }
                    .rel_types(rel.rel_types.iter().cloned());
                    filter.repository = self.repository.clone();

                    for edge in self.store.edges(&filter).await? {
                        let other = match rel.direction {
                            Direction::Outgoing => &edge.to,
                            Direction::Incoming => &edge.from,
                        };
                        let Some(target) = self.store.get_node(other).await? else {
                            continue;
                        };
                        if !end_filter.matches(&target) {
                            continue;
                        }
                        if result.rows.len() >= limit {
                            result.truncated = true;
                            break 'outer;
                        }
                        result.rows.push(project(&parsed, node, Some((&edge, &target))));
                    }
                }
            }
        }

        tracing::debug!(rows = result.rows.len(), truncated = result.truncated, "Pattern query executed");
        Ok(result)
    }

    fn node_filter(&self, pattern: &NodePattern) -> NodeFilter {
        NodeFilter {
            node_type: pattern.node_type.clone(),
            repository: self.repository.clone(),
            include_shared: true,
            properties: pattern.properties.clone(),
            limit: None,
        }
    }
}

fn node_json(node: &StoredNode) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert("_type".into(), node.key.node_type.clone().into());
    if let Some(repo) = &node.key.repository {
        map.insert("_repository".into(), repo.clone().into());
    }
    for (k, v) in &node.properties {
        map.insert(k.clone(), v.to_json());
    }
    serde_json::Value::Object(map)
}

fn project(
    query: &PatternQuery,
    start: &StoredNode,
    hop: Option<(&StoredEdge, &StoredNode)>,
) -> Vec<serde_json::Value> {
    let node_for = |var: &str| -> Option<&StoredNode> {
        if query.start.var.as_deref() == Some(var) {
            return Some(start);
        }
        match (&query.hop, hop) {
            (Some((_, end)), Some((_, target))) if end.var.as_deref() == Some(var) => Some(target),
            _ => None,
        }
    };
    let edge_for = |var: &str| -> Option<&StoredEdge> {
        match (&query.hop, hop) {
            (Some((rel, _)), Some((edge, _))) if rel.var.as_deref() == Some(var) => Some(edge),
            _ => None,
        }
    };

    query
        .returns
        .iter()
        .map(|item| match item {
            ReturnItem::Var(var) => match (node_for(var), edge_for(var)) {
                (Some(node), _) => node_json(node),
                (None, Some(edge)) => serde_json::json!({
                    "type": edge.rel_type,
                    "repository": edge.repository,
                }),
                _ => serde_json::Value::Null,
            },
            ReturnItem::Property { var, prop, .. } => match (node_for(var), edge_for(var)) {
                (Some(node), _) => node.get(prop).map(Scalar::to_json).unwrap_or_default(),
                (None, Some(edge)) => edge.properties.get(prop).map(Scalar::to_json).unwrap_or_default(),
                _ => serde_json::Value::Null,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::tests::{edge, file, role};
    use crate::memory::MemoryStore;
    use crate::model::WriteBatch;
    use graphwright_core::{GraphSchema, GuardrailError};
    use std::sync::Arc;

    #[test]
    fn test_parse_single_hop() {
        let q = PatternQuery::parse(
            "MATCH (f:File {path: 'site.yml'})<-[r:IN_FILE]-(t:Task) WHERE t.module = \"apt\" RETURN t.name AS task, f.path LIMIT 5",
        )
        .unwrap();
        assert_eq!(q.start.node_type.as_deref(), Some("File"));
        assert_eq!(q.start.properties, vec![("path".to_string(), Scalar::from("site.yml"))]);
        let (rel, end) = q.hop.unwrap();
        assert_eq!(rel.direction, Direction::Incoming);
        assert_eq!(rel.rel_types, vec!["IN_FILE"]);
        assert_eq!(end.properties, vec![("module".to_string(), Scalar::from("apt"))]);
        assert_eq!(q.limit, Some(5));
        assert_eq!(q.returns[0].column(), "task");
    }

    #[test]
    fn test_parse_rejects_unsupported_shapes() {
        assert!(PatternQuery::parse("MATCH (a)-[:X]-(b) RETURN a").is_err());
        assert!(PatternQuery::parse("MATCH (a)-[:X*]->(b) RETURN a").is_err());
        assert!(PatternQuery::parse("MATCH (a:File) RETURN z.path").is_err());
        assert!(PatternQuery::parse("MATCH (a:File) WHERE a.x > 3 RETURN a").is_err());
    }

    #[test]
    fn test_literal_kinds() {
        assert_eq!(parse_literal("3"), Scalar::Int(3));
        assert_eq!(parse_literal("1.5"), Scalar::Float(1.5));
        assert_eq!(parse_literal("true"), Scalar::Bool(true));
        assert_eq!(parse_literal("'a, b'"), Scalar::from("a, b"));
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        let site = file("web", "site.yml");
        let common = file("web", "common.yml");
        let other = file("db", "site.yml");
        let nginx = role("nginx");
        store
            .commit_batch(WriteBatch {
                nodes: vec![site.clone(), common.clone(), other.clone(), nginx.clone()],
                edges: vec![
                    edge(&site, "INCLUDES", &common, "web"),
                    edge(&site, "USES_ROLE", &nginx, "web"),
                    edge(&other, "USES_ROLE", &nginx, "db"),
                ],
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_run_hop_query_scoped_to_repository() {
        let store = seeded().await;
        let guardrail = QueryGuardrail::new(Arc::new(GraphSchema::combined().unwrap()));
        let runner = QueryRunner::new(&store, &guardrail).in_repository(Some("web".into()));

        let result = runner
            .run("MATCH (f:File)-[:INCLUDES|USES_ROLE]->(x) RETURN f.path, x LIMIT 10", None)
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["f.path", "x"]);
        assert_eq!(result.rows.len(), 2);
        assert!(result.rows.iter().all(|r| r[0] == "site.yml"));
    }

    #[tokio::test]
    async fn test_run_rejects_guardrail_violation() {
        let store = seeded().await;
        let guardrail = QueryGuardrail::new(Arc::new(GraphSchema::combined().unwrap()));
        let runner = QueryRunner::new(&store, &guardrail);

        let err = runner.run("MATCH (n:File) DETACH DELETE n", None).await.unwrap_err();
        assert!(matches!(err, StorageError::Guardrail(GuardrailError::Forbidden(_))));
        assert_eq!(store.stats(None).await.unwrap().node_count, 4);
    }

    #[tokio::test]
    async fn test_run_applies_limit() {
        let store = seeded().await;
        let guardrail = QueryGuardrail::new(Arc::new(GraphSchema::combined().unwrap()));
        let runner = QueryRunner::new(&store, &guardrail);

        let result = runner.run("MATCH (f:File) RETURN f.path", Some(2)).await.unwrap();
        assert_eq!(result.rows.len(), 2);
        assert!(result.truncated);
        assert!(result.warnings.iter().any(|w| w.contains("LIMIT")));
    }
}
