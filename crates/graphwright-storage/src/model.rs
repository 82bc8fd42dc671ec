//! Stored graph shapes, write batches and read filters

use std::collections::BTreeMap;

use graphwright_core::{NodeKey, Properties, Scalar};
use serde::{Deserialize, Serialize};

/// A node as held by a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredNode {
    pub key: NodeKey,
    pub properties: Properties,
}

impl StoredNode {
    pub fn new(key: NodeKey, properties: Properties) -> Self {
        Self { key, properties }
    }

    pub fn node_type(&self) -> &str {
        &self.key.node_type
    }

    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.properties.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Scalar::as_str)
    }

    /// Merge properties into this node; incoming values win
    pub fn merge(&mut self, properties: &Properties) {
        for (k, v) in properties {
            self.properties.insert(k.clone(), v.clone());
        }
    }
}

/// An edge between two node keys. Identity is `(from, to, rel_type)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEdge {
    pub from: NodeKey,
    pub to: NodeKey,
    pub rel_type: String,
    /// Repository whose build wrote the edge
    pub repository: String,
    #[serde(default)]
    pub properties: Properties,
}

impl StoredEdge {
    pub fn identity(&self) -> (NodeKey, NodeKey, String) {
        (self.from.clone(), self.to.clone(), self.rel_type.clone())
    }

    pub fn touches(&self, key: &NodeKey) -> bool {
        &self.from == key || &self.to == key
    }
}

/// One merge transaction: nodes are applied before edges
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub nodes: Vec<StoredNode>,
    pub edges: Vec<StoredEdge>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + self.edges.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub edges_created: usize,
    pub edges_existing: usize,
    /// Edges whose endpoints are not in the store; nothing was written for them
    pub unresolved: Vec<StoredEdge>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClearOutcome {
    pub nodes_deleted: usize,
    pub edges_deleted: usize,
    /// Shared nodes removed because nothing references them any more
    pub shared_deleted: usize,
    /// Shared nodes still in the store after the clear
    pub shared_retained: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepositorySummary {
    pub repo_id: String,
    pub node_count: usize,
    pub edge_count: usize,
    pub nodes_by_type: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub nodes_by_type: BTreeMap<String, usize>,
    pub edges_by_type: BTreeMap<String, usize>,
}

/// Node lookup criteria. Property values compare by canonical text, so
/// `order = "2"` matches an integer `2`.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub node_type: Option<String>,
    /// Restrict to one repository's nodes
    pub repository: Option<String>,
    /// With `repository` set, also match shared nodes
    pub include_shared: bool,
    pub properties: Vec<(String, Scalar)>,
    pub limit: Option<usize>,
}

impl NodeFilter {
    pub fn of_type(node_type: impl Into<String>) -> Self {
        Self {
            node_type: Some(node_type.into()),
            ..Default::default()
        }
    }

    pub fn in_repository(mut self, repo: impl Into<String>) -> Self {
        self.repository = Some(repo.into());
        self
    }

    pub fn with_shared(mut self) -> Self {
        self.include_shared = true;
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.properties.push((name.into(), value.into()));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, node: &StoredNode) -> bool {
        if let Some(t) = &self.node_type {
            if &node.key.node_type != t {
                return false;
            }
        }
        if let Some(repo) = &self.repository {
            let in_repo = node.key.repository.as_deref() == Some(repo.as_str());
            let shared_ok = self.include_shared && node.key.is_shared();
            if !in_repo && !shared_ok {
                return false;
            }
        }
        self.properties.iter().all(|(name, want)| {
            node.properties
                .get(name)
                .map(|have| have.key_text() == want.key_text())
                .unwrap_or(false)
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct EdgeFilter {
    pub from: Option<NodeKey>,
    pub to: Option<NodeKey>,
    /// Empty matches every type
    pub rel_types: Vec<String>,
    pub repository: Option<String>,
    pub limit: Option<usize>,
}

impl EdgeFilter {
    /// Edges leaving `key`
    pub fn outgoing(key: NodeKey) -> Self {
        Self {
            from: Some(key),
            ..Default::default()
        }
    }

    /// Edges arriving at `key`
    pub fn incoming(key: NodeKey) -> Self {
        Self {
            to: Some(key),
            ..Default::default()
        }
    }

    pub fn rel_type(mut self, rel_type: impl Into<String>) -> Self {
        self.rel_types.push(rel_type.into());
        self
    }

    pub fn rel_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rel_types.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn in_repository(mut self, repo: impl Into<String>) -> Self {
        self.repository = Some(repo.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, edge: &StoredEdge) -> bool {
        if let Some(from) = &self.from {
            if &edge.from != from {
                return false;
            }
        }
        if let Some(to) = &self.to {
            if &edge.to != to {
                return false;
            }
        }
        if !self.rel_types.is_empty() && !self.rel_types.iter().any(|t| t == &edge.rel_type) {
            return false;
        }
        if let Some(repo) = &self.repository {
            if &edge.repository != repo {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(node_type: &str, repo: Option<&str>, path: &str) -> StoredNode {
        let key = NodeKey::new(
            node_type,
            repo.map(str::to_string),
            vec![("path".into(), path.into())],
        );
        let mut properties = Properties::new();
        properties.insert("path".into(), Scalar::from(path));
        properties.insert("order".into(), Scalar::Int(2));
        StoredNode::new(key, properties)
    }

    #[test]
    fn test_node_filter_repository_and_shared() {
        let local = node("File", Some("web"), "a.yml");
        let other = node("File", Some("db"), "a.yml");
        let shared = node("Role", None, "x");

        let f = NodeFilter::default().in_repository("web");
        assert!(f.matches(&local));
        assert!(!f.matches(&other));
        assert!(!f.matches(&shared));
        assert!(f.clone().with_shared().matches(&shared));
    }

    #[test]
    fn test_node_filter_compares_canonical_text() {
        let n = node("Task", Some("web"), "site.yml");
        assert!(NodeFilter::default().with_property("order", "2").matches(&n));
        assert!(!NodeFilter::default().with_property("order", 3i64).matches(&n));
        assert!(!NodeFilter::default().with_property("missing", "x").matches(&n));
    }

    #[test]
    fn test_merge_later_values_win() {
        let mut n = node("File", Some("web"), "a.yml");
        let mut update = Properties::new();
        update.insert("order".into(), Scalar::Int(5));
        update.insert("size".into(), Scalar::Int(10));
        n.merge(&update);
        assert_eq!(n.get("order"), Some(&Scalar::Int(5)));
        assert_eq!(n.get("size"), Some(&Scalar::Int(10)));
        assert_eq!(n.get_str("path"), Some("a.yml"));
    }
}
