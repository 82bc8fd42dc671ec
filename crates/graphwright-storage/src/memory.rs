//! In-memory graph store

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use graphwright_core::{GraphSchema, NodeKey, Retention};

use crate::error::{StorageError, StorageResult};
use crate::model::{
    BatchOutcome, ClearOutcome, EdgeFilter, GraphStats, NodeFilter, RepositorySummary,
    StoredEdge, StoredNode, WriteBatch,
};
use crate::traits::GraphStore;

type EdgeId = (NodeKey, NodeKey, String);

#[derive(Default)]
struct Graph {
    nodes: HashMap<NodeKey, StoredNode>,
    edges: HashMap<EdgeId, StoredEdge>,
    /// Repositories whose builds declared each edge
    owners: HashMap<EdgeId, BTreeSet<String>>,
}

/// In-memory graph store
///
/// Useful for tests and one-shot builds. One lock covers nodes and edges
/// so a batch is applied atomically.
pub struct MemoryStore {
    graph: RwLock<Graph>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(Graph::default()),
        }
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, Graph>> {
        self.graph
            .read()
            .map_err(|e| StorageError::Database(format!("Lock error: {}", e)))
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, Graph>> {
        self.graph
            .write()
            .map_err(|e| StorageError::Database(format!("Lock error: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn initialize(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<bool> {
        self.read()?;
        Ok(true)
    }

    async fn commit_batch(&self, batch: WriteBatch) -> StorageResult<BatchOutcome> {
        let mut graph = self.write()?;
        let mut outcome = BatchOutcome::default();

        for node in batch.nodes {
            match graph.nodes.get_mut(&node.key) {
                Some(existing) => {
                    existing.merge(&node.properties);
                    outcome.nodes_updated += 1;
                }
                None => {
                    graph.nodes.insert(node.key.clone(), node);
                    outcome.nodes_created += 1;
                }
            }
        }

        for edge in batch.edges {
            if !graph.nodes.contains_key(&edge.from) || !graph.nodes.contains_key(&edge.to) {
                outcome.unresolved.push(edge);
                continue;
            }
            let id = edge.identity();
            graph.owners.entry(id.clone()).or_default().insert(edge.repository.clone());
            if graph.edges.contains_key(&id) {
                outcome.edges_existing += 1;
            } else {
                graph.edges.insert(id, edge);
                outcome.edges_created += 1;
            }
        }

        Ok(outcome)
    }

    async fn clear_repository(&self, repo_id: &str, schema: &GraphSchema) -> StorageResult<ClearOutcome> {
        let mut graph = self.write()?;
        let mut outcome = ClearOutcome::default();
        let in_repo = |key: &NodeKey| key.repository.as_deref() == Some(repo_id);

        let edges_before = graph.edges.len();
        {
            let Graph { edges, owners, .. } = &mut *graph;
            edges.retain(|id, edge| {
                let remaining = owners.entry(id.clone()).or_default();
                remaining.remove(repo_id);
                let keep = !in_repo(&edge.from) && !in_repo(&edge.to) && !remaining.is_empty();
                if keep && edge.repository == repo_id {
                    if let Some(owner) = remaining.iter().next() {
                        edge.repository = owner.clone();
                    }
                }
                keep
            });
            owners.retain(|id, _| edges.contains_key(id));
        }
        outcome.edges_deleted = edges_before - graph.edges.len();

        let nodes_before = graph.nodes.len();
        graph.nodes.retain(|key, _| !in_repo(key));
        outcome.nodes_deleted = nodes_before - graph.nodes.len();

        let collectable = schema.shared_types(Retention::WhileReferenced);
        if !collectable.is_empty() {
            let Graph { nodes, edges, .. } = &mut *graph;
            let before = nodes.len();
            nodes.retain(|key, _| {
                !(key.is_shared()
                    && collectable.contains(&key.node_type)
                    && !edges.values().any(|e| e.touches(key)))
            });
            outcome.shared_deleted = before - nodes.len();
        }

        outcome.shared_retained = graph.nodes.keys().filter(|k| k.is_shared()).count();
        Ok(outcome)
    }

    async fn get_node(&self, key: &NodeKey) -> StorageResult<Option<StoredNode>> {
        Ok(self.read()?.nodes.get(key).cloned())
    }

    async fn find_nodes(&self, filter: &NodeFilter) -> StorageResult<Vec<StoredNode>> {
        let graph = self.read()?;
        let mut found: Vec<StoredNode> = graph
            .nodes
            .values()
            .filter(|n| filter.matches(n))
            .cloned()
            .collect();
        found.sort_by_cached_key(|n| n.key.id());
        if let Some(limit) = filter.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn edges(&self, filter: &EdgeFilter) -> StorageResult<Vec<StoredEdge>> {
        let graph = self.read()?;
        let mut found: Vec<StoredEdge> = graph
            .edges
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        found.sort_by_cached_key(|e| (e.from.id(), e.to.id(), e.rel_type.clone()));
        if let Some(limit) = filter.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn list_repositories(&self) -> StorageResult<Vec<RepositorySummary>> {
        let graph = self.read()?;
        let mut repos: BTreeMap<String, RepositorySummary> = BTreeMap::new();

        for key in graph.nodes.keys() {
            if let Some(repo) = &key.repository {
                let summary = repos.entry(repo.clone()).or_insert_with(|| RepositorySummary {
                    repo_id: repo.clone(),
                    ..Default::default()
                });
                summary.node_count += 1;
                *summary.nodes_by_type.entry(key.node_type.clone()).or_insert(0) += 1;
            }
        }
        for edge in graph.edges.values() {
            if let Some(summary) = repos.get_mut(&edge.repository) {
                summary.edge_count += 1;
            }
        }

        Ok(repos.into_values().collect())
    }

    async fn stats(&self, repo_id: Option<&str>) -> StorageResult<GraphStats> {
        let graph = self.read()?;
        let mut stats = GraphStats::default();

        for key in graph.nodes.keys() {
            if repo_id.is_none() || key.repository.as_deref() == repo_id {
                stats.node_count += 1;
                *stats.nodes_by_type.entry(key.node_type.clone()).or_insert(0) += 1;
            }
        }
        for edge in graph.edges.values() {
            if repo_id.is_none() || Some(edge.repository.as_str()) == repo_id {
                stats.edge_count += 1;
                *stats.edges_by_type.entry(edge.rel_type.clone()).or_insert(0) += 1;
            }
        }

        Ok(stats)
    }
}
