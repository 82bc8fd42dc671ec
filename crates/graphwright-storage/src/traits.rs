//! Graph store trait definition

use async_trait::async_trait;
use graphwright_core::{GraphSchema, NodeKey};

use crate::error::StorageResult;
use crate::model::{
    BatchOutcome, ClearOutcome, EdgeFilter, GraphStats, NodeFilter, RepositorySummary,
    StoredEdge, StoredNode, WriteBatch,
};

/// Trait for graph store implementations
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Prepare the store (create tables, run migrations)
    async fn initialize(&self) -> StorageResult<()>;

    /// Health check
    async fn health_check(&self) -> StorageResult<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply one batch atomically.
    ///
    /// Nodes merge by key: a new key creates a node, a known key has its
    /// properties overwritten by the incoming values. Edges are then
    /// inserted when both endpoints exist and no edge with the same
    /// `(from, to, rel_type)` does. Edges with a missing endpoint are
    /// returned in [`BatchOutcome::unresolved`] and not written.
    async fn commit_batch(&self, batch: WriteBatch) -> StorageResult<BatchOutcome>;

    /// Remove a repository's nodes and every edge written by it or
    /// touching its nodes. Shared nodes follow their type's retention.
    async fn clear_repository(&self, repo_id: &str, schema: &GraphSchema) -> StorageResult<ClearOutcome>;

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_node(&self, key: &NodeKey) -> StorageResult<Option<StoredNode>>;

    /// Nodes matching the filter, ordered by key id
    async fn find_nodes(&self, filter: &NodeFilter) -> StorageResult<Vec<StoredNode>>;

    /// Edges matching the filter, ordered by endpoint ids then type
    async fn edges(&self, filter: &EdgeFilter) -> StorageResult<Vec<StoredEdge>>;

    async fn list_repositories(&self) -> StorageResult<Vec<RepositorySummary>>;

    /// Counts for one repository, or for the whole store
    async fn stats(&self, repo_id: Option<&str>) -> StorageResult<GraphStats>;

    // ─────────────────────────────────────────────────────────────────────────
    // Derived lookups
    // ─────────────────────────────────────────────────────────────────────────

    /// Edge targets reached from `key`, paired with the edge
    async fn outgoing(
        &self,
        key: &NodeKey,
        rel_types: &[&str],
    ) -> StorageResult<Vec<(StoredEdge, StoredNode)>> {
        let filter = EdgeFilter::outgoing(key.clone()).rel_types(rel_types.iter().copied());
        let mut out = Vec::new();
        for edge in self.edges(&filter).await? {
            if let Some(node) = self.get_node(&edge.to).await? {
                out.push((edge, node));
            }
        }
        Ok(out)
    }

    /// Edge sources reaching `key`, paired with the edge
    async fn incoming(
        &self,
        key: &NodeKey,
        rel_types: &[&str],
    ) -> StorageResult<Vec<(StoredEdge, StoredNode)>> {
        let filter = EdgeFilter::incoming(key.clone()).rel_types(rel_types.iter().copied());
        let mut out = Vec::new();
        for edge in self.edges(&filter).await? {
            if let Some(node) = self.get_node(&edge.from).await? {
                out.push((edge, node));
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl<T: GraphStore + ?Sized> GraphStore for std::sync::Arc<T> {
    async fn initialize(&self) -> StorageResult<()> {
        (**self).initialize().await
    }

    async fn health_check(&self) -> StorageResult<bool> {
        (**self).health_check().await
    }

    async fn commit_batch(&self, batch: WriteBatch) -> StorageResult<BatchOutcome> {
        (**self).commit_batch(batch).await
    }

    async fn clear_repository(&self, repo_id: &str, schema: &GraphSchema) -> StorageResult<ClearOutcome> {
        (**self).clear_repository(repo_id, schema).await
    }

    async fn get_node(&self, key: &NodeKey) -> StorageResult<Option<StoredNode>> {
        (**self).get_node(key).await
    }

    async fn find_nodes(&self, filter: &NodeFilter) -> StorageResult<Vec<StoredNode>> {
        (**self).find_nodes(filter).await
    }

    async fn edges(&self, filter: &EdgeFilter) -> StorageResult<Vec<StoredEdge>> {
        (**self).edges(filter).await
    }

    async fn list_repositories(&self) -> StorageResult<Vec<RepositorySummary>> {
        (**self).list_repositories().await
    }

    async fn stats(&self, repo_id: Option<&str>) -> StorageResult<GraphStats> {
        (**self).stats(repo_id).await
    }
}
