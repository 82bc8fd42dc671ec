//! Graph store wrapped in a circuit breaker

use std::sync::Arc;

use async_trait::async_trait;
use graphwright_core::{BreakerConfig, BreakerSnapshot, CircuitBreaker, GraphSchema, NodeKey};

use crate::error::StorageResult;
use crate::model::{
    BatchOutcome, ClearOutcome, EdgeFilter, GraphStats, NodeFilter, RepositorySummary,
    StoredEdge, StoredNode, WriteBatch,
};
use crate::traits::GraphStore;

/// Routes every store call through one shared breaker.
///
/// While the breaker is open calls fail with
/// [`StorageError::CircuitOpen`](crate::StorageError::CircuitOpen) without
/// reaching the store. Store errors count toward the failure threshold and
/// are returned unchanged.
pub struct ProtectedStore<S> {
    inner: S,
    breaker: Arc<CircuitBreaker>,
}

impl<S: GraphStore> ProtectedStore<S> {
    pub fn new(inner: S, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    /// Wrap with a breaker named `graph_store` using the graph-store preset
    pub fn with_default_breaker(inner: S) -> Self {
        Self::new(
            inner,
            Arc::new(CircuitBreaker::new("graph_store", BreakerConfig::graph_store())),
        )
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: GraphStore> GraphStore for ProtectedStore<S> {
    async fn initialize(&self) -> StorageResult<()> {
        Ok(self.breaker.call(|| self.inner.initialize()).await?)
    }

    async fn health_check(&self) -> StorageResult<bool> {
        Ok(self.breaker.call(|| self.inner.health_check()).await?)
    }

    async fn commit_batch(&self, batch: WriteBatch) -> StorageResult<BatchOutcome> {
        Ok(self.breaker.call(|| self.inner.commit_batch(batch)).await?)
    }

    async fn clear_repository(&self, repo_id: &str, schema: &GraphSchema) -> StorageResult<ClearOutcome> {
        Ok(self
            .breaker
            .call(|| self.inner.clear_repository(repo_id, schema))
            .await?)
    }

    async fn get_node(&self, key: &NodeKey) -> StorageResult<Option<StoredNode>> {
        Ok(self.breaker.call(|| self.inner.get_node(key)).await?)
    }

    async fn find_nodes(&self, filter: &NodeFilter) -> StorageResult<Vec<StoredNode>> {
        Ok(self.breaker.call(|| self.inner.find_nodes(filter)).await?)
    }

    async fn edges(&self, filter: &EdgeFilter) -> StorageResult<Vec<StoredEdge>> {
        Ok(self.breaker.call(|| self.inner.edges(filter)).await?)
    }

    async fn list_repositories(&self) -> StorageResult<Vec<RepositorySummary>> {
        Ok(self.breaker.call(|| self.inner.list_repositories()).await?)
    }

    async fn stats(&self, repo_id: Option<&str>) -> StorageResult<GraphStats> {
        Ok(self.breaker.call(|| self.inner.stats(repo_id)).await?)
    }
}
