//! Graph builder: validation, batching and two-phase edge resolution
//!
//! The builder is the single consumer of the coordinator's queue. Every
//! record is validated against the schema and turned into store keys; valid
//! records are buffered and committed in batches that merge by key.
//!
//! Edges whose endpoints are not in the store yet come back from the commit
//! as unresolved. They wait in a pending set and are re-sent with the batch
//! following the commit of either endpoint, and once more at the end of the
//! run since another build may have written the endpoint meanwhile.
//! Whatever is still pending after that is reported, never dropped silently.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use graphwright_core::{
    BuildReport, EntityRecord, GraphSchema, NodeKey, Rejection, RelationshipRecord,
    RepositoryContext, UnresolvedRelationship,
};
use graphwright_storage::{GraphStore, StoredEdge, StoredNode, WriteBatch};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::extract::Extraction;
use crate::parse::SyntaxError;

/// What a worker hands to the builder for one file
#[derive(Debug)]
pub enum FileOutcome {
    Extracted {
        rel_path: String,
        extraction: Extraction,
        parse_errors: Vec<SyntaxError>,
    },
    /// The file could not be read
    Failed { rel_path: String, error: String },
    /// Dispatched after cancellation
    Skipped { rel_path: String },
}

pub struct GraphBuilder {
    store: Arc<dyn GraphStore>,
    schema: Arc<GraphSchema>,
    repo_id: String,
    batch_size: usize,
    buffer: WriteBatch,
    /// Keys committed during this run
    committed: HashSet<NodeKey>,
    pending: Vec<StoredEdge>,
    report: BuildReport,
}

impl GraphBuilder {
    pub fn new(
        store: Arc<dyn GraphStore>,
        schema: Arc<GraphSchema>,
        ctx: &RepositoryContext,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            schema,
            repo_id: ctx.repo_id.clone(),
            batch_size: batch_size.max(1),
            buffer: WriteBatch::default(),
            committed: HashSet::new(),
            pending: Vec::new(),
            report: BuildReport::new(ctx),
        }
    }

    pub fn report(&self) -> &BuildReport {
        &self.report
    }

    /// Records waiting in the buffer
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Edges waiting for an endpoint
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn record_skipped(&mut self, rel_path: &str) {
        tracing::debug!("Skipped '{}'", rel_path);
        self.report.files_skipped += 1;
    }

    pub fn record_file_error(&mut self, rel_path: &str, error: &str) {
        tracing::debug!("Failed '{}': {}", rel_path, error);
        self.report.record_file_error(rel_path, error);
    }

    /// Drain the queue until it closes or the run is cancelled
    pub async fn consume(
        mut self,
        mut rx: mpsc::Receiver<FileOutcome>,
        flush_interval: Duration,
        cancel: CancellationToken,
    ) -> BuildReport {
        let mut ticker = tokio::time::interval(flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancel(),
                outcome = rx.recv() => match outcome {
                    Some(outcome) => self.accept(outcome).await,
                    None => break,
                },
                _ = ticker.tick() => {
                    if !self.buffer.is_empty() {
                        self.flush().await;
                    }
                }
            }
        }

        self.finish().await
    }

    /// Take one file's outcome; flushes when the buffer is full
    pub async fn accept(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Extracted {
                rel_path,
                extraction,
                parse_errors,
            } => {
                self.report.files_processed += 1;
                if !parse_errors.is_empty() {
                    tracing::debug!("{} syntax errors in '{}'", parse_errors.len(), rel_path);
                    self.report.parse_errors.insert(rel_path.clone(), parse_errors.len());
                }
                for failure in extraction.soft_failures {
                    self.report.record_soft_failure(failure);
                }
                for entity in extraction.entities {
                    self.add_entity(&rel_path, entity);
                }
                for relationship in extraction.relationships {
                    self.add_relationship(&rel_path, relationship);
                }
            }
            FileOutcome::Failed { rel_path, error } => self.record_file_error(&rel_path, &error),
            FileOutcome::Skipped { rel_path } => self.record_skipped(&rel_path),
        }

        if self.buffer.len() >= self.batch_size {
            self.flush().await;
        }
    }

    pub fn add_entity(&mut self, file: &str, record: EntityRecord) {
        *self
            .report
            .entities_by_type
            .entry(record.node_type.clone())
            .or_default() += 1;

        if let Err(e) = self.schema.validate_entity(&record) {
            self.report.record_rejection(Rejection {
                file: file.to_string(),
                record_type: record.node_type.clone(),
                reason: e.to_string(),
            });
            return;
        }

        let key = self.schema.entity_key(&record, &self.repo_id);
        self.buffer.nodes.push(StoredNode::new(key, record.properties));
    }

    pub fn add_relationship(&mut self, file: &str, record: RelationshipRecord) {
        *self
            .report
            .relationships_by_type
            .entry(record.rel_type.clone())
            .or_default() += 1;

        if let Err(e) = self.schema.validate_relationship(&record) {
            self.report.record_rejection(Rejection {
                file: file.to_string(),
                record_type: record.rel_type.clone(),
                reason: e.to_string(),
            });
            return;
        }

        self.buffer.edges.push(StoredEdge {
            from: self.schema.ref_key(&record.from, &self.repo_id),
            to: self.schema.ref_key(&record.to, &self.repo_id),
            rel_type: record.rel_type,
            repository: self.repo_id.clone(),
            properties: record.properties,
        });
    }

    /// Commit the buffer as one batch.
    ///
    /// A failed commit loses the batch: its records are counted in the
    /// report and the run continues.
    pub async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.buffer);
        let size = batch.len();
        let keys: Vec<NodeKey> = batch.nodes.iter().map(|n| n.key.clone()).collect();

        let outcome = match self.store.commit_batch(batch).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("Batch commit failed ({} records): {}", size, e);
                self.report.records_failed += size;
                self.report.commit_failures.push(e.to_string());
                return;
            }
        };

        self.report.nodes_created += outcome.nodes_created;
        self.report.nodes_updated += outcome.nodes_updated;
        self.report.relationships_created += outcome.edges_created;
        self.report.relationships_existing += outcome.edges_existing;

        let newly: HashSet<NodeKey> = keys
            .into_iter()
            .filter(|k| !self.committed.contains(k))
            .collect();

        let waiting = std::mem::take(&mut self.pending);
        let (ready, still_waiting): (Vec<_>, Vec<_>) = waiting
            .into_iter()
            .partition(|e| newly.contains(&e.from) || newly.contains(&e.to));
        self.pending = still_waiting;
        self.pending.extend(outcome.unresolved);
        self.buffer.edges.extend(ready);
        self.committed.extend(newly);

        tracing::debug!(
            "Committed {} records, {} edges pending, {} carried over",
            size,
            self.pending.len(),
            self.buffer.edges.len()
        );
    }

    /// Final flushes and sweep, then the report
    pub async fn finish(mut self) -> BuildReport {
        // edge-only batches create no keys, so this settles within a few rounds
        while !self.buffer.is_empty() {
            self.flush().await;
        }
        if !self.pending.is_empty() {
            tracing::debug!("Retrying {} pending edges", self.pending.len());
            let waiting = std::mem::take(&mut self.pending);
            self.buffer.edges.extend(waiting);
            self.flush().await;
        }
        for edge in std::mem::take(&mut self.pending) {
            self.report.record_unresolved(unresolved(&edge));
        }
        self.report
    }

    /// Discard the buffer; pending edges are reported unresolved
    pub fn cancel(mut self) -> BuildReport {
        let discarded = self.buffer.len();
        if discarded > 0 {
            tracing::info!("Build cancelled, discarding {} buffered records", discarded);
        }
        self.buffer = WriteBatch::default();
        for edge in std::mem::take(&mut self.pending) {
            self.report.record_unresolved(unresolved(&edge));
        }
        self.report.cancelled = true;
        self.report
    }
}

fn unresolved(edge: &StoredEdge) -> UnresolvedRelationship {
    UnresolvedRelationship {
        from: edge.from.id(),
        rel_type: edge.rel_type.clone(),
        to: edge.to.id(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use graphwright_core::{GraphSchema, NodeRef, RepoType};
    use graphwright_storage::{
        BatchOutcome, ClearOutcome, EdgeFilter, GraphStats, MemoryStore, NodeFilter,
        RepositorySummary, StorageError, StorageResult,
    };

    fn ctx(repo: &str) -> RepositoryContext {
        RepositoryContext::new(repo, RepoType::Ansible).unwrap()
    }

    fn builder(store: Arc<dyn GraphStore>, batch_size: usize) -> GraphBuilder {
        let schema = Arc::new(GraphSchema::combined().unwrap());
        GraphBuilder::new(store, schema, &ctx("infra"), batch_size)
    }

    fn file(path: &str) -> EntityRecord {
        EntityRecord::keyed("File", [("path", path)])
    }

    fn playbook(path: &str) -> EntityRecord {
        EntityRecord::keyed("Playbook", [("path", path)])
    }

    fn in_file(path: &str) -> RelationshipRecord {
        RelationshipRecord::new(
            NodeRef::new("Playbook").with("path", path),
            "IN_FILE",
            NodeRef::new("File").with("path", path),
        )
    }

    #[tokio::test]
    async fn test_edge_before_target_resolves_in_later_batch() {
        let store = Arc::new(MemoryStore::new());
        let mut b = builder(store.clone(), 100);

        b.add_entity("site.yml", playbook("site.yml"));
        b.add_relationship("site.yml", in_file("site.yml"));
        b.flush().await;
        assert_eq!(b.pending(), 1);

        b.add_entity("site.yml", file("site.yml"));
        b.flush().await;
        assert_eq!(b.pending(), 0);
        assert_eq!(b.buffered(), 1);

        let report = b.finish().await;
        assert_eq!(report.relationships_created, 1);
        assert_eq!(report.unresolved_count, 0);
        assert_eq!(store.stats(Some("infra")).await.unwrap().edge_count, 1);
    }

    #[tokio::test]
    async fn test_pending_edge_resolves_against_endpoint_written_elsewhere() {
        let store = Arc::new(MemoryStore::new());
        let mut b = builder(store.clone(), 100);
        b.add_entity("site.yml", playbook("site.yml"));
        b.add_relationship("site.yml", in_file("site.yml"));
        b.flush().await;
        assert_eq!(b.pending(), 1);

        let schema = GraphSchema::combined().unwrap();
        let target = file("site.yml");
        let node = StoredNode::new(schema.entity_key(&target, "infra"), target.properties);
        store
            .commit_batch(WriteBatch { nodes: vec![node], edges: vec![] })
            .await
            .unwrap();

        let report = b.finish().await;
        assert_eq!(report.unresolved_count, 0);
        assert_eq!(report.relationships_created, 1);
        assert_eq!(store.stats(Some("infra")).await.unwrap().edge_count, 1);
    }

    #[tokio::test]
    async fn test_missing_target_is_reported_unresolved() {
        let store = Arc::new(MemoryStore::new());
        let mut b = builder(store, 100);
        b.add_entity("site.yml", playbook("site.yml"));
        b.add_relationship("site.yml", in_file("site.yml"));
        let report = b.finish().await;

        assert_eq!(report.unresolved_count, 1);
        assert_eq!(report.unresolved[0].rel_type, "IN_FILE");
        assert!(report.unresolved[0].to.contains("site.yml"));
        assert_eq!(report.relationships_created, 0);
    }

    #[tokio::test]
    async fn test_invalid_records_are_rejected_not_buffered() {
        let store = Arc::new(MemoryStore::new());
        let mut b = builder(store, 100);
        b.add_entity("x.yml", EntityRecord::keyed("Spaceship", [("path", "x")]));
        b.add_entity("x.yml", EntityRecord::keyed("File", [("path", "")]));
        b.add_relationship(
            "x.yml",
            RelationshipRecord::new(
                NodeRef::new("File").with("path", "x.yml"),
                "HAS_PLAY",
                NodeRef::new("File").with("path", "y.yml"),
            ),
        );
        b.add_entity("x.yml", file("x.yml"));

        assert_eq!(b.buffered(), 1);
        let report = b.finish().await;
        assert_eq!(report.rejected_count, 3);
        assert_eq!(report.rejected[0].record_type, "Spaceship");
        assert_eq!(report.nodes_created, 1);
        assert_eq!(report.entities_by_type.get("File"), Some(&2));
    }

    #[tokio::test]
    async fn test_accept_flushes_at_batch_size() {
        let store = Arc::new(MemoryStore::new());
        let mut b = builder(store.clone(), 2);
        let mut extraction = Extraction::new();
        extraction.entity(file("a.yml"));
        extraction.entity(file("b.yml"));

        b.accept(FileOutcome::Extracted {
            rel_path: "a.yml".into(),
            extraction,
            parse_errors: vec![],
        })
        .await;
        assert_eq!(b.buffered(), 0);
        assert_eq!(store.stats(None).await.unwrap().node_count, 2);

        b.accept(FileOutcome::Failed {
            rel_path: "c.yml".into(),
            error: "permission denied".into(),
        })
        .await;
        let report = b.finish().await;
        assert_eq!(report.files_processed, 1);
        assert_eq!(report.files_failed, 1);
    }

    #[tokio::test]
    async fn test_cancel_discards_buffer() {
        let store = Arc::new(MemoryStore::new());
        let mut b = builder(store.clone(), 100);
        b.add_entity("a.yml", file("a.yml"));
        let report = b.cancel();

        assert!(report.cancelled);
        assert_eq!(report.nodes_created, 0);
        assert_eq!(store.stats(None).await.unwrap().node_count, 0);
    }

    #[tokio::test]
    async fn test_consume_flushes_on_interval() {
        let store = Arc::new(MemoryStore::new());
        let b = builder(store.clone(), 1000);
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(b.consume(rx, Duration::from_millis(10), cancel.clone()));

        let mut extraction = Extraction::new();
        extraction.entity(file("a.yml"));
        tx.send(FileOutcome::Extracted {
            rel_path: "a.yml".into(),
            extraction,
            parse_errors: vec![],
        })
        .await
        .unwrap();

        let mut flushed = false;
        for _ in 0..100 {
            if store.stats(None).await.unwrap().node_count == 1 {
                flushed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(flushed);

        drop(tx);
        let report = handle.await.unwrap();
        assert!(!report.cancelled);
        assert_eq!(report.nodes_created, 1);
    }

    struct FailingStore;

    #[async_trait]
    impl GraphStore for FailingStore {
        async fn initialize(&self) -> StorageResult<()> {
            Ok(())
        }

        async fn health_check(&self) -> StorageResult<bool> {
            Ok(true)
        }

        async fn commit_batch(&self, _batch: WriteBatch) -> StorageResult<BatchOutcome> {
            Err(StorageError::Database("disk full".into()))
        }

        async fn clear_repository(&self, _repo_id: &str, _schema: &GraphSchema) -> StorageResult<ClearOutcome> {
            Ok(ClearOutcome::default())
        }

        async fn get_node(&self, _key: &NodeKey) -> StorageResult<Option<StoredNode>> {
            Ok(None)
        }

        async fn find_nodes(&self, _filter: &NodeFilter) -> StorageResult<Vec<StoredNode>> {
            Ok(vec![])
        }

        async fn edges(&self, _filter: &EdgeFilter) -> StorageResult<Vec<StoredEdge>> {
            Ok(vec![])
        }

        async fn list_repositories(&self) -> StorageResult<Vec<RepositorySummary>> {
            Ok(vec![])
        }

        async fn stats(&self, _repo_id: Option<&str>) -> StorageResult<GraphStats> {
            Ok(GraphStats::default())
        }
    }

    #[tokio::test]
    async fn test_commit_failure_is_counted() {
        let mut b = builder(Arc::new(FailingStore), 100);
        b.add_entity("a.yml", file("a.yml"));
        b.add_entity("b.yml", file("b.yml"));
        let report = b.finish().await;

        assert_eq!(report.records_failed, 2);
        assert_eq!(report.commit_failures.len(), 1);
        assert!(report.commit_failures[0].contains("disk full"));
    }
}
