//! SQLite graph store

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use graphwright_core::{GraphSchema, NodeKey, Properties, Retention};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::{StorageError, StorageResult};
use crate::migration::{Migratable, Migration};
use crate::model::{
    BatchOutcome, ClearOutcome, EdgeFilter, GraphStats, NodeFilter, RepositorySummary,
    StoredEdge, StoredNode, WriteBatch,
};
use crate::traits::GraphStore;

/// SQLite graph store
///
/// Nodes are keyed by [`NodeKey::id`]; each batch runs in one transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate_to_latest()?;
        Ok(store)
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Database(format!("Lock error: {}", e)))
    }
}

impl Migratable for SqliteStore {
    fn schema_version(&self) -> StorageResult<u32> {
        let conn = self.conn()?;
        let version: Option<u32> =
            conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
        Ok(version.unwrap_or(0))
    }

    fn apply_migration(&self, migration: &Migration) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|e| StorageError::Migration(format!("v{}: {}", migration.version, e)))?;
        tx.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![migration.version],
        )?;
        tx.commit()?;
        Ok(())
    }
}

fn node_from_json(key: &str, properties: &str) -> StorageResult<StoredNode> {
    Ok(StoredNode {
        key: serde_json::from_str(key)?,
        properties: serde_json::from_str(properties)?,
    })
}

fn count(n: i64) -> usize {
    usize::try_from(n).unwrap_or(0)
}

#[async_trait]
impl GraphStore for SqliteStore {
    async fn initialize(&self) -> StorageResult<()> {
        self.migrate_to_latest()?;
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<bool> {
        let conn = self.conn()?;
        let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(one == 1)
    }

    async fn commit_batch(&self, batch: WriteBatch) -> StorageResult<BatchOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut outcome = BatchOutcome::default();

        {
            let mut select = tx.prepare_cached("SELECT properties FROM nodes WHERE id = ?1")?;
            let mut insert = tx.prepare_cached(
                "INSERT INTO nodes (id, node_type, repository, key, properties) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let mut update = tx.prepare_cached("UPDATE nodes SET properties = ?2 WHERE id = ?1")?;

            for node in &batch.nodes {
                let id = node.key.id();
                let existing: Option<String> =
                    select.query_row(params![id], |row| row.get(0)).optional()?;
                match existing {
                    Some(json) => {
                        let mut properties: Properties = serde_json::from_str(&json)?;
                        properties.extend(node.properties.clone());
                        update.execute(params![id, serde_json::to_string(&properties)?])?;
                        outcome.nodes_updated += 1;
                    }
                    None => {
                        insert.execute(params![
                            id,
                            node.key.node_type,
                            node.key.repository,
                            serde_json::to_string(&node.key)?,
                            serde_json::to_string(&node.properties)?,
                        ])?;
                        outcome.nodes_created += 1;
                    }
                }
            }

            let mut exists = tx.prepare_cached("SELECT 1 FROM nodes WHERE id = ?1")?;
            let mut insert_edge = tx.prepare_cached(
                "INSERT OR IGNORE INTO edges (from_id, to_id, rel_type, repository, from_key, to_key, properties)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            let mut insert_owner = tx.prepare_cached(
                "INSERT OR IGNORE INTO edge_owners (from_id, to_id, rel_type, repository) VALUES (?1, ?2, ?3, ?4)",
            )?;

            for edge in batch.edges {
                let from_id = edge.from.id();
                let to_id = edge.to.id();
                if !exists.exists(params![from_id])? || !exists.exists(params![to_id])? {
                    outcome.unresolved.push(edge);
                    continue;
                }
                let inserted = insert_edge.execute(params![
                    from_id,
                    to_id,
                    edge.rel_type,
                    edge.repository,
                    serde_json::to_string(&edge.from)?,
                    serde_json::to_string(&edge.to)?,
                    serde_json::to_string(&edge.properties)?,
                ])?;
                insert_owner.execute(params![from_id, to_id, edge.rel_type, edge.repository])?;
                if inserted == 1 {
                    outcome.edges_created += 1;
                } else {
                    outcome.edges_existing += 1;
                }
            }
        }

        tx.commit()
            .map_err(|e| StorageError::Transaction(e.to_string()))?;
        Ok(outcome)
    }

    async fn clear_repository(&self, repo_id: &str, schema: &GraphSchema) -> StorageResult<ClearOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        // An edge survives while another repository still declares it and
        // neither endpoint belongs to the cleared repository.
        tx.execute("DELETE FROM edge_owners WHERE repository = ?1", params![repo_id])?;
        let edges_deleted = tx.execute(
            "DELETE FROM edges WHERE from_id IN (SELECT id FROM nodes WHERE repository = ?1)
                OR to_id IN (SELECT id FROM nodes WHERE repository = ?1)
                OR NOT EXISTS (SELECT 1 FROM edge_owners o
                    WHERE o.from_id = edges.from_id AND o.to_id = edges.to_id AND o.rel_type = edges.rel_type)",
            params![repo_id],
        )?;
        tx.execute(
            "UPDATE edges SET repository = (SELECT MIN(o.repository) FROM edge_owners o
                WHERE o.from_id = edges.from_id AND o.to_id = edges.to_id AND o.rel_type = edges.rel_type)
             WHERE repository = ?1",
            params![repo_id],
        )?;
        tx.execute(
            "DELETE FROM edge_owners WHERE NOT EXISTS (SELECT 1 FROM edges e
                WHERE e.from_id = edge_owners.from_id AND e.to_id = edge_owners.to_id AND e.rel_type = edge_owners.rel_type)",
            [],
        )?;
        let nodes_deleted = tx.execute("DELETE FROM nodes WHERE repository = ?1", params![repo_id])?;

        let mut shared_deleted = 0;
        for node_type in schema.shared_types(Retention::WhileReferenced) {
            shared_deleted += tx.execute(
                "DELETE FROM nodes WHERE repository IS NULL AND node_type = ?1
                    AND NOT EXISTS (SELECT 1 FROM edges WHERE edges.from_id = nodes.id OR edges.to_id = nodes.id)",
                params![node_type],
            )?;
        }

        let shared_retained: i64 =
            tx.query_row("SELECT COUNT(*) FROM nodes WHERE repository IS NULL", [], |row| row.get(0))?;
        tx.commit()
            .map_err(|e| StorageError::Transaction(e.to_string()))?;

        Ok(ClearOutcome {
            nodes_deleted,
            edges_deleted,
            shared_deleted,
            shared_retained: count(shared_retained),
        })
    }

    async fn get_node(&self, key: &NodeKey) -> StorageResult<Option<StoredNode>> {
        let conn = self.conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT key, properties FROM nodes WHERE id = ?1",
                params![key.id()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(k, p)| node_from_json(&k, &p)).transpose()
    }

    async fn find_nodes(&self, filter: &NodeFilter) -> StorageResult<Vec<StoredNode>> {
        let conn = self.conn()?;
        let mut sql = String::from("SELECT key, properties FROM nodes WHERE 1 = 1");
        let mut args: Vec<String> = Vec::new();
        if let Some(node_type) = &filter.node_type {
            args.push(node_type.clone());
            sql.push_str(&format!(" AND node_type = ?{}", args.len()));
        }
        if let Some(repo) = &filter.repository {
            args.push(repo.clone());
            if filter.include_shared {
                sql.push_str(&format!(" AND (repository = ?{} OR repository IS NULL)", args.len()));
            } else {
                sql.push_str(&format!(" AND repository = ?{}", args.len()));
            }
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let limit = filter.limit.unwrap_or(usize::MAX);
        let mut found = Vec::new();
        for row in rows {
            let (key, properties) = row?;
            let node = node_from_json(&key, &properties)?;
            if filter.matches(&node) {
                found.push(node);
                if found.len() >= limit {
                    break;
                }
            }
        }
        Ok(found)
    }

    async fn edges(&self, filter: &EdgeFilter) -> StorageResult<Vec<StoredEdge>> {
        let conn = self.conn()?;
        let mut sql = String::from(
            "SELECT from_key, to_key, rel_type, repository, properties FROM edges WHERE 1 = 1",
        );
        let mut args: Vec<String> = Vec::new();
        if let Some(from) = &filter.from {
            args.push(from.id());
            sql.push_str(&format!(" AND from_id = ?{}", args.len()));
        }
        if let Some(to) = &filter.to {
            args.push(to.id());
            sql.push_str(&format!(" AND to_id = ?{}", args.len()));
        }
        if !filter.rel_types.is_empty() {
            let mut slots = Vec::new();
            for rel_type in &filter.rel_types {
                args.push(rel_type.clone());
                slots.push(format!("?{}", args.len()));
            }
            sql.push_str(&format!(" AND rel_type IN ({})", slots.join(", ")));
        }
        if let Some(repo) = &filter.repository {
            args.push(repo.clone());
            sql.push_str(&format!(" AND repository = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY from_id, to_id, rel_type");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut edges = Vec::new();
        for row in rows {
            let (from, to, rel_type, repository, properties) = row?;
            edges.push(StoredEdge {
                from: serde_json::from_str(&from)?,
                to: serde_json::from_str(&to)?,
                rel_type,
                repository,
                properties: serde_json::from_str(&properties)?,
            });
        }
        Ok(edges)
    }

    async fn list_repositories(&self) -> StorageResult<Vec<RepositorySummary>> {
        let conn = self.conn()?;
        let mut repos: BTreeMap<String, RepositorySummary> = BTreeMap::new();

        let mut stmt = conn.prepare(
            "SELECT repository, node_type, COUNT(*) FROM nodes
             WHERE repository IS NOT NULL GROUP BY repository, node_type",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
        })?;
        for row in rows {
            let (repo, node_type, n) = row?;
            let summary = repos.entry(repo.clone()).or_insert_with(|| RepositorySummary {
                repo_id: repo,
                ..Default::default()
            });
            summary.node_count += count(n);
            summary.nodes_by_type.insert(node_type, count(n));
        }

        let mut stmt = conn.prepare("SELECT repository, COUNT(*) FROM edges GROUP BY repository")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (repo, n) = row?;
            if let Some(summary) = repos.get_mut(&repo) {
                summary.edge_count = count(n);
            }
        }

        Ok(repos.into_values().collect())
    }

    async fn stats(&self, repo_id: Option<&str>) -> StorageResult<GraphStats> {
        let conn = self.conn()?;
        let mut stats = GraphStats::default();
        let args: Vec<&str> = repo_id.into_iter().collect();
        let scope = if repo_id.is_some() { " WHERE repository = ?1" } else { "" };

        let mut stmt = conn.prepare(&format!(
            "SELECT node_type, COUNT(*) FROM nodes{} GROUP BY node_type",
            scope
        ))?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (node_type, n) = row?;
            stats.node_count += count(n);
            stats.nodes_by_type.insert(node_type, count(n));
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT rel_type, COUNT(*) FROM edges{} GROUP BY rel_type",
            scope
        ))?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (rel_type, n) = row?;
            stats.edge_count += count(n);
            stats.edges_by_type.insert(rel_type, count(n));
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::tests::{edge, file, role};
    use crate::migration::CURRENT_VERSION;
    use graphwright_core::Scalar;

    #[tokio::test]
    async fn test_sqlite_migrates_on_open() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), CURRENT_VERSION);
        assert!(store.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_merge_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        let a = file("web", "a.yml");
        let b = file("web", "b.yml");
        let batch = WriteBatch {
            nodes: vec![a.clone(), b.clone()],
            edges: vec![edge(&a, "INCLUDES", &b, "web")],
        };

        let first = store.commit_batch(batch.clone()).await.unwrap();
        assert_eq!((first.nodes_created, first.edges_created), (2, 1));
        let second = store.commit_batch(batch).await.unwrap();
        assert_eq!((second.nodes_updated, second.edges_existing), (2, 1));

        let stats = store.stats(Some("web")).await.unwrap();
        assert_eq!(stats.node_count, 2);
        assert_eq!(stats.edges_by_type.get("INCLUDES"), Some(&1));
    }

    #[tokio::test]
    async fn test_sqlite_property_merge() {
        let store = SqliteStore::in_memory().unwrap();
        let mut first = file("web", "a.yml");
        first.properties.insert("size".into(), Scalar::Int(1));
        first.properties.insert("name".into(), Scalar::from("a.yml"));
        let mut second = file("web", "a.yml");
        second.properties.insert("size".into(), Scalar::Int(2));

        store.commit_batch(WriteBatch { nodes: vec![first.clone()], edges: vec![] }).await.unwrap();
        store.commit_batch(WriteBatch { nodes: vec![second], edges: vec![] }).await.unwrap();

        let node = store.get_node(&first.key).await.unwrap().unwrap();
        assert_eq!(node.get("size"), Some(&Scalar::Int(2)));
        assert_eq!(node.get_str("name"), Some("a.yml"));
    }

    #[tokio::test]
    async fn test_sqlite_clear_keeps_shared_roles() {
        let store = SqliteStore::in_memory().unwrap();
        let schema = GraphSchema::combined().unwrap();
        let web = file("web", "site.yml");
        let db = file("db", "site.yml");
        let nginx = role("nginx");
        store
            .commit_batch(WriteBatch {
                nodes: vec![web.clone(), db.clone(), nginx.clone()],
                edges: vec![edge(&web, "USES_ROLE", &nginx, "web"), edge(&db, "USES_ROLE", &nginx, "db")],
            })
            .await
            .unwrap();

        let outcome = store.clear_repository("web", &schema).await.unwrap();
        assert_eq!(outcome.nodes_deleted, 1);
        assert_eq!(outcome.edges_deleted, 1);
        assert_eq!(outcome.shared_retained, 1);

        let repos = store.list_repositories().await.unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].repo_id, "db");
        assert_eq!(repos[0].edge_count, 1);
        assert!(store.get_node(&nginx.key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sqlite_clear_keeps_shared_edges_other_repositories_declare() {
        let store = SqliteStore::in_memory().unwrap();
        let schema = GraphSchema::combined().unwrap();
        let common = role("common");
        let base = role("base");
        let extra = role("extra");
        let depends = |repo: &str| edge(&common, "DEPENDS_ON", &base, repo);
        store
            .commit_batch(WriteBatch {
                nodes: vec![common.clone(), base.clone(), extra.clone()],
                edges: vec![depends("a"), edge(&common, "DEPENDS_ON", &extra, "a")],
            })
            .await
            .unwrap();
        store
            .commit_batch(WriteBatch { nodes: vec![], edges: vec![depends("b")] })
            .await
            .unwrap();

        let outcome = store.clear_repository("a", &schema).await.unwrap();
        assert_eq!(outcome.edges_deleted, 1);

        let left = store
            .edges(&EdgeFilter::outgoing(common.key.clone()).rel_type("DEPENDS_ON"))
            .await
            .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].to, base.key);
        assert_eq!(left[0].repository, "b");

        store.clear_repository("b", &schema).await.unwrap();
        assert_eq!(store.stats(None).await.unwrap().edge_count, 0);
    }

    #[tokio::test]
    async fn test_sqlite_edge_filters() {
        let store = SqliteStore::in_memory().unwrap();
        let a = file("web", "a.yml");
        let b = file("web", "b.yml");
        let c = file("web", "c.yml");
        store
            .commit_batch(WriteBatch {
                nodes: vec![a.clone(), b.clone(), c.clone()],
                edges: vec![
                    edge(&a, "INCLUDES", &b, "web"),
                    edge(&a, "IMPORTS", &c, "web"),
                    edge(&b, "INCLUDES", &c, "web"),
                ],
            })
            .await
            .unwrap();

        let out = store
            .edges(&EdgeFilter::outgoing(a.key.clone()).rel_type("INCLUDES"))
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, b.key);

        let into_c = store.incoming(&c.key, &[]).await.unwrap();
        assert_eq!(into_c.len(), 2);
    }

    #[tokio::test]
    async fn test_sqlite_persists_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("graph.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .commit_batch(WriteBatch { nodes: vec![file("web", "a.yml")], edges: vec![] })
                .await
                .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let found = store
            .find_nodes(&NodeFilter::of_type("File").with_property("path", "a.yml"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }
}
