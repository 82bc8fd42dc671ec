//! Schema version tracking for persistent graph stores

use crate::error::{StorageError, StorageResult};

/// Latest schema version known to this build
pub const CURRENT_VERSION: u32 = 3;

/// One forward-only schema step
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Nodes and edges keyed by canonical node id",
        sql: r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                node_type TEXT NOT NULL,
                repository TEXT,
                key TEXT NOT NULL,
                properties TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS edges (
                from_id TEXT NOT NULL,
                to_id TEXT NOT NULL,
                rel_type TEXT NOT NULL,
                repository TEXT NOT NULL,
                from_key TEXT NOT NULL,
                to_key TEXT NOT NULL,
                properties TEXT NOT NULL,
                PRIMARY KEY (from_id, to_id, rel_type)
            );

            CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_id);
        "#,
    },
    Migration {
        version: 2,
        description: "Repository and type indexes for clearing and listing",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_nodes_repository ON nodes(repository, node_type);
            CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(node_type);
            CREATE INDEX IF NOT EXISTS idx_edges_repository ON edges(repository, rel_type);
        "#,
    },
    Migration {
        version: 3,
        description: "Per-repository edge ownership",
        sql: r#"
            CREATE TABLE IF NOT EXISTS edge_owners (
                from_id TEXT NOT NULL,
                to_id TEXT NOT NULL,
                rel_type TEXT NOT NULL,
                repository TEXT NOT NULL,
                PRIMARY KEY (from_id, to_id, rel_type, repository)
            );

            CREATE INDEX IF NOT EXISTS idx_edge_owners_repository ON edge_owners(repository);

            INSERT OR IGNORE INTO edge_owners (from_id, to_id, rel_type, repository)
                SELECT from_id, to_id, rel_type, repository FROM edges;
        "#,
    },
];

pub fn migration(version: u32) -> Option<&'static Migration> {
    MIGRATIONS.iter().find(|m| m.version == version)
}

/// Implemented by stores that persist a schema
pub trait Migratable {
    /// Version recorded in the store, 0 for a fresh store
    fn schema_version(&self) -> StorageResult<u32>;

    /// Apply one migration and record its version in the same transaction
    fn apply_migration(&self, migration: &Migration) -> StorageResult<()>;

    /// Apply every migration between the stored version and `target`.
    /// Returns the version the store ends at.
    fn migrate_to(&self, target: u32) -> StorageResult<u32> {
        let current = self.schema_version()?;

        if current == target {
            tracing::debug!("Schema already at version {}", target);
            return Ok(current);
        }

        if current > target {
            tracing::warn!(
                "Schema version {} is newer than this build supports ({}). Downgrades not supported.",
                current,
                target
            );
            return Ok(current);
        }

        tracing::info!("Migrating graph schema from v{} to v{}", current, target);
        for version in (current + 1)..=target {
            let step = migration(version)
                .ok_or_else(|| StorageError::Migration(format!("no migration for version {}", version)))?;
            self.apply_migration(step)?;
            tracing::info!("Applied schema v{}: {}", version, step.description);
        }

        Ok(target)
    }

    fn migrate_to_latest(&self) -> StorageResult<u32> {
        self.migrate_to(CURRENT_VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_migrations_are_contiguous() {
        for (i, m) in MIGRATIONS.iter().enumerate() {
            assert_eq!(m.version as usize, i + 1);
        }
        assert_eq!(MIGRATIONS.last().map(|m| m.version), Some(CURRENT_VERSION));
    }

    struct Recorder {
        version: RefCell<u32>,
        applied: RefCell<Vec<u32>>,
    }

    impl Migratable for Recorder {
        fn schema_version(&self) -> StorageResult<u32> {
            Ok(*self.version.borrow())
        }

        fn apply_migration(&self, migration: &Migration) -> StorageResult<()> {
            self.applied.borrow_mut().push(migration.version);
            *self.version.borrow_mut() = migration.version;
            Ok(())
        }
    }

    #[test]
    fn test_migrate_applies_pending_steps_only() {
        let store = Recorder {
            version: RefCell::new(1),
            applied: RefCell::new(Vec::new()),
        };
        assert_eq!(store.migrate_to_latest().unwrap(), CURRENT_VERSION);
        assert_eq!(*store.applied.borrow(), vec![2, 3]);

        assert_eq!(store.migrate_to_latest().unwrap(), CURRENT_VERSION);
        assert_eq!(store.applied.borrow().len(), 2);
    }
}
