//! Graphwright Storage - graph store backends
//!
//! A graph store holds keyed nodes and typed edges for any number of
//! repositories. Writes arrive as batches that merge by node key; reads
//! are filtered lookups plus a small read-only pattern query language.

#![allow(clippy::result_large_err)]

pub mod error;
pub mod memory;
pub mod migration;
pub mod model;
pub mod protected;
pub mod query;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use migration::{Migratable, Migration, CURRENT_VERSION};
pub use model::{
    BatchOutcome, ClearOutcome, EdgeFilter, GraphStats, NodeFilter, RepositorySummary,
    StoredEdge, StoredNode, WriteBatch,
};
pub use protected::ProtectedStore;
pub use query::{PatternQuery, QueryResult, QueryRunner};
pub use traits::GraphStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
