//! Graphwright Ingest - from source files to a graph
//!
//! Files are enumerated, parsed and run through the extractor for the
//! repository's flavor by a bounded worker pool. The records flow through
//! one queue into the graph builder, which validates, batches and commits
//! them to a [`GraphStore`](graphwright_storage::GraphStore).

pub mod builder;
pub mod config;
pub mod coordinator;
pub mod detect;
pub mod error;
pub mod extract;
pub mod parse;
pub mod pipeline;
pub mod walk;

pub use builder::{FileOutcome, GraphBuilder};
pub use config::IngestConfig;
pub use coordinator::Coordinator;
pub use detect::{detect, detect_from_listing, Detection};
pub use error::{IngestError, Result};
pub use extract::{
    AnsibleExtractor, Extraction, Extractor, ExtractorFactory, ExtractorRegistry,
    GenericExtractor, PythonExtractor, SourceInfo,
};
pub use parse::{ParseResult, ParserAdapter, ParserSet, SyntaxError, SyntaxNode};
pub use pipeline::{BuildRequest, Pipeline};
pub use walk::{list_files, Listing, SourceFile};

pub use tokio_util::sync::CancellationToken;
