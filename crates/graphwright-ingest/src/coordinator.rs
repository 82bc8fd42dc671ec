//! Extraction coordinator: a bounded pool of parse-and-extract workers

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use graphwright_core::RepositoryContext;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::builder::FileOutcome;
use crate::extract::{Extractor, SourceInfo};
use crate::parse::ParserSet;
use crate::walk::SourceFile;

pub struct Coordinator {
    parsers: Arc<ParserSet>,
    extractor: Arc<dyn Extractor>,
    ctx: RepositoryContext,
    workers: usize,
}

impl Coordinator {
    pub fn new(
        parsers: Arc<ParserSet>,
        extractor: Arc<dyn Extractor>,
        ctx: RepositoryContext,
        workers: usize,
    ) -> Self {
        Self {
            parsers,
            extractor,
            ctx,
            workers: workers.max(1),
        }
    }

    /// Process `files` with at most `workers` in flight, sending one
    /// outcome per file to the builder queue.
    ///
    /// After cancellation no new file is started; files already being
    /// parsed run to completion. Sending waits while the queue is full.
    pub async fn run(&self, files: Vec<SourceFile>, tx: mpsc::Sender<FileOutcome>, cancel: CancellationToken) {
        let total = files.len();
        tracing::debug!("Dispatching {} files to {} workers", total, self.workers);

        stream::iter(files)
            .map(|file| {
                let tx = tx.clone();
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let outcome = self.process(file).await;
                    if tx.send(outcome).await.is_err() {
                        tracing::debug!("Builder queue closed");
                    }
                }
            })
            .buffer_unordered(self.workers)
            .collect::<Vec<()>>()
            .await;
    }

    async fn process(&self, file: SourceFile) -> FileOutcome {
        let rel_path = file.rel_path.clone();
        let parsers = Arc::clone(&self.parsers);
        let extractor = Arc::clone(&self.extractor);
        let ctx = self.ctx.clone();

        match tokio::task::spawn_blocking(move || process_file(&parsers, extractor.as_ref(), &ctx, file)).await {
            Ok(outcome) => outcome,
            Err(e) => FileOutcome::Failed {
                rel_path,
                error: format!("worker failed: {}", e),
            },
        }
    }
}

/// Read, hash, parse and extract one file
pub fn process_file(
    parsers: &ParserSet,
    extractor: &dyn Extractor,
    ctx: &RepositoryContext,
    file: SourceFile,
) -> FileOutcome {
    let bytes = match std::fs::read(&file.path) {
        Ok(bytes) => bytes,
        Err(e) => {
            return FileOutcome::Failed {
                rel_path: file.rel_path,
                error: e.to_string(),
            }
        }
    };

    let hash = format!("{:x}", Sha256::digest(&bytes));
    let source = SourceInfo::new(file.rel_path.as_str(), bytes.len() as u64, hash);
    let parse = parsers.parse(&file.path, &bytes);
    let extraction = extractor.extract(&source, &parse, ctx);

    FileOutcome::Extracted {
        rel_path: file.rel_path,
        extraction,
        parse_errors: parse.errors,
    }
}
