//! Build command

use std::path::PathBuf;

use clap::Args;
use graphwright_core::{BuildReport, RepoType};
use graphwright_ingest::{BuildRequest, CancellationToken, Pipeline};

use crate::output::{format_json, OutputFormat, Table};
use crate::{AppContext, Cli};

#[derive(Args)]
pub struct BuildArgs {
    /// Repository root
    pub path: PathBuf,

    /// Repository id (default: derived from the directory name)
    #[arg(short, long)]
    pub repo_id: Option<String>,

    /// Repository flavor: ansible, python or generic (default: detected)
    #[arg(short = 't', long = "type")]
    pub repo_type: Option<RepoType>,

    /// Remove the repository's previous graph first
    #[arg(long)]
    pub clear: bool,

    /// Parallel parse workers (default: from config)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Records per batch commit (default: from config)
    #[arg(short, long)]
    pub batch_size: Option<usize>,
}

pub async fn run(args: &BuildArgs, cli: &Cli, ctx: &AppContext) -> anyhow::Result<()> {
    let mut config = ctx.config.ingest_config();
    if let Some(batch_size) = args.batch_size {
        config = config.with_batch_size(batch_size);
    }
    let pipeline = Pipeline::new(ctx.store(), config)?;

    let mut request = BuildRequest::new(&args.path).clear(args.clear);
    if let Some(repo_id) = &args.repo_id {
        request = request.repo_id(repo_id);
    }
    if let Some(repo_type) = args.repo_type {
        request = request.repo_type(repo_type);
    }
    if let Some(workers) = args.workers {
        request = request.workers(workers);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping build");
            on_interrupt.cancel();
        }
    });

    let report = pipeline.build_with_cancel(request, cancel).await;
    interrupt.abort();
    let report = report?;

    match cli.format {
        OutputFormat::Json => println!("{}", format_json(&report)?),
        OutputFormat::Table => print_report(&report),
    }

    if report.cancelled {
        anyhow::bail!("Build of '{}' was cancelled", report.repo_id);
    }
    Ok(())
}

fn print_report(report: &BuildReport) {
    println!("Built '{}' ({})", report.repo_id, report.repo_type);
    println!(
        "  Files: {} processed, {} failed, {} skipped",
        report.files_processed, report.files_failed, report.files_skipped
    );
    println!(
        "  Nodes: {} created, {} updated",
        report.nodes_created, report.nodes_updated
    );
    println!(
        "  Relationships: {} created, {} existing",
        report.relationships_created, report.relationships_existing
    );

    if !report.entities_by_type.is_empty() {
        let mut table = Table::new(["TYPE", "RECORDS"]);
        for (node_type, count) in &report.entities_by_type {
            table.row([node_type.clone(), count.to_string()]);
        }
        println!();
        println!("{}", table.render());
    }

    if report.rejected_count > 0 {
        println!();
        println!("  Rejected records: {}", report.rejected_count);
        for rejection in &report.rejected {
            println!("    {} {}: {}", rejection.file, rejection.record_type, rejection.reason);
        }
    }
    if report.unresolved_count > 0 {
        println!();
        println!("  Unresolved relationships: {}", report.unresolved_count);
        for unresolved in report.unresolved.iter().take(10) {
            println!("    {} {} -> {}", unresolved.rel_type, unresolved.from, unresolved.to);
        }
    }
    if !report.file_errors.is_empty() {
        println!();
        println!("  File errors:");
        for (file, error) in &report.file_errors {
            println!("    {}: {}", file, error);
        }
    }
    if report.records_failed > 0 {
        println!();
        println!("  Records lost to failed commits: {}", report.records_failed);
    }
}
