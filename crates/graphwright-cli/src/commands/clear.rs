//! Clear command

use clap::Args;
use graphwright_ingest::Pipeline;

use crate::output::{format_json, OutputFormat};
use crate::{AppContext, Cli};

#[derive(Args)]
pub struct ClearArgs {
    /// Repository id
    pub repo_id: String,

    /// Delete without confirmation
    #[arg(long)]
    pub force: bool,
}

pub async fn run(args: &ClearArgs, cli: &Cli, ctx: &AppContext) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(ctx.store(), ctx.config.ingest_config())?;

    if !args.force {
        let stats = pipeline.stats(Some(&args.repo_id)).await?;
        if stats.node_count == 0 {
            println!("Repository '{}' not found", args.repo_id);
            return Ok(());
        }
        println!(
            "Repository '{}' has {} nodes and {} relationships",
            args.repo_id, stats.node_count, stats.edge_count
        );
        println!("Use --force to confirm deletion");
        return Ok(());
    }

    let outcome = pipeline.clear(&args.repo_id).await?;
    tracing::info!(
        "Cleared {}: {} nodes, {} relationships",
        args.repo_id,
        outcome.nodes_deleted,
        outcome.edges_deleted
    );

    match cli.format {
        OutputFormat::Json => println!("{}", format_json(&outcome)?),
        OutputFormat::Table => {
            println!(
                "Cleared '{}': {} nodes, {} relationships deleted",
                args.repo_id, outcome.nodes_deleted, outcome.edges_deleted
            );
            println!(
                "  Shared nodes: {} deleted, {} retained",
                outcome.shared_deleted, outcome.shared_retained
            );
        }
    }
    Ok(())
}
