//! Repository listing and statistics

use clap::Args;
use graphwright_ingest::Pipeline;

use crate::output::{format_json, OutputFormat, Table};
use crate::{AppContext, Cli};

#[derive(Args)]
pub struct StatsArgs {
    /// Repository id (default: whole graph)
    pub repo_id: Option<String>,
}

pub async fn run_list(cli: &Cli, ctx: &AppContext) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(ctx.store(), ctx.config.ingest_config())?;
    let repos = pipeline.list_repositories().await?;
    tracing::info!("Found {} repositories", repos.len());

    match cli.format {
        OutputFormat::Json => println!("{}", format_json(&repos)?),
        OutputFormat::Table => {
            if repos.is_empty() {
                println!("No repositories found. Build one with 'graphwright build <path>'");
                return Ok(());
            }
            let mut table = Table::new(["REPOSITORY", "NODES", "EDGES", "TYPES"]);
            for repo in &repos {
                let types = repo
                    .nodes_by_type
                    .iter()
                    .map(|(t, n)| format!("{}={}", t, n))
                    .collect::<Vec<_>>()
                    .join(" ");
                table.row([
                    repo.repo_id.clone(),
                    repo.node_count.to_string(),
                    repo.edge_count.to_string(),
                    types,
                ]);
            }
            println!("{}", table.render());
        }
    }
    Ok(())
}

pub async fn run_stats(args: &StatsArgs, cli: &Cli, ctx: &AppContext) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(ctx.store(), ctx.config.ingest_config())?;
    let stats = pipeline.stats(args.repo_id.as_deref()).await?;

    match cli.format {
        OutputFormat::Json => println!("{}", format_json(&stats)?),
        OutputFormat::Table => {
            match &args.repo_id {
                Some(repo_id) => println!("Stats for repository '{}':", repo_id),
                None => println!("Stats for all repositories:"),
            }
            println!("  Nodes: {}", stats.node_count);
            for (node_type, count) in &stats.nodes_by_type {
                println!("    {}: {}", node_type, count);
            }
            println!();
            println!("  Relationships: {}", stats.edge_count);
            for (rel_type, count) in &stats.edges_by_type {
                println!("    {}: {}", rel_type, count);
            }
        }
    }
    Ok(())
}
