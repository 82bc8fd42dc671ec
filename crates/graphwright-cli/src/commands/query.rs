//! Query command

use std::sync::Arc;

use clap::Args;
use graphwright_core::{GraphSchema, QueryGuardrail};
use graphwright_storage::QueryRunner;

use crate::output::{cell, format_json, OutputFormat, Table};
use crate::{AppContext, Cli};

#[derive(Args)]
pub struct QueryArgs {
    /// Pattern query, e.g. 'MATCH (p:Play)-[:USES_ROLE]->(r:Role) RETURN p.name, r.name'
    pub query: String,

    /// Restrict to one repository
    #[arg(short, long)]
    pub repo_id: Option<String>,

    /// Maximum rows (default 100, max 1000)
    #[arg(short, long)]
    pub limit: Option<usize>,
}

pub async fn run(args: &QueryArgs, cli: &Cli, ctx: &AppContext) -> anyhow::Result<()> {
    let guardrail = QueryGuardrail::new(Arc::new(GraphSchema::combined()?));
    let store = ctx.store();
    let result = QueryRunner::new(store.as_ref(), &guardrail)
        .in_repository(args.repo_id.clone())
        .run(&args.query, args.limit)
        .await?;

    match cli.format {
        OutputFormat::Json => println!("{}", format_json(&result)?),
        OutputFormat::Table => {
            for warning in &result.warnings {
                eprintln!("warning: {}", warning);
            }
            let mut table = Table::new(result.columns.iter().cloned());
            for row in &result.rows {
                table.row(row.iter().map(cell));
            }
            println!("{}", table.render());
            println!();
            println!(
                "{} row(s){}",
                result.rows.len(),
                if result.truncated { " (truncated)" } else { "" }
            );
        }
    }
    Ok(())
}
