//! Detect command

use std::path::PathBuf;

use clap::Args;

use crate::output::{format_json, OutputFormat};
use crate::Cli;

#[derive(Args)]
pub struct DetectArgs {
    /// Repository root
    pub path: PathBuf,
}

pub fn run(args: &DetectArgs, cli: &Cli) -> anyhow::Result<()> {
    if !args.path.is_dir() {
        anyhow::bail!("Not a directory: {}", args.path.display());
    }
    let detection = graphwright_ingest::detect(&args.path);

    match cli.format {
        OutputFormat::Json => println!("{}", format_json(&detection)?),
        OutputFormat::Table => {
            println!("{} (confidence {:.2})", detection.repo_type, detection.confidence);
            for indicator in &detection.indicators {
                println!("  {}", indicator);
            }
        }
    }
    Ok(())
}
