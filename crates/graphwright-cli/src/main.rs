//! Graphwright CLI - build and query repository graphs

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use graphwright_storage::{GraphStore, ProtectedStore, SqliteStore};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod output;

use commands::{build, clear, completions, detect, query, repos, serve};
use config::Config;
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "graphwright")]
#[command(author, version, about = "Build property graphs of source repositories and query them")]
pub struct Cli {
    /// Data directory
    #[arg(short, long, env = "GRAPHWRIGHT_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table, global = true)]
    pub format: OutputFormat,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Get the data directory path
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("graphwright")
        })
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build or refresh the graph of a repository
    Build(build::BuildArgs),
    /// Remove one repository from the graph
    Clear(clear::ClearArgs),
    /// List built repositories
    Repos,
    /// Show node and edge counts
    Stats(repos::StatsArgs),
    /// Detect the flavor of a repository
    Detect(detect::DetectArgs),
    /// Run a read-only pattern query
    Query(query::QueryArgs),
    /// Start the tool server
    Serve(serve::ServeArgs),
    /// Manage configuration
    Config(commands::config::ConfigArgs),
    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}

/// Application context with the graph store
pub struct AppContext {
    pub config: Config,
    store: Arc<SqliteStore>,
}

impl AppContext {
    pub async fn new(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = cli.data_dir();
        std::fs::create_dir_all(&data_dir)?;
        let config = Config::load(&data_dir)?;

        let db_path = data_dir.join("graph.db");
        tracing::debug!("Using database at: {:?}", db_path);
        let store = SqliteStore::open(&db_path)?;
        store.initialize().await?;

        Ok(Self {
            config,
            store: Arc::new(store),
        })
    }

    /// Store behind the graph-store circuit breaker
    pub fn store(&self) -> Arc<dyn GraphStore> {
        Arc::new(ProtectedStore::with_default_breaker(Arc::clone(&self.store)))
    }

    /// Store without a breaker, for callers that install their own
    pub fn raw_store(&self) -> Arc<dyn GraphStore> {
        self.store.clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // stdout carries command output and the stdio protocol
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    tracing::debug!("Starting graphwright CLI");

    match &cli.command {
        Commands::Config(args) => return commands::config::run(args, &cli),
        Commands::Completions(args) => return completions::run(args),
        Commands::Detect(args) => return detect::run(args, &cli),
        _ => {}
    }

    let ctx = AppContext::new(&cli).await?;

    match &cli.command {
        Commands::Build(args) => build::run(args, &cli, &ctx).await?,
        Commands::Clear(args) => clear::run(args, &cli, &ctx).await?,
        Commands::Repos => repos::run_list(&cli, &ctx).await?,
        Commands::Stats(args) => repos::run_stats(args, &cli, &ctx).await?,
        Commands::Query(args) => query::run(args, &cli, &ctx).await?,
        Commands::Serve(args) => serve::run(args, &ctx).await?,
        Commands::Config(_) | Commands::Completions(_) | Commands::Detect(_) => {}
    }

    Ok(())
}
