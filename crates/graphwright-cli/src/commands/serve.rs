//! Serve command: expose the graph tools over stdio or HTTP

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use graphwright_mcp::{McpServer, ServerConfig, ToolServer};

use crate::AppContext;

#[derive(Args)]
pub struct ServeArgs {
    /// Serve JSON-RPC over HTTP instead of stdio
    #[arg(long)]
    pub http: bool,

    /// HTTP listen address (default: from config)
    #[arg(long)]
    pub addr: Option<String>,

    /// Bearer token required on HTTP requests
    #[arg(long, env = "GRAPHWRIGHT_TOKEN")]
    pub token: Option<String>,

    /// Root that tool path arguments resolve under
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Per-repository root, as REPO=PATH (repeatable)
    #[arg(long = "repo-root", value_parser = parse_repo_root)]
    pub repo_roots: Vec<(String, PathBuf)>,
}

fn parse_repo_root(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((repo, path)) if !repo.is_empty() && !path.is_empty() => {
            Ok((repo.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected REPO=PATH, got '{}'", raw)),
    }
}

pub async fn run(args: &ServeArgs, ctx: &AppContext) -> anyhow::Result<()> {
    let mut config = ServerConfig::default()
        .with_default_root(&args.root)
        .with_rate_limit(ctx.config.rate_limit());
    for (repo_id, path) in &args.repo_roots {
        config = config.with_root(repo_id, path);
    }

    let tools = ToolServer::new(ctx.raw_store(), config)?;
    let server = Arc::new(McpServer::new(Arc::new(tools)));

    if args.http {
        let addr = args.addr.clone().unwrap_or_else(|| ctx.config.http_addr.clone());
        return serve_http(server, &addr, args.token.clone()).await;
    }

    tracing::info!("Serving tools over stdio");
    server.run_stdio().await
}

#[cfg(feature = "http")]
async fn serve_http(server: Arc<McpServer>, addr: &str, token: Option<String>) -> anyhow::Result<()> {
    if token.is_none() {
        tracing::warn!("No token configured, HTTP endpoint is unauthenticated");
    }
    graphwright_mcp::run_http_server(server, addr, token).await
}

#[cfg(not(feature = "http"))]
async fn serve_http(_server: Arc<McpServer>, _addr: &str, _token: Option<String>) -> anyhow::Result<()> {
    anyhow::bail!("HTTP transport not compiled in; rebuild with --features http")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repo_root() {
        assert_eq!(
            parse_repo_root("site=/srv/site").unwrap(),
            ("site".to_string(), PathBuf::from("/srv/site"))
        );
        assert!(parse_repo_root("site").is_err());
        assert!(parse_repo_root("=/srv").is_err());
    }
}
