//! Guarded tool server and the JSON-RPC front end

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use graphwright_core::limits::{validate_limit_param, validate_repo_id};
use graphwright_core::{
    BreakerConfig, BreakerSnapshot, CircuitBreaker, GraphSchema, PathSanitizer, QueryGuardrail,
    RateLimitConfig, RateLimiter, SecurityError,
};
use graphwright_storage::{GraphStore, ProtectedStore};
use serde::Deserialize;

use crate::error::ToolError;
use crate::handlers::{ToolCallRequest, ToolCallResponse, ToolHandler};
use crate::tools::{get_tools, PathArgs, ToolCall};
use crate::transport::{
    Incoming, JsonRpcRequest, JsonRpcResponse, StdioTransport, INTERNAL_ERROR, INVALID_PARAMS,
    METHOD_NOT_FOUND, PARSE_ERROR,
};

const SERVER_NAME: &str = "graphwright";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Caller key used for the stdio transport
pub const STDIO_CALLER: &str = "stdio";

/// Tool server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub rate_limit: RateLimitConfig,
    pub breaker: BreakerConfig,
    /// Root that path arguments resolve under when no repository root matches
    pub default_root: PathBuf,
    /// Per-repository roots, keyed by repository id
    pub roots: HashMap<String, PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            breaker: BreakerConfig::graph_store(),
            default_root: PathBuf::from("."),
            roots: HashMap::new(),
        }
    }
}

impl ServerConfig {
    pub fn with_root(mut self, repo_id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        self.roots.insert(repo_id.into(), root.into());
        self
    }

    pub fn with_default_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.default_root = root.into();
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }
}

/// Runs tool calls through the boundary checks: rate limit, argument
/// parsing, path sanitizing, query guardrail and the store breaker.
pub struct ToolServer {
    handler: ToolHandler,
    limiter: RateLimiter,
    breaker: Arc<CircuitBreaker>,
    default_root: PathSanitizer,
    roots: HashMap<String, PathSanitizer>,
}

impl ToolServer {
    /// Fails when a configured root is not an existing directory
    pub fn new(store: Arc<dyn GraphStore>, config: ServerConfig) -> Result<Self, SecurityError> {
        let breaker = Arc::new(CircuitBreaker::new("graph_store", config.breaker.clone()));
        let limiter = RateLimiter::new(config.rate_limit.clone());
        Self::assemble(store, breaker, limiter, config)
    }

    /// Use an existing breaker and limiter (shared clocks in tests)
    pub fn with_parts(
        store: Arc<dyn GraphStore>,
        breaker: Arc<CircuitBreaker>,
        limiter: RateLimiter,
        config: ServerConfig,
    ) -> Result<Self, SecurityError> {
        Self::assemble(store, breaker, limiter, config)
    }

    fn assemble(
        store: Arc<dyn GraphStore>,
        breaker: Arc<CircuitBreaker>,
        limiter: RateLimiter,
        config: ServerConfig,
    ) -> Result<Self, SecurityError> {
        let default_root = PathSanitizer::new(&config.default_root)?;
        let mut roots = HashMap::new();
        for (repo_id, root) in &config.roots {
            roots.insert(repo_id.clone(), PathSanitizer::new(root)?);
        }

        let protected: Arc<dyn GraphStore> = Arc::new(ProtectedStore::new(store, Arc::clone(&breaker)));
        let schema = GraphSchema::combined().unwrap_or_else(|e| {
            tracing::warn!("Falling back to an empty query schema: {}", e);
            GraphSchema::default()
        });
        let guardrail = QueryGuardrail::new(Arc::new(schema));

        Ok(Self {
            handler: ToolHandler::new(protected, guardrail),
            limiter,
            breaker,
            default_root,
            roots,
        })
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        vec![self.breaker.snapshot()]
    }

    /// Spend one request token for `caller_key`
    pub fn admit(&self, caller_key: &str) -> Result<(), ToolError> {
        Ok(self.limiter.check(caller_key)?)
    }

    /// Run a tool call for `caller_key`. Never fails: errors become
    /// `isError` responses whose text starts with the error tag.
    pub async fn call(&self, caller_key: &str, request: ToolCallRequest) -> ToolCallResponse {
        if let Err(e) = self.admit(caller_key) {
            return e.into();
        }
        self.call_admitted(request).await
    }

    /// Run a tool call whose caller already passed [`ToolServer::admit`]
    pub async fn call_admitted(&self, request: ToolCallRequest) -> ToolCallResponse {
        tracing::debug!(tool = %request.name, "Tool call");
        match self.execute(request).await {
            Ok(value) => ToolCallResponse::json(&value),
            Err(e) => {
                tracing::debug!(tag = e.tag(), "Tool call failed");
                e.into()
            }
        }
    }

    async fn execute(&self, request: ToolCallRequest) -> Result<serde_json::Value, ToolError> {
        let call = ToolCall::parse(&request.name, request.arguments)?;
        let repo = call.repo_id();
        if let Some(repo_id) = repo {
            validate_repo_id(repo_id)?;
        }
        let h = &self.handler;

        match &call {
            ToolCall::FindDependencies(args) => h.find_dependencies(&self.sanitize(args)?, repo).await,
            ToolCall::TraceEntity(args) => h.trace_entity(&args.name, args.node_type.as_deref(), repo).await,
            ToolCall::GetComponentUsage(args) => h.get_component_usage(&args.name, repo).await,
            ToolCall::AnalyzeFile(args) => h.analyze_file(&self.sanitize(args)?, repo).await,
            ToolCall::FindModuleUsage(args) => h.find_module_usage(&args.module, repo).await,
            ToolCall::GetHierarchy(args) => h.get_hierarchy(&self.sanitize(args)?, repo).await,
            ToolCall::FindTemplateUsage(args) => h.find_template_usage(&self.sanitize(args)?, repo).await,
            ToolCall::RunQuery(args) => {
                h.guardrail().check(&args.query)?;
                h.run_query(&args.query, validate_limit_param(args.limit), repo).await
            }
            ToolCall::ListRepositories => h.list_repositories().await,
        }
    }

    /// Resolve a path argument under the root registered for its
    /// repository, or the default root. Returns the normalized relative path.
    fn sanitize(&self, args: &PathArgs) -> Result<String, ToolError> {
        let sanitizer = args
            .repo_id
            .as_deref()
            .and_then(|repo| self.roots.get(repo))
            .unwrap_or(&self.default_root);
        Ok(sanitizer.sanitize(&args.path)?.relative().to_string())
    }
}

/// JSON-RPC server over a [`ToolServer`]
pub struct McpServer {
    tools: Arc<ToolServer>,
}

impl McpServer {
    pub fn new(tools: Arc<ToolServer>) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &Arc<ToolServer> {
        &self.tools
    }

    /// Start the server on stdio
    pub async fn run_stdio(&self) -> anyhow::Result<()> {
        tracing::info!("Starting tool server on stdio");
        let mut transport = StdioTransport::stdio();

        loop {
            let response = match transport.read_request().await {
                Ok(Some(Incoming::Request(request))) => {
                    tracing::debug!("Received request: {:?}", request.method);
                    self.handle_request(STDIO_CALLER, request).await
                }
                Ok(Some(Incoming::Malformed(reason))) => Some(JsonRpcResponse::error(
                    serde_json::Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {}", reason),
                )),
                Ok(None) => {
                    tracing::info!("EOF on stdin, shutting down");
                    break;
                }
                Err(e) => {
                    tracing::error!("Failed to read request: {}", e);
                    break;
                }
            };

            if let Some(response) = response {
                if let Err(e) = transport.write_response(&response).await {
                    tracing::error!("Failed to write response: {}", e);
                }
            }
        }

        Ok(())
    }

    /// Handle a request from `caller_key`; `None` for notifications
    pub async fn handle_request(&self, caller_key: &str, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        self.dispatch(Some(caller_key), request).await
    }

    /// Handle a request whose caller was already admitted by the rate limiter
    pub async fn handle_admitted(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        self.dispatch(None, request).await
    }

    async fn dispatch(&self, caller_key: Option<&str>, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            tracing::debug!("Notification: {}", request.method);
            return None;
        }

        Some(match request.method.as_str() {
            "initialize" => self.handle_initialize(request.id),
            "initialized" | "ping" => JsonRpcResponse::success(request.id, serde_json::json!({})),
            "tools/list" => JsonRpcResponse::success(request.id, serde_json::json!({ "tools": get_tools() })),
            "tools/call" => self.handle_tools_call(caller_key, request.id, request.params).await,
            _ => JsonRpcResponse::error(
                request.id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ),
        })
    }

    fn handle_initialize(&self, id: serde_json::Value) -> JsonRpcResponse {
        let result = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": SERVER_VERSION
            }
        });
        JsonRpcResponse::success(id, result)
    }

    async fn handle_tools_call(
        &self,
        caller_key: Option<&str>,
        id: serde_json::Value,
        params: serde_json::Value,
    ) -> JsonRpcResponse {
        #[derive(Deserialize)]
        struct ToolCallParams {
            name: String,
            #[serde(default)]
            arguments: serde_json::Value,
        }

        let params: ToolCallParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return JsonRpcResponse::error(id, INVALID_PARAMS, format!("Invalid params: {}", e)),
        };

        let request = ToolCallRequest::new(params.name, params.arguments);
        let response = match caller_key {
            Some(caller) => self.tools.call(caller, request).await,
            None => self.tools.call_admitted(request).await,
        };

        match serde_json::to_value(response) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Serialization error: {}", e)),
        }
    }
}
