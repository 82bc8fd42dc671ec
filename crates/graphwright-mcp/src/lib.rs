//! Graphwright MCP - guarded tool calls over a built graph
//!
//! Tools answer structural questions about built repositories. Every call
//! passes the per-caller rate limiter, argument parsing, the path sanitizer
//! and (for queries) the query guardrail before reaching the graph store
//! through its circuit breaker. Transports: JSON-RPC over stdio, and over
//! HTTP with the `http` feature.

pub mod error;
pub mod handlers;
pub mod server;
pub mod tools;
pub mod transport;

#[cfg(feature = "http")]
pub mod http;

pub use error::ToolError;
pub use handlers::{ContentBlock, ToolCallRequest, ToolCallResponse, ToolHandler};
pub use server::{McpServer, ServerConfig, ToolServer, STDIO_CALLER};
pub use tools::{get_tools, Tool, ToolCall};

#[cfg(feature = "http")]
pub use http::{create_router, run_http_server};
