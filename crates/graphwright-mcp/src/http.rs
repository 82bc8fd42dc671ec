//! HTTP transport: JSON-RPC over `POST /message`

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use graphwright_core::BreakerState;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

use crate::transport::{JsonRpcRequest, JsonRpcResponse};
use crate::McpServer;

/// Maximum request body size (1 MiB)
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Header carrying a caller-chosen client id for rate limiting
pub const CLIENT_ID_HEADER: &str = "x-client-id";

const MAX_CLIENT_ID_LEN: usize = 128;

/// JSON-RPC error code for rate-limited calls
const RATE_LIMITED: i32 = -32000;

pub struct HttpState {
    server: Arc<McpServer>,
    auth_token: Option<String>,
}

/// Auth middleware - validates Bearer token if configured
async fn auth_middleware(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let Some(expected_token) = &state.auth_token else {
        return next.run(request).await;
    };

    let auth_header = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());

    match auth_header.and_then(|auth| auth.strip_prefix("Bearer ")) {
        Some(token) if token == expected_token => next.run(request).await,
        Some(_) => (StatusCode::UNAUTHORIZED, "Invalid token").into_response(),
        None => (StatusCode::UNAUTHORIZED, "Missing or invalid Authorization header").into_response(),
    }
}

/// Origins on the loopback interface, any port
fn is_local_origin(origin: &HeaderValue, _parts: &Parts) -> bool {
    let Ok(origin) = origin.to_str() else {
        return false;
    };
    ["http://localhost", "http://127.0.0.1", "http://[::1]"].iter().any(|host| {
        origin
            .strip_prefix(host)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(':'))
    })
}

/// Create the HTTP router
pub fn create_router(server: Arc<McpServer>, auth_token: Option<String>) -> Router {
    let state = Arc::new(HttpState { server, auth_token });

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(is_local_origin))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static(CLIENT_ID_HEADER),
        ]);

    Router::new()
        .route("/message", post(message_handler))
        .route("/health", get(health_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
}

/// Caller identity: the client id header, else the peer address
fn caller_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let client_id = headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= MAX_CLIENT_ID_LEN);

    match (client_id, peer) {
        (Some(id), _) => format!("client:{}", id),
        (None, Some(addr)) => format!("peer:{}", addr.ip()),
        (None, None) => "anonymous".to_string(),
    }
}

async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let breakers = state.server.tools().breaker_snapshots();
    let status = if breakers.iter().any(|b| b.state == BreakerState::Open) {
        "degraded"
    } else {
        "ok"
    };
    Json(serde_json::json!({
        "status": status,
        "server": "graphwright-mcp",
        "version": env!("CARGO_PKG_VERSION"),
        "breakers": breakers,
    }))
}

async fn message_handler(
    State(state): State<Arc<HttpState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<JsonRpcRequest>,
) -> Response {
    tracing::debug!("Received HTTP request: {:?}", request.method);
    let caller = caller_key(&headers, peer.map(|ConnectInfo(addr)| addr));

    if request.method == "tools/call" {
        if let Err(e) = state.server.tools().admit(&caller) {
            let retry_secs = e.retry_after().map_or(1, |d| d.as_secs_f64().ceil().max(1.0) as u64);
            let body = JsonRpcResponse::error(request.id, RATE_LIMITED, e.to_string());
            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            return response;
        }
    }

    match state.server.handle_admitted(request).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// Serve until ctrl-c
pub async fn run_http_server(server: Arc<McpServer>, addr: &str, auth_token: Option<String>) -> anyhow::Result<()> {
    let router = create_router(server, auth_token);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Tool server listening on {}", addr);
    tracing::info!("  Message endpoint: http://{}/message", addr);
    tracing::info!("  Health check: http://{}/health", addr);

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
            }
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ServerConfig, ToolServer};
    use graphwright_core::RateLimitConfig;
    use graphwright_storage::MemoryStore;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn router(burst: u32, token: Option<&str>) -> (TempDir, Router) {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::default()
            .with_default_root(dir.path())
            .with_rate_limit(RateLimitConfig {
                requests_per_minute: 60,
                burst,
            });
        let tools = ToolServer::new(Arc::new(MemoryStore::new()), config).unwrap();
        let server = Arc::new(McpServer::new(Arc::new(tools)));
        (dir, create_router(server, token.map(str::to_string)))
    }

    fn tool_call(client: &str) -> Request<Body> {
        Request::post("/message")
            .header(header::CONTENT_TYPE, "application/json")
            .header(CLIENT_ID_HEADER, client)
            .body(Body::from(
                r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"list_repositories","arguments":{}}}"#,
            ))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_breaker() {
        let (_dir, app) = router(10, Some("secret"));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["breakers"][0]["name"], "graph_store");
        assert_eq!(body["breakers"][0]["state"], "closed");
    }

    #[tokio::test]
    async fn test_message_round_trip() {
        let (_dir, app) = router(10, None);
        let response = app.oneshot(tool_call("alice")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["id"], 1);
        assert_eq!(body["result"]["content"][0]["type"], "text");
    }

    #[tokio::test]
    async fn test_rate_limit_returns_429_per_client() {
        let (_dir, app) = router(1, None);
        let first = app.clone().oneshot(tool_call("alice")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.clone().oneshot(tool_call("alice")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().get(header::RETRY_AFTER).is_some());
        let body = json_body(second).await;
        assert!(body["error"]["message"].as_str().unwrap().starts_with("rate_limited:"));

        let other = app.oneshot(tool_call("bob")).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bearer_auth() {
        let (_dir, app) = router(10, Some("secret"));
        let missing = app.clone().oneshot(tool_call("alice")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let mut request = tool_call("alice");
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        let ok = app.oneshot(request).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let (_dir, app) = router(10, None);
        let padding = "x".repeat(MAX_BODY_SIZE + 1);
        let request = Request::post("/message")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, padding.len())
            .body(Body::from(padding))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_caller_key_prefers_client_id() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "10.0.0.7:5555".parse().unwrap();
        assert_eq!(caller_key(&headers, Some(peer)), "peer:10.0.0.7");
        assert_eq!(caller_key(&headers, None), "anonymous");

        headers.insert(CLIENT_ID_HEADER, HeaderValue::from_static("ci-bot"));
        assert_eq!(caller_key(&headers, Some(peer)), "client:ci-bot");
    }

    #[test]
    fn test_local_origins_only() {
        let (parts, _) = Request::new(()).into_parts();
        let local = |o: &'static str| is_local_origin(&HeaderValue::from_static(o), &parts);
        assert!(local("http://localhost:3000"));
        assert!(local("http://127.0.0.1"));
        assert!(!local("http://localhost.evil.com"));
        assert!(!local("https://example.com"));
    }
}
