//! Streamable-HTTP MCP endpoint.
//!
//! ```text
//! POST   /mcp     JSON-RPC request; `initialize` mints a session
//! DELETE /mcp     close the session named in Mcp-Session-Id
//! GET    /health  transport status
//! ```
//!
//! Every method other than `initialize` must carry the `Mcp-Session-Id` header returned by
//! `initialize`. Sessions live in a [`SessionRegistry`] owned by the endpoint and are closed when
//! the client deletes them or the endpoint stops.

use crate::mmlmcp::http_server::{with_standard_layers, RunningServer};
use crate::mmlmcp::tool_protocol::{ToolProtocol, ToolResult};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";
pub const SESSION_HEADER: &str = "mcp-session-id";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

/// One client conversation with the endpoint.
#[derive(Debug)]
pub struct McpSession {
    id: String,
    created_at: DateTime<Utc>,
    client_info: Value,
    closed: AtomicBool,
}

impl McpSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// `clientInfo` as sent with `initialize`, `null` if absent.
    pub fn client_info(&self) -> &Value {
        &self.client_info
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Live sessions keyed by id.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<McpSession>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a session with a fresh id.
    pub async fn create(&self, client_info: Value) -> Arc<McpSession> {
        let session = Arc::new(McpSession {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            client_info,
            closed: AtomicBool::new(false),
        });
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        log::info!("MCP session {} created", session.id);
        session
    }

    pub async fn get(&self, id: &str) -> Option<Arc<McpSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Close and forget a session. `false` if it was not registered.
    pub async fn remove_and_close(&self, id: &str) -> bool {
        match self.sessions.write().await.remove(id) {
            Some(session) => {
                session.close();
                log::info!("MCP session {} closed", id);
                true
            }
            None => false,
        }
    }

    /// Close every session; returns how many were open.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Arc<McpSession>> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.close();
        }
        if !drained.is_empty() {
            log::info!("Closed {} MCP session(s)", drained.len());
        }
        drained.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_error(status: StatusCode, id: Value, code: i64, message: impl Into<String>) -> Response {
    let body = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message.into() }
    });
    (status, Json(body)).into_response()
}

#[derive(Clone)]
struct McpState {
    protocol: Arc<dyn ToolProtocol>,
    sessions: SessionRegistry,
    server_name: String,
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Router for the MCP endpoint serving `protocol`.
pub fn router(protocol: Arc<dyn ToolProtocol>, sessions: SessionRegistry, server_name: &str) -> Router {
    let state = McpState {
        protocol,
        sessions,
        server_name: server_name.to_string(),
    };
    with_standard_layers(
        Router::new()
            .route("/mcp", post(handle_post).delete(handle_delete).get(handle_stream))
            .route("/health", get(health)),
    )
    .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "transport": "streamable-http",
        "specification": MCP_PROTOCOL_VERSION,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

// Server-initiated streams are not offered.
async fn handle_stream() -> Response {
    (StatusCode::METHOD_NOT_ALLOWED, "SSE stream not supported").into_response()
}

async fn handle_delete(State(state): State<McpState>, headers: HeaderMap) -> Response {
    let Some(id) = session_id(&headers) else {
        return rpc_error(
            StatusCode::BAD_REQUEST,
            Value::Null,
            INVALID_REQUEST,
            "Bad Request: Missing Mcp-Session-Id header",
        );
    };
    if state.sessions.remove_and_close(&id).await {
        StatusCode::OK.into_response()
    } else {
        rpc_error(StatusCode::NOT_FOUND, Value::Null, INVALID_REQUEST, "Session not found")
    }
}

async fn handle_post(State(state): State<McpState>, headers: HeaderMap, body: Bytes) -> Response {
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            log::warn!("Rejected malformed MCP request: {}", e);
            return rpc_error(StatusCode::BAD_REQUEST, Value::Null, PARSE_ERROR, "Parse error");
        }
    };
    let id = request.id.clone().unwrap_or(Value::Null);

    if request.method == "initialize" {
        let session = state
            .sessions
            .create(request.params.get("clientInfo").cloned().unwrap_or(Value::Null))
            .await;
        let result = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": { "name": state.server_name, "version": env!("CARGO_PKG_VERSION") },
        });
        let mut response = Json(rpc_result(id, result)).into_response();
        if let Ok(value) = HeaderValue::from_str(session.id()) {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
        return response;
    }

    let Some(session_id) = session_id(&headers) else {
        return rpc_error(
            StatusCode::BAD_REQUEST,
            id,
            INVALID_REQUEST,
            "Bad Request: Missing Mcp-Session-Id header",
        );
    };
    if state.sessions.get(&session_id).await.is_none() {
        return rpc_error(StatusCode::NOT_FOUND, id, INVALID_REQUEST, "Session not found");
    }

    // Notifications carry no id and get no body.
    if request.id.is_none() {
        log::debug!("MCP notification {} on session {}", request.method, session_id);
        return StatusCode::ACCEPTED.into_response();
    }

    match request.method.as_str() {
        "ping" => Json(rpc_result(id, json!({}))).into_response(),
        "tools/list" => match state.protocol.list_tools().await {
            Ok(tools) => {
                let tools: Vec<Value> = tools.iter().map(|t| t.to_mcp_tool()).collect();
                Json(rpc_result(id, json!({ "tools": tools }))).into_response()
            }
            Err(e) => {
                log::error!("tools/list failed: {}", e);
                rpc_error(StatusCode::OK, id, INVALID_REQUEST, e.to_string())
            }
        },
        "tools/call" => {
            let Some(name) = request.params.get("name").and_then(Value::as_str) else {
                return rpc_error(StatusCode::OK, id, INVALID_PARAMS, "Missing tool name");
            };
            let arguments = request
                .params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));
            log::info!("Session {} calling {}", session_id, name);
            let result = match state.protocol.execute(name, arguments).await {
                Ok(result) => result,
                Err(e) => {
                    log::warn!("Tool {} rejected: {}", name, e);
                    ToolResult::error(e.to_string())
                }
            };
            match serde_json::to_value(&result) {
                Ok(value) => Json(rpc_result(id, value)).into_response(),
                Err(e) => rpc_error(StatusCode::OK, id, INVALID_REQUEST, e.to_string()),
            }
        }
        other => rpc_error(
            StatusCode::OK,
            id,
            METHOD_NOT_FOUND,
            format!("Method not found: {}", other),
        ),
    }
}

/// A running MCP endpoint.
pub struct McpServerHandle {
    server: RunningServer,
    sessions: SessionRegistry,
}

impl McpServerHandle {
    pub fn url(&self) -> String {
        self.server.url()
    }

    pub fn port(&self) -> u16 {
        self.server.port()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Close every session, then stop the listener.
    pub async fn stop(self) {
        self.sessions.close_all().await;
        self.server.shutdown().await;
    }
}

/// Serve `protocol` over streamable HTTP on `127.0.0.1:port` (0 for ephemeral).
pub async fn start_mcp_server(protocol: Arc<dyn ToolProtocol>, port: u16) -> std::io::Result<McpServerHandle> {
    let sessions = SessionRegistry::new();
    let app = router(protocol, sessions.clone(), "mml-mcp-server");
    let server = RunningServer::bind("127.0.0.1", port, app).await?;
    log::info!("MCP endpoint at {}/mcp", server.url());
    Ok(McpServerHandle { server, sessions })
}
