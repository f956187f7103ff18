use async_trait::async_trait;
use mmlmcp::mcp_session::{start_mcp_server, McpServerHandle, MCP_PROTOCOL_VERSION};
use mmlmcp::tool_protocol::{
    ToolError, ToolMetadata, ToolParameter, ToolParameterType, ToolProtocol, ToolResult,
};
use serde_json::{json, Value};
use std::error::Error;
use std::sync::Arc;

struct GreeterProtocol;

#[async_trait]
impl ToolProtocol for GreeterProtocol {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        match tool_name {
            "greet" => {
                let name = parameters["name"].as_str().unwrap_or("stranger");
                Ok(ToolResult::text(format!("Hello, {}!", name)))
            }
            other => Err(Box::new(ToolError::NotFound(other.to_string()))),
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
        Ok(vec![ToolMetadata::new("greet", "Say hello").with_parameter(
            ToolParameter::new("name", ToolParameterType::String).required(),
        )])
    }

    fn protocol_name(&self) -> &str {
        "greeter"
    }
}

async fn start() -> McpServerHandle {
    start_mcp_server(Arc::new(GreeterProtocol), 0).await.unwrap()
}

fn endpoint(server: &McpServerHandle) -> String {
    format!("{}/mcp", server.url())
}

async fn initialize(server: &McpServerHandle, http: &reqwest::Client) -> String {
    let response = http
        .post(endpoint(server))
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "clientInfo": {"name": "test-client", "version": "0.0.1"}
            }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let session = response.headers()["mcp-session-id"]
        .to_str()
        .unwrap()
        .to_string();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["protocolVersion"], MCP_PROTOCOL_VERSION);
    assert_eq!(body["result"]["capabilities"], json!({"tools": {}}));
    session
}

async fn call(
    server: &McpServerHandle,
    http: &reqwest::Client,
    session: &str,
    body: Value,
) -> reqwest::Response {
    http.post(endpoint(server))
        .header("mcp-session-id", session)
        .json(&body)
        .send()
        .await
        .unwrap()
}

// ===== Session lifecycle =====

#[tokio::test]
async fn test_initialize_registers_session() {
    let server = start().await;
    let http = reqwest::Client::new();

    let session = initialize(&server, &http).await;
    let registered = server.sessions().get(&session).await.unwrap();
    assert_eq!(registered.client_info()["name"], "test-client");

    server.stop().await;
}

#[tokio::test]
async fn test_requests_need_a_known_session() {
    let server = start().await;
    let http = reqwest::Client::new();

    let response = http
        .post(endpoint(&server))
        .json(&json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32600);
    assert_eq!(
        body["error"]["message"],
        "Bad Request: Missing Mcp-Session-Id header"
    );

    let response = call(
        &server,
        &http,
        "not-a-session",
        json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"}),
    )
    .await;
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], "Session not found");

    server.stop().await;
}

#[tokio::test]
async fn test_delete_closes_session() {
    let server = start().await;
    let http = reqwest::Client::new();
    let session = initialize(&server, &http).await;
    let handle = server.sessions().get(&session).await.unwrap();

    let response = http
        .delete(endpoint(&server))
        .header("mcp-session-id", &session)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(handle.is_closed());

    let response = call(
        &server,
        &http,
        &session,
        json!({"jsonrpc": "2.0", "id": 4, "method": "ping"}),
    )
    .await;
    assert_eq!(response.status(), 404);

    let response = http
        .delete(endpoint(&server))
        .header("mcp-session-id", &session)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    server.stop().await;
}

#[tokio::test]
async fn test_stop_closes_every_session() {
    let server = start().await;
    let http = reqwest::Client::new();
    let a = initialize(&server, &http).await;
    let b = initialize(&server, &http).await;
    assert_ne!(a, b);

    let sessions = server.sessions().clone();
    let a = sessions.get(&a).await.unwrap();
    let b = sessions.get(&b).await.unwrap();
    server.stop().await;

    assert!(a.is_closed());
    assert!(b.is_closed());
    assert!(sessions.is_empty().await);
}

// ===== Methods =====

#[tokio::test]
async fn test_tools_list_and_call() {
    let server = start().await;
    let http = reqwest::Client::new();
    let session = initialize(&server, &http).await;

    let body: Value = call(
        &server,
        &http,
        &session,
        json!({"jsonrpc": "2.0", "id": 5, "method": "tools/list"}),
    )
    .await
    .json()
    .await
    .unwrap();
    assert_eq!(body["id"], 5);
    let tool = &body["result"]["tools"][0];
    assert_eq!(tool["name"], "greet");
    assert_eq!(tool["inputSchema"]["required"], json!(["name"]));

    let body: Value = call(
        &server,
        &http,
        &session,
        json!({
            "jsonrpc": "2.0",
            "id": 6,
            "method": "tools/call",
            "params": {"name": "greet", "arguments": {"name": "Ada"}}
        }),
    )
    .await
    .json()
    .await
    .unwrap();
    assert_eq!(
        body["result"],
        json!({"content": [{"type": "text", "text": "Hello, Ada!"}], "isError": false})
    );

    server.stop().await;
}

#[tokio::test]
async fn test_failed_call_is_an_error_result() {
    let server = start().await;
    let http = reqwest::Client::new();
    let session = initialize(&server, &http).await;

    let body: Value = call(
        &server,
        &http,
        &session,
        json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {"name": "vanish", "arguments": {}}
        }),
    )
    .await
    .json()
    .await
    .unwrap();
    assert_eq!(body["result"]["isError"], true);
    assert_eq!(body["result"]["content"][0]["text"], "Unknown tool: vanish");

    server.stop().await;
}

#[tokio::test]
async fn test_ping_notifications_and_unknown_methods() {
    let server = start().await;
    let http = reqwest::Client::new();
    let session = initialize(&server, &http).await;

    let body: Value = call(
        &server,
        &http,
        &session,
        json!({"jsonrpc": "2.0", "id": 8, "method": "ping"}),
    )
    .await
    .json()
    .await
    .unwrap();
    assert_eq!(body["result"], json!({}));

    let response = call(
        &server,
        &http,
        &session,
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
    )
    .await;
    assert_eq!(response.status(), 202);

    let body: Value = call(
        &server,
        &http,
        &session,
        json!({"jsonrpc": "2.0", "id": 9, "method": "resources/list"}),
    )
    .await
    .json()
    .await
    .unwrap();
    assert_eq!(body["error"]["code"], -32601);

    let response = http
        .post(endpoint(&server))
        .header("content-type", "application/json")
        .body("{oops")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);

    server.stop().await;
}

#[tokio::test]
async fn test_health() {
    let server = start().await;
    let health: Value = reqwest::get(format!("{}/health", server.url()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["transport"], "streamable-http");
    assert_eq!(health["specification"], MCP_PROTOCOL_VERSION);
    server.stop().await;
}
