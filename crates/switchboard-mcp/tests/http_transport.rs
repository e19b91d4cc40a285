#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for the streamable-HTTP MCP client against a mock agent.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{EventBus, SwitchboardError};
use switchboard_mcp::{AgentConnection, AgentStatus, HttpTransport, McpTransport};
use wiremock::matchers::{body_partial_json, header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn mount_rpc(server: &MockServer, rpc_method: &str, result: serde_json::Value) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": rpc_method })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("mcp-session-id", "session-123")
                .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": result })),
        )
        .mount(server)
        .await;
}

/// A mock agent exposing `generate_code` and one resource.
async fn mock_agent() -> MockServer {
    let server = MockServer::start().await;
    mount_rpc(
        &server,
        "initialize",
        json!({
            "protocolVersion": "2025-03-26",
            "capabilities": { "tools": {}, "resources": {} },
            "serverInfo": { "name": "code-agent", "version": "1.0.0" }
        }),
    )
    .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "notifications/initialized" })))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;
    mount_rpc(
        &server,
        "tools/list",
        json!({ "tools": [
            { "name": "generate_code", "description": "Generate code", "inputSchema": { "type": "object" } }
        ] }),
    )
    .await;
    mount_rpc(
        &server,
        "resources/list",
        json!({ "resources": [ { "uri": "file:///README.md", "name": "readme" } ] }),
    )
    .await;
    server
}

fn transport() -> Arc<dyn McpTransport> {
    Arc::new(HttpTransport::new(Duration::from_secs(5)).unwrap())
}

fn connection(server: &MockServer) -> AgentConnection {
    AgentConnection::new(
        "code-agent",
        format!("{}/mcp", server.uri()),
        transport(),
        EventBus::new(),
        Duration::from_secs(5),
        Duration::from_secs(5),
    )
}

// ---------------------------------------------------------------------------
// Handshake and discovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_discovers_capabilities() {
    let server = mock_agent().await;
    let conn = connection(&server);

    assert!(conn.connect().await);
    assert_eq!(conn.status(), AgentStatus::Online);
    assert!(conn.has_tool("generate_code"));
    assert!(!conn.has_tool("write_file"));
    assert_eq!(conn.resources()[0].uri, "file:///README.md");
    assert!(conn.connected_at().is_some());
}

#[tokio::test]
async fn test_session_header_is_echoed() {
    let server = mock_agent().await;
    Mock::given(method("POST"))
        .and(header("mcp-session-id", "session-123"))
        .and(body_partial_json(json!({ "method": "tools/call" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 5,
            "result": { "content": [ { "type": "text", "text": "fn main() {}" } ], "isError": false }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let conn = connection(&server);
    assert!(conn.connect().await);

    let resp = conn
        .call_tool("generate_code", json!({ "task_description": "hello" }))
        .await;
    assert!(resp.success);
    assert_eq!(resp.text(), "fn main() {}");
}

#[tokio::test]
async fn test_event_stream_response() {
    let server = mock_agent().await;
    let body = "event: message\n\
                data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\",\"params\":{}}\n\n\
                event: message\n\
                data: {\"jsonrpc\":\"2.0\",\"id\":5,\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"streamed\"}]}}\n\n";
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "tools/call" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"),
        )
        .mount(&server)
        .await;

    let conn = connection(&server);
    assert!(conn.connect().await);
    let resp = conn.call_tool("generate_code", json!({})).await;
    assert!(resp.success);
    assert_eq!(resp.text(), "streamed");
}

// ---------------------------------------------------------------------------
// Failure shapes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rpc_error_becomes_failed_response() {
    let server = mock_agent().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "tools/call" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 5,
            "error": { "code": -32602, "message": "Unknown tool: nope" }
        })))
        .mount(&server)
        .await;

    let conn = connection(&server);
    assert!(conn.connect().await);
    let resp = conn.call_tool("nope", json!({})).await;
    assert!(!resp.success);
    assert!(resp.error.unwrap().contains("Unknown tool: nope"));
    // A failed call does not take the agent offline.
    assert_eq!(conn.status(), AgentStatus::Online);
}

#[tokio::test]
async fn test_slow_tool_times_out() {
    let server = mock_agent().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "tools/call" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(2))
                .set_body_json(json!({ "jsonrpc": "2.0", "id": 5, "result": { "content": [] } })),
        )
        .mount(&server)
        .await;

    let conn = AgentConnection::new(
        "code-agent",
        format!("{}/mcp", server.uri()),
        transport(),
        EventBus::new(),
        Duration::from_secs(5),
        Duration::from_millis(200),
    );
    assert!(conn.connect().await);
    let resp = conn.call_tool("generate_code", json!({})).await;
    assert!(!resp.success);
    assert!(resp.error.unwrap().contains("exceeded"));
}

#[tokio::test]
async fn test_http_error_fails_connect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let conn = connection(&server);
    assert!(!conn.connect().await);
    assert_eq!(conn.status(), AgentStatus::Error);
    assert!(conn.last_error().unwrap().contains("HTTP 500"));
}

#[tokio::test]
async fn test_close_sends_delete_with_session() {
    let server = mock_agent().await;
    Mock::given(method("DELETE"))
        .and(header("mcp-session-id", "session-123"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let conn = connection(&server);
    assert!(conn.connect().await);
    conn.disconnect().await;
    conn.disconnect().await;
    assert_eq!(conn.status(), AgentStatus::Offline);
}

#[tokio::test]
async fn test_session_rejects_calls_after_close() {
    let server = mock_agent().await;
    let session = transport()
        .open(&format!("{}/mcp", server.uri()))
        .await
        .unwrap();
    session.initialize().await.unwrap();
    session.close().await;

    let err = session.list_tools().await.unwrap_err();
    assert!(matches!(err, SwitchboardError::Transport(_)));
}
