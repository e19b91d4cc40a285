//! MCP client over the streamable-HTTP transport: every JSON-RPC message is
//! POSTed to the agent endpoint and answered either as `application/json`
//! or as a `text/event-stream` carrying the response.

use crate::protocol::*;
use crate::transport::{McpSession, McpTransport};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{SwitchboardError, SwitchboardResult};
use tracing::{debug, info};

const SESSION_HEADER: &str = "mcp-session-id";
const MAX_LIST_PAGES: usize = 64;

/// Opens [`HttpSession`]s sharing one pooled HTTP client.
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport whose every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> SwitchboardResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| SwitchboardError::Transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn open(&self, endpoint: &str) -> SwitchboardResult<Arc<dyn McpSession>> {
        reqwest::Url::parse(endpoint).map_err(|e| {
            SwitchboardError::Transport(format!("Invalid agent endpoint '{endpoint}': {e}"))
        })?;
        Ok(Arc::new(HttpSession::new(self.http.clone(), endpoint)))
    }
}

/// One logical MCP session with an HTTP agent endpoint.
pub struct HttpSession {
    http: reqwest::Client,
    endpoint: String,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl HttpSession {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Session id assigned by the server during the handshake, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    async fn post(&self, body: &impl Serialize) -> SwitchboardResult<reqwest::Response> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SwitchboardError::Transport(format!(
                "Session to {} is closed",
                self.endpoint
            )));
        }

        let mut req = self
            .http
            .post(&self.endpoint)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(id) = self.session_id() {
            req = req.header(SESSION_HEADER, id);
        }

        let resp = req.send().await.map_err(map_http_error)?;

        if let Some(id) = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock() = Some(id.to_string());
        }

        let status = resp.status();
        if !status.is_success() {
            return Err(SwitchboardError::Transport(format!(
                "HTTP {} from {}",
                status, self.endpoint
            )));
        }
        Ok(resp)
    }

    /// Send a JSON-RPC request and return its `result`.
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> SwitchboardResult<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = RpcMessage::request(id, method, params);
        debug!(endpoint = %self.endpoint, method = %method, id = id, "MCP request");

        let resp = self.post(&req).await?;
        let is_stream = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let body = resp.text().await.map_err(map_http_error)?;

        let rpc = if is_stream {
            parse_event_stream(&body, id)?
        } else {
            serde_json::from_str::<RpcReply>(&body).map_err(|e| {
                SwitchboardError::Protocol(format!("Invalid JSON-RPC response to '{method}': {e}"))
            })?
        };
        rpc.into_result(method)
    }

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> SwitchboardResult<()> {
        let msg = RpcMessage::notification(method, params);
        self.post(&msg).await?;
        Ok(())
    }

    /// Follow `nextCursor` pagination of a `*/list` method.
    async fn list_all(&self, method: &str, field: &str) -> SwitchboardResult<Vec<serde_json::Value>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let result = self.request(method, params).await?;

            if let Some(page) = result.get(field).and_then(|v| v.as_array()) {
                items.extend(page.iter().cloned());
            }

            cursor = result
                .get("nextCursor")
                .and_then(|c| c.as_str())
                .map(str::to_string);
            if cursor.is_none() {
                break;
            }
        }

        Ok(items)
    }
}

#[async_trait]
impl McpSession for HttpSession {
    async fn initialize(&self) -> SwitchboardResult<InitializeResult> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "switchboard",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let result = self.request("initialize", Some(params)).await?;
        let init: InitializeResult = serde_json::from_value(result).map_err(|e| {
            SwitchboardError::Protocol(format!("Failed to parse initialize result: {e}"))
        })?;

        self.notify("notifications/initialized", None).await?;

        info!(
            endpoint = %self.endpoint,
            version = %init.protocol_version,
            server = init.server_name(),
            "MCP session initialized"
        );
        Ok(init)
    }

    async fn list_tools(&self) -> SwitchboardResult<Vec<Tool>> {
        self.list_all("tools/list", "tools")
            .await?
            .into_iter()
            .map(|t| {
                serde_json::from_value(t)
                    .map_err(|e| SwitchboardError::Protocol(format!("Failed to parse tool: {e}")))
            })
            .collect()
    }

    async fn list_resources(&self) -> SwitchboardResult<Vec<Resource>> {
        self.list_all("resources/list", "resources")
            .await?
            .into_iter()
            .map(|r| {
                serde_json::from_value(r).map_err(|e| {
                    SwitchboardError::Protocol(format!("Failed to parse resource: {e}"))
                })
            })
            .collect()
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> SwitchboardResult<CallToolResult> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });
        let result = self.request("tools/call", Some(params)).await?;
        serde_json::from_value(result)
            .map_err(|e| SwitchboardError::Protocol(format!("Failed to parse tool result: {e}")))
    }

    async fn read_resource(&self, uri: &str) -> SwitchboardResult<ReadResourceResult> {
        let result = self
            .request("resources/read", Some(serde_json::json!({ "uri": uri })))
            .await?;
        serde_json::from_value(result).map_err(|e| {
            SwitchboardError::Protocol(format!("Failed to parse resource contents: {e}"))
        })
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(id) = self.session_id() else {
            return;
        };
        // Servers that do not support explicit termination answer 405; either way we are done.
        match self
            .http
            .delete(&self.endpoint)
            .header(SESSION_HEADER, id)
            .send()
            .await
        {
            Ok(resp) => debug!(endpoint = %self.endpoint, status = %resp.status(), "MCP session terminated"),
            Err(e) => debug!(endpoint = %self.endpoint, error = %e, "MCP session termination failed"),
        }
    }

    fn supports_concurrent_calls(&self) -> bool {
        true
    }
}

fn map_http_error(e: reqwest::Error) -> SwitchboardError {
    if e.is_timeout() {
        SwitchboardError::Timeout(e.to_string())
    } else {
        SwitchboardError::Transport(e.to_string())
    }
}

/// Pick the response to request `id` out of an SSE body. Falls back to the
/// first response-shaped message when no id matches.
fn parse_event_stream(body: &str, id: u64) -> SwitchboardResult<RpcReply> {
    let body = body.replace("\r\n", "\n");
    let mut fallback = None;

    for event in body.split("\n\n") {
        let data = event
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim_start)
            .collect::<Vec<_>>()
            .join("\n");
        if data.is_empty() {
            continue;
        }

        match serde_json::from_str::<RpcReply>(&data) {
            Ok(resp) if resp.id == Some(id) => return Ok(resp),
            Ok(resp) if resp.is_answer() => {
                fallback.get_or_insert(resp);
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Skipping non-JSON-RPC event"),
        }
    }

    fallback.ok_or_else(|| {
        SwitchboardError::Protocol(format!("No JSON-RPC response for request {id} in event stream"))
    })
}
