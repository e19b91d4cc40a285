//! Wire shapes for MCP over streamable HTTP, plus the normalized result
//! shapes handed to the rest of Switchboard.
//!
//! Every client message is one JSON-RPC 2.0 object POSTed to the agent
//! endpoint. The reply to a request arrives either as the JSON body itself
//! or as one `data:` line of a `text/event-stream` body; both decode into
//! [`RpcReply`].

use serde::{Deserialize, Serialize};
use std::fmt;
use switchboard_core::{SwitchboardError, SwitchboardResult};

/// Protocol revision sent in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// One POST body. Requests carry an `id` and get a reply; notifications
/// carry none and the agent answers with an empty `202 Accepted`.
#[derive(Debug, Clone, Serialize)]
pub struct RpcMessage<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<serde_json::Value>,
}

impl<'a> RpcMessage<'a> {
    pub fn request(id: u64, method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        }
    }

    pub fn notification(method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method,
            params,
        }
    }

    pub fn id(&self) -> Option<u64> {
        self.id
    }
}

/// A message read back from the agent. On an event stream this may also be
/// a server-initiated notification, which has neither `result` nor `error`.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcReply {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<RpcFault>,
}

impl RpcReply {
    /// Whether this answers a request, successfully or not.
    pub fn is_answer(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }

    /// Unwrap the `result` of a call to `method`. A JSON-RPC error object
    /// becomes [`SwitchboardError::Protocol`].
    pub fn into_result(self, method: &str) -> SwitchboardResult<serde_json::Value> {
        if let Some(fault) = self.error {
            return Err(SwitchboardError::Protocol(fault.to_string()));
        }
        self.result
            .ok_or_else(|| SwitchboardError::Protocol(format!("Empty {method} result")))
    }
}

/// The `error` member of a failed reply.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcFault {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for RpcFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MCP error {}: {}", self.code, self.message)
    }
}

/// A tool declared by an agent in its `tools/list` response.
///
/// Names are unique per agent; the registry relies on that for lookups.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema", skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
}

/// A resource declared by an agent in its `resources/list` response.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Resource {
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Cached capability set of one agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub tools: Vec<Tool>,
    pub resources: Vec<Resource>,
}

impl Capabilities {
    pub fn tool(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }
}

/// The part of the `initialize` answer the client looks at. Capability
/// flags are kept as raw JSON; listing is attempted regardless and a
/// missing method just yields an empty list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub server_info: Option<PeerInfo>,
    #[serde(default)]
    pub capabilities: serde_json::Map<String, serde_json::Value>,
}

impl InitializeResult {
    /// Agent name for logs.
    pub fn server_name(&self) -> &str {
        self.server_info.as_ref().map_or("unknown", |p| p.name.as_str())
    }

    /// Whether the agent advertised `feature` (`"tools"`, `"resources"`...).
    pub fn advertises(&self, feature: &str) -> bool {
        self.capabilities.contains_key(feature)
    }
}

/// `serverInfo` of the handshake.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Raw `tools/call` result. Content blocks are kept as JSON so unknown
/// block types do not fail the whole call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<serde_json::Value>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

/// Raw `resources/read` result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadResourceResult {
    #[serde(default)]
    pub contents: Vec<serde_json::Value>,
}

/// A normalized content block of a tool response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    Text { text: String },
    Data { data: serde_json::Value },
}

impl ContentItem {
    /// Normalize a raw MCP content block: `text` blocks stay text, anything
    /// carrying a `data` field becomes data, everything else is dropped.
    pub fn from_block(block: &serde_json::Value) -> Option<Self> {
        if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
            return Some(ContentItem::Text {
                text: text.to_string(),
            });
        }
        block
            .get("data")
            .map(|data| ContentItem::Data { data: data.clone() })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentItem::Text { text } => Some(text),
            ContentItem::Data { .. } => None,
        }
    }
}

/// Normalized outcome of a tool invocation.
///
/// Transport faults, timeouts and "agent not online" all arrive here as
/// `success == false` with an `error` string, never as a Rust error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResponse {
    pub fn ok(content: Vec<ContentItem>) -> Self {
        Self {
            success: true,
            content,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// A result the agent itself flagged with `isError`. The content is kept.
    pub fn from_call_result(result: &CallToolResult) -> Self {
        let content: Vec<ContentItem> = result
            .content
            .iter()
            .filter_map(ContentItem::from_block)
            .collect();
        if result.is_error {
            let error = content
                .iter()
                .filter_map(ContentItem::as_text)
                .collect::<Vec<_>>()
                .join("\n");
            Self {
                success: false,
                content,
                error: Some(if error.is_empty() {
                    "Tool reported an error".to_string()
                } else {
                    error
                }),
            }
        } else {
            Self::ok(content)
        }
    }

    /// All text blocks joined by newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentItem::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One content entry of a resource read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContent {
    pub uri: String,
    pub text: String,
    #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Normalized outcome of a resource read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceResponse {
    pub success: bool,
    #[serde(default)]
    pub contents: Vec<ResourceContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResourceResponse {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            contents: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Keep only text entries, as binary blobs are not forwarded.
    pub fn from_read_result(result: &ReadResourceResult) -> Self {
        let contents = result
            .contents
            .iter()
            .filter_map(|c| {
                let text = c.get("text")?.as_str()?;
                Some(ResourceContent {
                    uri: c
                        .get("uri")
                        .and_then(|u| u.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    text: text.to_string(),
                    mime_type: c
                        .get("mimeType")
                        .and_then(|m| m.as_str())
                        .map(str::to_string),
                })
            })
            .collect();
        Self {
            success: true,
            contents,
            error: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_request_and_notification_bodies() {
        let req = RpcMessage::request(1, "tools/call", Some(serde_json::json!({"name": "x"})));
        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(body["jsonrpc"], "2.0");
        assert_eq!(body["id"], 1);
        assert_eq!(body["method"], "tools/call");
        assert_eq!(body["params"]["name"], "x");

        let note = RpcMessage::notification("notifications/initialized", None);
        assert_eq!(note.id(), None);
        let body = serde_json::to_value(&note).unwrap();
        assert!(body.get("id").is_none());
        assert!(body.get("params").is_none());
    }

    #[test]
    fn test_reply_into_result() {
        let ok: RpcReply = serde_json::from_str(r#"{"jsonrpc":"2.0","id":3,"result":{"tools":[]}}"#).unwrap();
        assert!(ok.is_answer());
        assert!(ok.into_result("tools/list").unwrap()["tools"].is_array());

        let fault: RpcReply = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32601,"message":"Method not found"}}"#,
        )
        .unwrap();
        let err = fault.into_result("resources/list").unwrap_err();
        assert_eq!(err.to_string(), "Protocol error: MCP error -32601: Method not found");

        let progress: RpcReply =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#).unwrap();
        assert!(!progress.is_answer());
        assert!(progress.into_result("tools/call").is_err());
    }

    #[test]
    fn test_initialize_result_camel_case() {
        let init: InitializeResult = serde_json::from_str(
            r#"{"protocolVersion":"2025-03-26","serverInfo":{"name":"coder"},"capabilities":{"tools":{}}}"#,
        )
        .unwrap();
        assert_eq!(init.server_name(), "coder");
        assert!(init.advertises("tools"));
        assert!(!init.advertises("resources"));

        let bare: InitializeResult = serde_json::from_str(r#"{"protocolVersion":"2024-11-05"}"#).unwrap();
        assert_eq!(bare.server_name(), "unknown");
    }

    #[test]
    fn test_tool_parse_optional_fields() {
        let tool: Tool = serde_json::from_str(r#"{"name":"generate_code"}"#).unwrap();
        assert_eq!(tool.name, "generate_code");
        assert!(tool.description.is_none());
        assert!(tool.input_schema.is_none());

        let tool: Tool = serde_json::from_str(
            r#"{"name":"read_file","description":"Read","inputSchema":{"type":"object"}}"#,
        )
        .unwrap();
        assert_eq!(tool.description.as_deref(), Some("Read"));
        assert_eq!(tool.input_schema.unwrap()["type"], "object");
    }

    #[test]
    fn test_tool_response_normalization() {
        let raw: CallToolResult = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"hello"},{"type":"image","data":"aGk=","mimeType":"image/png"},{"type":"audio"}],"isError":false}"#,
        )
        .unwrap();
        let resp = ToolResponse::from_call_result(&raw);
        assert!(resp.success);
        assert_eq!(resp.content.len(), 2);
        assert_eq!(resp.text(), "hello");
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_tool_response_is_error_keeps_content() {
        let raw: CallToolResult = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"file not found"}],"isError":true}"#,
        )
        .unwrap();
        let resp = ToolResponse::from_call_result(&raw);
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("file not found"));
        assert_eq!(resp.content.len(), 1);
    }

    #[test]
    fn test_tool_response_wire_shape() {
        let json = serde_json::to_value(ToolResponse::failure("Agent a-1 is not online")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Agent a-1 is not online");

        let json = serde_json::to_value(ToolResponse::ok(vec![ContentItem::Text {
            text: "done".into(),
        }]))
        .unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_resource_response_text_only() {
        let raw: ReadResourceResult = serde_json::from_str(
            r#"{"contents":[{"uri":"file:///a","text":"A","mimeType":"text/plain"},{"uri":"file:///b","blob":"AAA="}]}"#,
        )
        .unwrap();
        let resp = ResourceResponse::from_read_result(&raw);
        assert!(resp.success);
        assert_eq!(resp.contents.len(), 1);
        assert_eq!(resp.contents[0].mime_type.as_deref(), Some("text/plain"));
    }
}
