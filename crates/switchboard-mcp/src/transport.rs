//! The seam between an [`AgentConnection`](crate::AgentConnection) and the
//! wire. The streamable-HTTP client in [`crate::client`] is the production
//! implementation; tests plug in in-memory sessions.

use crate::protocol::{CallToolResult, InitializeResult, ReadResourceResult, Resource, Tool};
use async_trait::async_trait;
use std::sync::Arc;
use switchboard_core::SwitchboardResult;

/// Opens sessions to agent endpoints.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Open a transport-level session to `endpoint`. No protocol traffic is
    /// required to have happened yet; the caller runs the handshake.
    async fn open(&self, endpoint: &str) -> SwitchboardResult<Arc<dyn McpSession>>;
}

/// A live session with one agent.
#[async_trait]
pub trait McpSession: Send + Sync {
    /// Protocol handshake (`initialize` + `notifications/initialized`).
    async fn initialize(&self) -> SwitchboardResult<InitializeResult>;

    /// `tools/list`.
    async fn list_tools(&self) -> SwitchboardResult<Vec<Tool>>;

    /// `resources/list`.
    async fn list_resources(&self) -> SwitchboardResult<Vec<Resource>>;

    /// `tools/call`.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> SwitchboardResult<CallToolResult>;

    /// `resources/read`.
    async fn read_resource(&self, uri: &str) -> SwitchboardResult<ReadResourceResult>;

    /// Release the session. Must be safe to call more than once.
    async fn close(&self);

    /// Whether two invocations may be in flight on this session at once.
    /// When `false` the connection serializes calls per agent.
    fn supports_concurrent_calls(&self) -> bool {
        false
    }
}
