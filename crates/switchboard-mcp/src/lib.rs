//! Agent connectivity over the Model Context Protocol.
//!
//! Every agent is an independently hosted MCP server. This crate owns the
//! logical session to each of them and the registry that answers "which
//! agents exist and which of them can do X right now".
//!
//! # Main types
//!
//! - [`AgentConnection`]: Session, capability cache and tool invocation for one agent.
//! - [`ConnectionRegistry`]: All known agents, cross-agent queries and the health loop.
//! - [`McpTransport`] / [`McpSession`]: The wire seam; [`HttpTransport`] is the default.
//! - [`ToolResponse`]: Normalized tool outcome; transport faults arrive as data.

/// Streamable-HTTP MCP client.
pub mod client;
/// Per-agent connection and its lifecycle.
pub mod connection;
/// Connection registry, health summary and auto-reconnect.
pub mod manager;
/// JSON-RPC and MCP message types.
pub mod protocol;
/// Transport and session traits.
pub mod transport;

pub use client::{HttpSession, HttpTransport};
pub use connection::{AgentConnection, AgentStatus};
pub use manager::{
    AgentHealth, AgentResource, AgentTool, ConnectionConfig, ConnectionRegistry, HealthSummary,
};
pub use protocol::{
    Capabilities, ContentItem, Resource, ResourceContent, ResourceResponse, Tool, ToolResponse,
};
pub use transport::{McpSession, McpTransport};
