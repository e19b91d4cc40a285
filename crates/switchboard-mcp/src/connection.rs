use crate::protocol::{Capabilities, Resource, ResourceResponse, Tool, ToolResponse};
use crate::transport::{McpSession, McpTransport};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{Event, EventBus, EventKind, SwitchboardError, SwitchboardResult, ORCHESTRATOR_SOURCE};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const CLIENT_SOURCE: &str = "mcp_client";

/// Lifecycle status of an agent connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Registered, not connected yet (or reconnecting).
    Pending,
    /// Session live and capabilities discovered.
    Online,
    /// Reported by the registry's health summary only; connections never
    /// enter it on their own.
    Busy,
    /// Session released by a disconnect.
    Offline,
    /// The last connect attempt failed.
    Error,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Pending => write!(f, "pending"),
            AgentStatus::Online => write!(f, "online"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Offline => write!(f, "offline"),
            AgentStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Default)]
struct ConnectionState {
    status: Option<AgentStatus>,
    capabilities: Capabilities,
    connected_at: Option<DateTime<Utc>>,
    last_activity: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// The logical session to exactly one remote agent.
///
/// Owns the transport session (opened by [`connect`](Self::connect), released
/// by [`disconnect`](Self::disconnect) or a failed connect) and the cached
/// capability set. None of its operations return a Rust error: faults are
/// reported through the status, the result shapes and `system.error` events.
pub struct AgentConnection {
    agent_id: String,
    endpoint: String,
    transport: Arc<dyn McpTransport>,
    bus: EventBus,
    connect_timeout: Duration,
    call_timeout: Duration,
    state: RwLock<ConnectionState>,
    /// Held across connect/disconnect and, for transports that are not
    /// concurrency-safe, across each call.
    session: Mutex<Option<Arc<dyn McpSession>>>,
}

impl AgentConnection {
    pub fn new(
        agent_id: impl Into<String>,
        endpoint: impl Into<String>,
        transport: Arc<dyn McpTransport>,
        bus: EventBus,
        connect_timeout: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            endpoint: endpoint.into(),
            transport,
            bus,
            connect_timeout,
            call_timeout,
            state: RwLock::new(ConnectionState::default()),
            session: Mutex::new(None),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn status(&self) -> AgentStatus {
        self.state.read().status.unwrap_or(AgentStatus::Pending)
    }

    pub fn is_online(&self) -> bool {
        self.status() == AgentStatus::Online
    }

    pub fn capabilities(&self) -> Capabilities {
        self.state.read().capabilities.clone()
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.state.read().capabilities.tools.clone()
    }

    pub fn resources(&self) -> Vec<Resource> {
        self.state.read().capabilities.resources.clone()
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().connected_at
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_activity
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.read().last_error.clone()
    }

    /// Look up a tool in the cached capability set. No I/O.
    pub fn get_tool(&self, name: &str) -> Option<Tool> {
        self.state.read().capabilities.tool(name).cloned()
    }

    /// Whether the cached capability set declares `name`. No I/O.
    pub fn has_tool(&self, name: &str) -> bool {
        self.state.read().capabilities.tool(name).is_some()
    }

    /// Open the session, run the handshake and discover capabilities.
    ///
    /// Any previously held session is released first. On failure the
    /// freshly opened session is closed again, the status becomes
    /// [`AgentStatus::Error`] and a `system.error` event is published.
    pub async fn connect(&self) -> bool {
        let mut slot = self.session.lock().await;
        if let Some(previous) = slot.take() {
            previous.close().await;
        }
        self.state.write().status = Some(AgentStatus::Pending);

        let session = match timeout(self.connect_timeout, self.transport.open(&self.endpoint)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return self.connect_failed(&e),
            Err(_) => return self.connect_failed(&self.connect_timed_out()),
        };

        let discovered = match timeout(self.connect_timeout, handshake(session.as_ref(), &self.agent_id)).await {
            Ok(result) => result,
            Err(_) => Err(self.connect_timed_out()),
        };

        match discovered {
            Ok(capabilities) => {
                let now = Utc::now();
                let (tools, resources) = {
                    let mut state = self.state.write();
                    state.status = Some(AgentStatus::Online);
                    state.connected_at = Some(now);
                    state.last_activity = Some(now);
                    state.last_error = None;
                    state.capabilities = capabilities;
                    (
                        names(&state.capabilities.tools, |t| &t.name),
                        names(&state.capabilities.resources, |r| &r.uri),
                    )
                };
                *slot = Some(session);

                info!(
                    agent_id = %self.agent_id,
                    endpoint = %self.endpoint,
                    tools = tools.len(),
                    resources = resources.len(),
                    "Agent connected"
                );
                self.bus.publish(
                    Event::new(
                        EventKind::AgentConnected,
                        serde_json::json!({
                            "agent_id": self.agent_id,
                            "capabilities": { "tools": tools, "resources": resources },
                        }),
                    )
                    .from(CLIENT_SOURCE),
                );
                true
            }
            Err(e) => {
                session.close().await;
                self.connect_failed(&e)
            }
        }
    }

    /// Release the session and go [`AgentStatus::Offline`].
    ///
    /// A connection that holds no session is left untouched, so calling this
    /// twice is harmless.
    pub async fn disconnect(&self) {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.take() else {
            debug!(agent_id = %self.agent_id, "Disconnect on a connection without a session");
            return;
        };
        session.close().await;
        self.state.write().status = Some(AgentStatus::Offline);

        info!(agent_id = %self.agent_id, "Agent disconnected");
        self.bus.publish(
            Event::new(
                EventKind::AgentDisconnected,
                serde_json::json!({ "agent_id": self.agent_id }),
            )
            .from(CLIENT_SOURCE),
        );
    }

    /// Re-list tools and resources on the live session. Falls back to a
    /// full [`connect`](Self::connect) when there is no session.
    pub async fn refresh_capabilities(&self) -> bool {
        let session = self.session.lock().await.as_ref().cloned();
        let Some(session) = session else {
            return self.connect().await;
        };

        match timeout(self.connect_timeout, discover(session.as_ref(), &self.agent_id)).await {
            Ok(capabilities) => {
                let (tools, resources) = {
                    let mut state = self.state.write();
                    state.capabilities = capabilities;
                    state.last_activity = Some(Utc::now());
                    (
                        names(&state.capabilities.tools, |t| &t.name),
                        names(&state.capabilities.resources, |r| &r.uri),
                    )
                };
                self.bus.publish(
                    Event::new(
                        EventKind::AgentCapabilitiesUpdated,
                        serde_json::json!({
                            "agent_id": self.agent_id,
                            "capabilities": { "tools": tools, "resources": resources },
                        }),
                    )
                    .from(CLIENT_SOURCE),
                );
                true
            }
            Err(_) => {
                warn!(agent_id = %self.agent_id, "Capability refresh timed out");
                false
            }
        }
    }

    /// Invoke a tool on the agent.
    ///
    /// Requires [`AgentStatus::Online`]. Transport faults and timeouts come
    /// back as `ToolResponse { success: false, error }`; a tool that flags its
    /// own result as an error comes back the same way with its content kept.
    pub async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> ToolResponse {
        if !self.is_online() {
            return ToolResponse::failure(format!("Agent {} is not online", self.agent_id));
        }

        let guard = self.session.lock().await;
        let Some(session) = guard.as_ref().cloned() else {
            return ToolResponse::failure(format!("Not connected to agent {}", self.agent_id));
        };
        let _serial = if session.supports_concurrent_calls() {
            drop(guard);
            None
        } else {
            Some(guard)
        };

        self.bus.publish(
            Event::new(
                EventKind::ToolCalled,
                serde_json::json!({
                    "agent_id": self.agent_id,
                    "tool_name": name,
                    "arguments": arguments,
                }),
            )
            .from(ORCHESTRATOR_SOURCE)
            .to(self.agent_id.clone()),
        );

        let response = match timeout(self.call_timeout, session.call_tool(name, arguments)).await {
            Ok(Ok(raw)) => {
                self.state.write().last_activity = Some(Utc::now());
                ToolResponse::from_call_result(&raw)
            }
            Ok(Err(e)) => self.call_failed("mcp_tool_call", name, &e),
            Err(_) => self.call_failed(
                "mcp_tool_call",
                name,
                &SwitchboardError::Timeout(format!(
                    "Tool '{name}' on agent {} exceeded {:?}",
                    self.agent_id, self.call_timeout
                )),
            ),
        };

        debug!(
            agent_id = %self.agent_id,
            tool = %name,
            success = response.success,
            "Tool call finished"
        );
        self.bus.publish(
            Event::new(
                EventKind::ToolResult,
                serde_json::json!({
                    "agent_id": self.agent_id,
                    "tool_name": name,
                    "result": response,
                }),
            )
            .from(self.agent_id.clone()),
        );

        response
    }

    /// Read a resource from the agent. Same failure contract as
    /// [`call_tool`](Self::call_tool).
    pub async fn read_resource(&self, uri: &str) -> ResourceResponse {
        if !self.is_online() {
            return ResourceResponse::failure(format!("Agent {} is not online", self.agent_id));
        }

        let guard = self.session.lock().await;
        let Some(session) = guard.as_ref().cloned() else {
            return ResourceResponse::failure(format!("Not connected to agent {}", self.agent_id));
        };
        let _serial = if session.supports_concurrent_calls() {
            drop(guard);
            None
        } else {
            Some(guard)
        };

        match timeout(self.call_timeout, session.read_resource(uri)).await {
            Ok(Ok(raw)) => {
                self.state.write().last_activity = Some(Utc::now());
                let response = ResourceResponse::from_read_result(&raw);
                self.bus.publish(
                    Event::new(
                        EventKind::ResourceRead,
                        serde_json::json!({
                            "agent_id": self.agent_id,
                            "uri": uri,
                            "content_count": response.contents.len(),
                        }),
                    )
                    .from(self.agent_id.clone()),
                );
                response
            }
            Ok(Err(e)) => self.read_failed(uri, &e),
            Err(_) => self.read_failed(
                uri,
                &SwitchboardError::Timeout(format!(
                    "Reading '{uri}' from agent {} exceeded {:?}",
                    self.agent_id, self.call_timeout
                )),
            ),
        }
    }

    fn read_failed(&self, uri: &str, e: &SwitchboardError) -> ResourceResponse {
        let failed = self.call_failed("mcp_resource_read", uri, e);
        ResourceResponse::failure(failed.error.unwrap_or_default())
    }

    fn connect_timed_out(&self) -> SwitchboardError {
        SwitchboardError::Timeout(format!(
            "Connecting to {} exceeded {:?}",
            self.endpoint, self.connect_timeout
        ))
    }

    fn connect_failed(&self, e: &SwitchboardError) -> bool {
        {
            let mut state = self.state.write();
            state.status = Some(AgentStatus::Error);
            state.last_error = Some(e.to_string());
        }
        error!(agent_id = %self.agent_id, endpoint = %self.endpoint, error = %e, "Agent connection failed");
        self.bus.publish(
            Event::new(
                EventKind::SystemError,
                serde_json::json!({
                    "agent_id": self.agent_id,
                    "error": e.to_string(),
                    "context": "mcp_connection",
                }),
            )
            .from(CLIENT_SOURCE),
        );
        false
    }

    fn call_failed(&self, context: &str, subject: &str, e: &SwitchboardError) -> ToolResponse {
        warn!(agent_id = %self.agent_id, subject = %subject, error = %e, "{context} failed");
        self.bus.publish(
            Event::new(
                EventKind::SystemError,
                serde_json::json!({
                    "agent_id": self.agent_id,
                    "error": e.to_string(),
                    "context": context,
                }),
            )
            .from(CLIENT_SOURCE)
            .to(self.agent_id.clone()),
        );
        ToolResponse::failure(e.to_string())
    }
}

impl std::fmt::Debug for AgentConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConnection")
            .field("agent_id", &self.agent_id)
            .field("endpoint", &self.endpoint)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

async fn handshake(session: &dyn McpSession, agent_id: &str) -> SwitchboardResult<Capabilities> {
    session.initialize().await?;
    Ok(discover(session, agent_id).await)
}

/// An agent that cannot list one of its capability kinds is treated as
/// having none of that kind.
async fn discover(session: &dyn McpSession, agent_id: &str) -> Capabilities {
    let tools = session.list_tools().await.unwrap_or_else(|e| {
        warn!(agent_id = %agent_id, error = %e, "tools/list failed");
        Vec::new()
    });
    let resources = session.list_resources().await.unwrap_or_else(|e| {
        debug!(agent_id = %agent_id, error = %e, "resources/list failed");
        Vec::new()
    });
    Capabilities { tools, resources }
}

fn names<T>(items: &[T], key: impl Fn(&T) -> &String) -> Vec<String> {
    items.iter().map(|i| key(i).clone()).collect()
}
