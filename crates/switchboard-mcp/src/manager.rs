use crate::connection::{AgentConnection, AgentStatus};
use crate::protocol::{Resource, ResourceResponse, Tool, ToolResponse};
use crate::transport::McpTransport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{BusStats, Event, EventBus, EventKind, SwitchboardError, SwitchboardResult};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Connection settings shared by every agent of a registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Bound on opening a session plus the handshake and discovery.
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Bound on a single tool call or resource read.
    #[serde(default = "default_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Let the health loop reconnect agents in `error`/`offline` state (default: true).
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    /// Health check interval in seconds (default: 60). Set to 0 to disable.
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,
    /// Connect attempts per reconnection before giving up until the next check.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_health_interval() -> u64 {
    60
}
fn default_max_reconnect_attempts() -> u32 {
    5
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_timeout_secs(),
            call_timeout_secs: default_timeout_secs(),
            auto_reconnect: true,
            health_check_interval_secs: default_health_interval(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

/// A tool tagged with the agent that declares it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentTool {
    pub agent_id: String,
    #[serde(flatten)]
    pub tool: Tool,
}

/// A resource tagged with the agent that declares it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentResource {
    pub agent_id: String,
    #[serde(flatten)]
    pub resource: Resource,
}

/// Per-agent line of the [`HealthSummary`].
#[derive(Debug, Clone, Serialize)]
pub struct AgentHealth {
    pub agent_id: String,
    pub endpoint: String,
    pub status: AgentStatus,
    pub tool_count: usize,
    pub resource_count: usize,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub reconnect_count: usize,
    /// Disconnected on request; the health loop leaves it alone.
    pub held_offline: bool,
}

/// Snapshot of the registry for observability.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub total: usize,
    pub pending: usize,
    pub online: usize,
    pub busy: usize,
    pub offline: usize,
    pub error: usize,
    pub agents: Vec<AgentHealth>,
    /// Delivery counters of the event bus, including swallowed handler faults.
    pub event_bus: BusStats,
}

struct ManagedAgent {
    connection: Arc<AgentConnection>,
    reconnect_count: AtomicUsize,
    /// Set by an explicit disconnect, cleared by an explicit connect.
    held_offline: AtomicBool,
}

/// Agents keyed by id, plus registration order for first-match lookups.
#[derive(Default)]
struct Agents {
    by_id: HashMap<String, ManagedAgent>,
    order: Vec<String>,
}

impl Agents {
    fn in_order(&self) -> impl Iterator<Item = &ManagedAgent> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }
}

/// The addressable set of all known agents.
///
/// Registration and removal take the write lock; lookups and invocations only
/// clone the connection out under the read lock, so calls to different agents
/// run concurrently.
pub struct ConnectionRegistry {
    agents: RwLock<Agents>,
    transport: Arc<dyn McpTransport>,
    bus: EventBus,
    config: ConnectionConfig,
}

impl ConnectionRegistry {
    pub fn new(transport: Arc<dyn McpTransport>, bus: EventBus, config: ConnectionConfig) -> Self {
        Self {
            agents: RwLock::new(Agents::default()),
            transport,
            bus,
            config,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Register an agent, optionally connecting right away.
    ///
    /// Idempotent by `agent_id`: a known id returns the existing connection
    /// untouched, whatever `endpoint` and `connect_now` say.
    pub async fn register(
        &self,
        agent_id: &str,
        endpoint: &str,
        connect_now: bool,
    ) -> Arc<AgentConnection> {
        let connection = {
            let mut agents = self.agents.write().await;
            if let Some(existing) = agents.by_id.get(agent_id) {
                return Arc::clone(&existing.connection);
            }
            let connection = Arc::new(AgentConnection::new(
                agent_id,
                endpoint,
                Arc::clone(&self.transport),
                self.bus.clone(),
                Duration::from_secs(self.config.connect_timeout_secs),
                Duration::from_secs(self.config.call_timeout_secs),
            ));
            agents.by_id.insert(
                agent_id.to_string(),
                ManagedAgent {
                    connection: Arc::clone(&connection),
                    reconnect_count: AtomicUsize::new(0),
                    held_offline: AtomicBool::new(false),
                },
            );
            agents.order.push(agent_id.to_string());
            connection
        };

        info!(agent_id = %agent_id, endpoint = %endpoint, "Agent registered");
        self.bus.publish(Event::new(
            EventKind::AgentRegistered,
            serde_json::json!({ "agent_id": agent_id, "endpoint": endpoint }),
        ));

        if connect_now {
            connection.connect().await;
        }
        connection
    }

    /// Disconnect and forget an agent. Unknown ids are a no-op.
    pub async fn unregister(&self, agent_id: &str) -> bool {
        let removed = {
            let mut agents = self.agents.write().await;
            agents.order.retain(|id| id != agent_id);
            agents.by_id.remove(agent_id)
        };
        match removed {
            Some(managed) => {
                managed.connection.disconnect().await;
                info!(agent_id = %agent_id, "Agent unregistered");
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, agent_id: &str) -> Option<Arc<AgentConnection>> {
        self.agents
            .read()
            .await
            .by_id
            .get(agent_id)
            .map(|m| Arc::clone(&m.connection))
    }

    /// All connections in registration order.
    pub async fn connections(&self) -> Vec<Arc<AgentConnection>> {
        self.agents
            .read()
            .await
            .in_order()
            .map(|m| Arc::clone(&m.connection))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.by_id.is_empty()
    }

    /// Connect an agent and make it eligible for auto-reconnect again.
    pub async fn connect_agent(&self, agent_id: &str) -> bool {
        match self.get(agent_id).await {
            Some(connection) => {
                self.hold_offline(agent_id, false).await;
                connection.connect().await
            }
            None => false,
        }
    }

    /// Disconnect an agent and keep it offline: the health loop will not
    /// reconnect it until [`connect_agent`](Self::connect_agent) or
    /// [`reconnect`](Self::reconnect) is called for it.
    pub async fn disconnect_agent(&self, agent_id: &str) -> bool {
        match self.get(agent_id).await {
            Some(connection) => {
                self.hold_offline(agent_id, true).await;
                connection.disconnect().await;
                true
            }
            None => false,
        }
    }

    /// Disconnect then connect again, picking up fresh capabilities.
    pub async fn reconnect(&self, agent_id: &str) -> bool {
        let Some(connection) = self.get(agent_id).await else {
            return false;
        };
        self.hold_offline(agent_id, false).await;
        connection.disconnect().await;
        let connected = connection.connect().await;
        if connected {
            self.bump_reconnect_count(agent_id).await;
        }
        connected
    }

    /// Re-run capability discovery on the live session.
    pub async fn refresh_capabilities(&self, agent_id: &str) -> bool {
        match self.get(agent_id).await {
            Some(connection) => connection.refresh_capabilities().await,
            None => false,
        }
    }

    /// Online agents in registration order.
    pub async fn online_agents(&self) -> Vec<Arc<AgentConnection>> {
        self.agents
            .read()
            .await
            .in_order()
            .filter(|m| m.connection.is_online())
            .map(|m| Arc::clone(&m.connection))
            .collect()
    }

    /// Online agents declaring `tool_name`, in registration order.
    pub async fn agents_with_tool(&self, tool_name: &str) -> Vec<Arc<AgentConnection>> {
        self.agents
            .read()
            .await
            .in_order()
            .filter(|m| m.connection.is_online() && m.connection.has_tool(tool_name))
            .map(|m| Arc::clone(&m.connection))
            .collect()
    }

    /// Tools of every online agent.
    pub async fn all_tools(&self) -> Vec<AgentTool> {
        self.online_agents()
            .await
            .iter()
            .flat_map(|c| {
                c.tools().into_iter().map(move |tool| AgentTool {
                    agent_id: c.agent_id().to_string(),
                    tool,
                })
            })
            .collect()
    }

    /// Resources of every online agent.
    pub async fn all_resources(&self) -> Vec<AgentResource> {
        self.online_agents()
            .await
            .iter()
            .flat_map(|c| {
                c.resources().into_iter().map(move |resource| AgentResource {
                    agent_id: c.agent_id().to_string(),
                    resource,
                })
            })
            .collect()
    }

    /// Invoke a tool on a specific agent.
    ///
    /// Unknown and not-online agents come back as a failed response without
    /// any transport traffic.
    pub async fn call_tool(
        &self,
        agent_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> ToolResponse {
        let Some(connection) = self.get(agent_id).await else {
            return ToolResponse::failure(format!("Agent {agent_id} not found"));
        };
        if !connection.is_online() {
            return ToolResponse::failure(format!("Agent {agent_id} is not online"));
        }
        connection.call_tool(tool_name, arguments).await
    }

    /// Invoke a tool on the first online agent declaring it. Not fair and
    /// not weighted: the earliest registered capable agent always wins.
    pub async fn call_tool_on_any(&self, tool_name: &str, arguments: serde_json::Value) -> ToolResponse {
        match self.agents_with_tool(tool_name).await.first() {
            Some(connection) => connection.call_tool(tool_name, arguments).await,
            None => ToolResponse::failure(format!("No agent found with tool: {tool_name}")),
        }
    }

    pub async fn read_resource(&self, agent_id: &str, uri: &str) -> ResourceResponse {
        let Some(connection) = self.get(agent_id).await else {
            return ResourceResponse::failure(format!("Agent {agent_id} not found"));
        };
        if !connection.is_online() {
            return ResourceResponse::failure(format!("Agent {agent_id} is not online"));
        }
        connection.read_resource(uri).await
    }

    pub async fn health_summary(&self) -> HealthSummary {
        let agents = self.agents.read().await;
        let mut summary = HealthSummary {
            total: agents.by_id.len(),
            pending: 0,
            online: 0,
            busy: 0,
            offline: 0,
            error: 0,
            agents: Vec::with_capacity(agents.by_id.len()),
            event_bus: self.bus.stats(),
        };

        for managed in agents.in_order() {
            let c = &managed.connection;
            let status = c.status();
            match status {
                AgentStatus::Pending => summary.pending += 1,
                AgentStatus::Online => summary.online += 1,
                AgentStatus::Busy => summary.busy += 1,
                AgentStatus::Offline => summary.offline += 1,
                AgentStatus::Error => summary.error += 1,
            }
            let capabilities = c.capabilities();
            summary.agents.push(AgentHealth {
                agent_id: c.agent_id().to_string(),
                endpoint: c.endpoint().to_string(),
                status,
                tool_count: capabilities.tools.len(),
                resource_count: capabilities.resources.len(),
                connected_at: c.connected_at(),
                last_activity: c.last_activity(),
                last_error: c.last_error(),
                reconnect_count: managed.reconnect_count.load(Ordering::Relaxed),
                held_offline: managed.held_offline.load(Ordering::Relaxed),
            });
        }

        summary
    }

    /// Disconnect every agent and hold them offline. The registrations are
    /// kept.
    pub async fn close_all(&self) {
        let connections: Vec<Arc<AgentConnection>> = {
            let agents = self.agents.read().await;
            agents
                .in_order()
                .map(|m| {
                    m.held_offline.store(true, Ordering::Relaxed);
                    Arc::clone(&m.connection)
                })
                .collect()
        };
        for connection in connections {
            connection.disconnect().await;
        }
        info!("All agent connections closed");
    }

    /// Reconnect every agent left in `error` or `offline` state, except
    /// those disconnected on request. Does nothing when auto-reconnect is
    /// disabled.
    pub async fn health_check(&self) {
        if !self.config.auto_reconnect {
            return;
        }

        let unhealthy: Vec<Arc<AgentConnection>> = {
            let agents = self.agents.read().await;
            agents
                .in_order()
                .filter(|m| !m.held_offline.load(Ordering::Relaxed))
                .filter(|m| matches!(m.connection.status(), AgentStatus::Error | AgentStatus::Offline))
                .map(|m| Arc::clone(&m.connection))
                .collect()
        };

        for connection in unhealthy {
            warn!(
                agent_id = %connection.agent_id(),
                status = %connection.status(),
                "Agent unhealthy, attempting reconnection"
            );
            match reconnect_with_backoff(&connection, self.config.max_reconnect_attempts).await {
                Ok(()) => {
                    let count = self.bump_reconnect_count(connection.agent_id()).await;
                    info!(
                        agent_id = %connection.agent_id(),
                        reconnects = count,
                        "Agent reconnected"
                    );
                }
                Err(e) => {
                    error!(
                        agent_id = %connection.agent_id(),
                        error = %e,
                        "Agent reconnection failed after retries"
                    );
                }
            }
        }
    }

    /// Start the background health check loop. Returns `None` when the
    /// configured interval is 0.
    pub fn start_health_loop(self: Arc<Self>) -> Option<JoinHandle<()>> {
        if self.config.health_check_interval_secs == 0 {
            return None;
        }
        let interval = Duration::from_secs(self.config.health_check_interval_secs);
        Some(tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            // The first tick completes immediately; skip it so freshly
            // registered agents get a full interval to come up.
            timer.tick().await;
            loop {
                timer.tick().await;
                self.health_check().await;
            }
        }))
    }

    async fn hold_offline(&self, agent_id: &str, held: bool) {
        if let Some(managed) = self.agents.read().await.by_id.get(agent_id) {
            managed.held_offline.store(held, Ordering::Relaxed);
        }
    }

    async fn bump_reconnect_count(&self, agent_id: &str) -> usize {
        self.agents
            .read()
            .await
            .by_id
            .get(agent_id)
            .map_or(0, |m| m.reconnect_count.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Connect with exponential backoff: 1s, doubling, capped at 60s.
async fn reconnect_with_backoff(
    connection: &AgentConnection,
    max_attempts: u32,
) -> SwitchboardResult<()> {
    let mut delay = Duration::from_secs(1);

    for attempt in 1..=max_attempts {
        if connection.connect().await {
            return Ok(());
        }
        warn!(
            agent_id = %connection.agent_id(),
            attempt = attempt,
            max_attempts = max_attempts,
            delay_secs = delay.as_secs(),
            "Agent reconnect failed, retrying..."
        );
        if attempt < max_attempts {
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_secs(60));
        }
    }

    Err(SwitchboardError::Agent(format!(
        "Failed to reconnect agent '{}' after {max_attempts} attempts",
        connection.agent_id()
    )))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: ConnectionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ConnectionConfig::default());
        assert_eq!(config.connect_timeout_secs, 30);
        assert_eq!(config.call_timeout_secs, 30);
        assert!(config.auto_reconnect);
        assert_eq!(config.health_check_interval_secs, 60);
        assert_eq!(config.max_reconnect_attempts, 5);
    }

    #[test]
    fn test_config_custom_values() {
        let config: ConnectionConfig = serde_json::from_str(
            r#"{"auto_reconnect":false,"health_check_interval_secs":0,"call_timeout_secs":5}"#,
        )
        .unwrap();
        assert!(!config.auto_reconnect);
        assert_eq!(config.health_check_interval_secs, 0);
        assert_eq!(config.call_timeout_secs, 5);
        assert_eq!(config.connect_timeout_secs, 30);
    }

    #[test]
    fn test_agent_tool_serialization_is_flat() {
        let tagged = AgentTool {
            agent_id: "coder".into(),
            tool: Tool {
                name: "generate_code".into(),
                description: None,
                input_schema: None,
            },
        };
        let json = serde_json::to_value(&tagged).unwrap();
        assert_eq!(json["agent_id"], "coder");
        assert_eq!(json["name"], "generate_code");
    }
}
