use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source tag used for events emitted by the orchestration state machine.
pub const ORCHESTRATOR_SOURCE: &str = "orchestrator";

/// Closed set of lifecycle facts that flow through the [`EventBus`](crate::EventBus).
///
/// The dotted string form (`"agent.connected"`) is the subscription topic;
/// the part before the last dot is the wildcard prefix (`"agent.*"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// An agent was added to the registry.
    #[serde(rename = "agent.registered")]
    AgentRegistered,
    /// Handshake and capability discovery succeeded.
    #[serde(rename = "agent.connected")]
    AgentConnected,
    /// The transport session was released.
    #[serde(rename = "agent.disconnected")]
    AgentDisconnected,
    /// Capabilities were re-discovered for an already known agent.
    #[serde(rename = "agent.capabilities_updated")]
    AgentCapabilitiesUpdated,

    /// A task was accepted by the caller.
    #[serde(rename = "task.created")]
    TaskCreated,
    /// A plan step was routed to a concrete agent.
    #[serde(rename = "task.assigned")]
    TaskAssigned,
    /// Orchestration of a task began.
    #[serde(rename = "task.started")]
    TaskStarted,
    /// A plan step finished.
    #[serde(rename = "task.progress")]
    TaskProgress,
    /// All steps ran; the output needs human review.
    #[serde(rename = "task.completed")]
    TaskCompleted,
    /// The plan could not proceed.
    #[serde(rename = "task.failed")]
    TaskFailed,

    /// A remote tool invocation is about to be sent.
    #[serde(rename = "mcp.tool_called")]
    ToolCalled,
    /// A remote tool invocation returned (successfully or not).
    #[serde(rename = "mcp.tool_result")]
    ToolResult,
    /// A remote resource was read.
    #[serde(rename = "mcp.resource_read")]
    ResourceRead,

    /// A fault that was absorbed and turned into data.
    #[serde(rename = "system.error")]
    SystemError,
    /// A degraded path was taken.
    #[serde(rename = "system.warning")]
    SystemWarning,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 15] = [
        EventKind::AgentRegistered,
        EventKind::AgentConnected,
        EventKind::AgentDisconnected,
        EventKind::AgentCapabilitiesUpdated,
        EventKind::TaskCreated,
        EventKind::TaskAssigned,
        EventKind::TaskStarted,
        EventKind::TaskProgress,
        EventKind::TaskCompleted,
        EventKind::TaskFailed,
        EventKind::ToolCalled,
        EventKind::ToolResult,
        EventKind::ResourceRead,
        EventKind::SystemError,
        EventKind::SystemWarning,
    ];

    /// The topic string for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AgentRegistered => "agent.registered",
            EventKind::AgentConnected => "agent.connected",
            EventKind::AgentDisconnected => "agent.disconnected",
            EventKind::AgentCapabilitiesUpdated => "agent.capabilities_updated",
            EventKind::TaskCreated => "task.created",
            EventKind::TaskAssigned => "task.assigned",
            EventKind::TaskStarted => "task.started",
            EventKind::TaskProgress => "task.progress",
            EventKind::TaskCompleted => "task.completed",
            EventKind::TaskFailed => "task.failed",
            EventKind::ToolCalled => "mcp.tool_called",
            EventKind::ToolResult => "mcp.tool_result",
            EventKind::ResourceRead => "mcp.resource_read",
            EventKind::SystemError => "system.error",
            EventKind::SystemWarning => "system.warning",
        }
    }

    /// The namespace before the last dot (`"agent"` for `agent.connected`).
    pub fn prefix(&self) -> &'static str {
        let topic = self.as_str();
        match topic.rfind('.') {
            Some(pos) => &topic[..pos],
            None => topic,
        }
    }

    /// Parse a topic string back into a kind.
    pub fn from_topic(topic: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == topic)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable fact about a lifecycle transition.
///
/// Built with [`Event::new`] plus the `from`/`to` builders, then handed to
/// [`EventBus::publish`](crate::EventBus::publish). Subscribers receive it
/// behind an `Arc` and cannot mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// What happened.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Kind-specific payload.
    pub data: serde_json::Value,
    /// Unique identifier for this event.
    pub id: Uuid,
    /// UTC timestamp of when the event was created.
    pub timestamp: DateTime<Utc>,
    /// Agent ID, `"orchestrator"`, or another component tag.
    pub source: Option<String>,
    /// Agent the event is about, when there is one.
    pub target: Option<String>,
}

impl Event {
    /// Creates an event with a fresh id and the current timestamp.
    pub fn new(kind: EventKind, data: serde_json::Value) -> Self {
        Self {
            kind,
            data,
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: None,
            target: None,
        }
    }

    /// Sets the emitting component.
    pub fn from(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the agent this event is addressed to.
    pub fn to(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// The subscription topic of this event.
    pub fn topic(&self) -> &'static str {
        self.kind.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_topic(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::from_topic("agent.unknown"), None);
    }

    #[test]
    fn test_prefix() {
        assert_eq!(EventKind::AgentConnected.prefix(), "agent");
        assert_eq!(EventKind::ToolResult.prefix(), "mcp");
        assert_eq!(EventKind::SystemWarning.prefix(), "system");
    }

    #[test]
    fn test_serde_matches_topic() {
        for kind in EventKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_event_builder() {
        let event = Event::new(EventKind::TaskAssigned, serde_json::json!({"task_id": "t-1"}))
            .from(ORCHESTRATOR_SOURCE)
            .to("agent-7");
        assert_eq!(event.topic(), "task.assigned");
        assert_eq!(event.source.as_deref(), Some("orchestrator"));
        assert_eq!(event.target.as_deref(), Some("agent-7"));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task.assigned");
        assert_eq!(json["data"]["task_id"], "t-1");
    }
}
