use crate::types::SelectionReason;
use std::sync::Arc;
use switchboard_mcp::AgentConnection;

/// The agent chosen for a step and why.
#[derive(Debug, Clone)]
pub struct Selection {
    pub agent: Arc<AgentConnection>,
    pub reason: SelectionReason,
}

/// Picks the agent that runs a step.
///
/// `capable` holds the online agents declaring `skill`, `online` every
/// online agent; both are in registry order. Returning `None` fails the task.
pub trait SelectionPolicy: Send + Sync {
    fn select(
        &self,
        skill: &str,
        capable: &[Arc<AgentConnection>],
        online: &[Arc<AgentConnection>],
    ) -> Option<Selection>;
}

/// First capable agent, else the first online agent at all.
///
/// Not load-aware: the earliest registered agent takes every step it can.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstMatchPolicy;

impl SelectionPolicy for FirstMatchPolicy {
    fn select(
        &self,
        _skill: &str,
        capable: &[Arc<AgentConnection>],
        online: &[Arc<AgentConnection>],
    ) -> Option<Selection> {
        if let Some(agent) = capable.first() {
            return Some(Selection {
                agent: Arc::clone(agent),
                reason: SelectionReason::SkillMatch,
            });
        }
        online.first().map(|agent| Selection {
            agent: Arc::clone(agent),
            reason: SelectionReason::AnyOnlineFallback,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use switchboard_core::{EventBus, SwitchboardError, SwitchboardResult};
    use switchboard_mcp::{McpSession, McpTransport};

    struct Unreachable;

    #[async_trait]
    impl McpTransport for Unreachable {
        async fn open(&self, endpoint: &str) -> SwitchboardResult<Arc<dyn McpSession>> {
            Err(SwitchboardError::Transport(format!("unreachable: {endpoint}")))
        }
    }

    fn agent(id: &str) -> Arc<AgentConnection> {
        Arc::new(AgentConnection::new(
            id,
            format!("mem://{id}"),
            Arc::new(Unreachable),
            EventBus::new(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        ))
    }

    #[test]
    fn test_prefers_capable_agent() {
        let capable = vec![agent("reviewer")];
        let online = vec![agent("coder"), Arc::clone(&capable[0])];
        let sel = FirstMatchPolicy
            .select("review_code", &capable, &online)
            .unwrap();
        assert_eq!(sel.agent.agent_id(), "reviewer");
        assert_eq!(sel.reason, SelectionReason::SkillMatch);
    }

    #[test]
    fn test_falls_back_to_any_online() {
        let online = vec![agent("coder"), agent("tester")];
        let sel = FirstMatchPolicy.select("write_file", &[], &online).unwrap();
        assert_eq!(sel.agent.agent_id(), "coder");
        assert_eq!(sel.reason, SelectionReason::AnyOnlineFallback);
    }

    #[test]
    fn test_nothing_online() {
        assert!(FirstMatchPolicy.select("write_file", &[], &[]).is_none());
    }
}
