use crate::config::SwitchboardConfig;
use crate::engine::Orchestrator;
use crate::planner::{FallbackPlans, LlmPlanner, Planner};
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{EventBus, SwitchboardResult};
use switchboard_mcp::{ConnectionRegistry, HttpTransport, McpTransport};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Everything one Switchboard instance shares: the bus, the registry and the
/// orchestrator built on top of them.
///
/// Built once at startup and handed to whatever needs it; two runtimes in
/// one process never share state.
pub struct Runtime {
    config: SwitchboardConfig,
    bus: EventBus,
    registry: Arc<ConnectionRegistry>,
    orchestrator: Orchestrator,
    health_loop: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Build a runtime that reaches agents over streamable HTTP.
    pub fn from_config(config: SwitchboardConfig) -> SwitchboardResult<Self> {
        let transport = HttpTransport::new(Duration::from_secs(
            config.connection.call_timeout_secs.max(config.connection.connect_timeout_secs),
        ))?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Build a runtime over any transport. Nothing is spawned or connected
    /// until [`start`](Self::start).
    pub fn with_transport(
        config: SwitchboardConfig,
        transport: Arc<dyn McpTransport>,
    ) -> SwitchboardResult<Self> {
        config.validate()?;

        let bus = EventBus::with_limits(
            config.event_bus.capacity,
            Duration::from_secs(config.event_bus.handler_timeout_secs),
        );
        let registry = Arc::new(ConnectionRegistry::new(
            transport,
            bus.clone(),
            config.connection.clone(),
        ));

        let mut orchestrator = Orchestrator::new(Arc::clone(&registry), bus.clone())
            .with_fallback_plans(FallbackPlans::builtin().merged(&config.fallback_plans));
        if let Some(planner) = build_planner(&config)? {
            orchestrator = orchestrator
                .with_planner(planner, Duration::from_secs(config.planner.timeout_secs));
        }

        Ok(Self {
            config,
            bus,
            registry,
            orchestrator,
            health_loop: None,
        })
    }

    /// Swap in a differently configured orchestrator over the same registry.
    pub fn map_orchestrator(mut self, f: impl FnOnce(Orchestrator) -> Orchestrator) -> Self {
        self.orchestrator = f(self.orchestrator);
        self
    }

    pub fn config(&self) -> &SwitchboardConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Start event dispatch, register the configured agents and start the
    /// health loop.
    pub async fn start(&mut self) {
        self.bus.start();

        for agent in &self.config.agents {
            self.registry
                .register(&agent.id, &agent.endpoint, agent.connect)
                .await;
        }

        if self.health_loop.is_none() {
            self.health_loop = Arc::clone(&self.registry).start_health_loop();
        }

        info!(
            agents = self.config.agents.len(),
            online = self.registry.online_agents().await.len(),
            "Switchboard runtime started"
        );
    }

    /// Stop the health loop, disconnect every agent and drain the bus.
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.health_loop.take() {
            handle.abort();
        }
        self.registry.close_all().await;
        self.bus.stop().await;
        info!("Switchboard runtime stopped");
    }
}

fn build_planner(config: &SwitchboardConfig) -> SwitchboardResult<Option<Arc<dyn Planner>>> {
    if !config.planner.enabled {
        return Ok(None);
    }
    let Some(api_key) = config.planner.resolve_api_key() else {
        warn!("Planner enabled but no API key configured; using fallback plans only");
        return Ok(None);
    };
    let planner = LlmPlanner::new(config.planner.clone(), api_key)?;
    Ok(Some(Arc::new(planner)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runtime_without_agents() {
        let mut config = SwitchboardConfig::default();
        config.planner.enabled = false;
        let mut runtime = Runtime::from_config(config).unwrap();
        runtime.start().await;

        assert!(runtime.bus().is_running());
        assert!(runtime.registry().is_empty().await);
        runtime.shutdown().await;
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = SwitchboardConfig::default();
        config.event_bus.capacity = 0;
        assert!(Runtime::from_config(config).is_err());
    }
}
