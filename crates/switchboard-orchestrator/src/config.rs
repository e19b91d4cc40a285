use crate::arguments::{is_known_skill, ArgumentTable};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use switchboard_core::{SwitchboardError, SwitchboardResult, DEFAULT_CAPACITY, DEFAULT_HANDLER_TIMEOUT};
use switchboard_mcp::ConnectionConfig;

/// Environment variable consulted when `planner.api_key` is not set.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Top-level `switchboard.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SwitchboardConfig {
    #[serde(default)]
    pub event_bus: EventBusConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    /// Task type to skill list, merged over the built-in fallback table.
    #[serde(default)]
    pub fallback_plans: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventBusConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Per-handler deadline, also the grace period for draining on stop.
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_secs: u64,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}
fn default_handler_timeout() -> u64 {
    DEFAULT_HANDLER_TIMEOUT.as_secs()
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            handler_timeout_secs: default_handler_timeout(),
        }
    }
}

/// Language-model planner settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlannerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// Falls back to `ANTHROPIC_API_KEY` when unset.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default = "default_planner_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_true() -> bool {
    true
}
fn default_model_id() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_planner_timeout() -> u64 {
    30
}
fn default_max_tokens() -> u32 {
    1024
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_id: default_model_id(),
            api_key: None,
            api_base_url: None,
            timeout_secs: default_planner_timeout(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl PlannerConfig {
    pub fn base_url(&self) -> &str {
        self.api_base_url
            .as_deref()
            .unwrap_or("https://api.anthropic.com")
    }

    /// The configured key, else the environment's.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

/// An agent registered at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AgentEntry {
    pub id: String,
    pub endpoint: String,
    #[serde(default = "default_true")]
    pub connect: bool,
}

impl SwitchboardConfig {
    pub fn load(path: &Path) -> SwitchboardResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> SwitchboardResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| SwitchboardError::Config(format!("Invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject anything that would only fail once a task runs.
    pub fn validate(&self) -> SwitchboardResult<()> {
        ArgumentTable::builtin().validate()?;

        for (task_type, skills) in &self.fallback_plans {
            if skills.is_empty() {
                return Err(SwitchboardError::Config(format!(
                    "Fallback plan for '{task_type}' is empty"
                )));
            }
            if let Some(unknown) = skills.iter().find(|s| !is_known_skill(s)) {
                return Err(SwitchboardError::Config(format!(
                    "Fallback plan for '{task_type}' names unknown skill: {unknown}"
                )));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                return Err(SwitchboardError::Config("Agent id must not be empty".into()));
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(SwitchboardError::Config(format!(
                    "Duplicate agent id: {}",
                    agent.id
                )));
            }
        }

        if self.event_bus.capacity == 0 {
            return Err(SwitchboardError::Config(
                "event_bus.capacity must be at least 1".into(),
            ));
        }
        if self.event_bus.handler_timeout_secs == 0 {
            return Err(SwitchboardError::Config(
                "event_bus.handler_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = SwitchboardConfig::from_toml_str("").unwrap();
        assert_eq!(config.event_bus.capacity, 1000);
        assert_eq!(config.event_bus.handler_timeout_secs, 30);
        assert_eq!(config.connection.call_timeout_secs, 30);
        assert!(config.planner.enabled);
        assert_eq!(config.planner.timeout_secs, 30);
        assert_eq!(config.planner.base_url(), "https://api.anthropic.com");
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_full_file() {
        let config = SwitchboardConfig::from_toml_str(
            r#"
            [event_bus]
            capacity = 50

            [connection]
            call_timeout_secs = 10
            auto_reconnect = false

            [planner]
            enabled = false
            api_base_url = "http://localhost:9000"

            [fallback_plans]
            code_review = ["review_code"]

            [[agents]]
            id = "coder"
            endpoint = "http://localhost:8101/mcp"

            [[agents]]
            id = "tester"
            endpoint = "http://localhost:8102/mcp"
            connect = false
            "#,
        )
        .unwrap();
        assert_eq!(config.event_bus.capacity, 50);
        assert_eq!(config.connection.call_timeout_secs, 10);
        assert_eq!(config.connection.connect_timeout_secs, 30);
        assert!(!config.connection.auto_reconnect);
        assert!(!config.planner.enabled);
        assert_eq!(config.planner.base_url(), "http://localhost:9000");
        assert_eq!(config.fallback_plans["code_review"], vec!["review_code"]);
        assert!(config.agents[0].connect);
        assert!(!config.agents[1].connect);
    }

    #[test]
    fn test_unknown_fallback_skill_rejected() {
        let err = SwitchboardConfig::from_toml_str(
            r#"
            [fallback_plans]
            deploy = ["build_image", "write_file"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, SwitchboardError::Config(_)));
        assert!(err.to_string().contains("build_image"));
    }

    #[test]
    fn test_zero_handler_timeout_rejected() {
        let err = SwitchboardConfig::from_toml_str(
            r#"
            [event_bus]
            handler_timeout_secs = 0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("handler_timeout_secs"));
    }

    #[test]
    fn test_duplicate_agent_rejected() {
        let err = SwitchboardConfig::from_toml_str(
            r#"
            [[agents]]
            id = "coder"
            endpoint = "http://a"

            [[agents]]
            id = "coder"
            endpoint = "http://b"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Duplicate agent id: coder"));
    }

    #[test]
    fn test_configured_key_wins() {
        let planner = PlannerConfig {
            api_key: Some("sk-test".into()),
            ..PlannerConfig::default()
        };
        assert_eq!(planner.resolve_api_key().as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_example_config_is_valid() {
        let text = include_str!("../../../switchboard.example.toml");
        let config = SwitchboardConfig::from_toml_str(text).unwrap();
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents[0].id, "coder");
        assert!(config.agents[1].connect);
        assert_eq!(
            config.fallback_plans["bug_fix"],
            vec!["read_file", "generate_code", "run_tests"]
        );
    }
}
