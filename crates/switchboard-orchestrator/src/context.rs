use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use switchboard_core::SwitchboardResult;

/// Renders shared project context (conventions, architecture notes, recent
/// decisions) as text the planner can read.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// `Ok(None)` when the project has no context.
    async fn render(&self, project_id: &str) -> SwitchboardResult<Option<String>>;
}

/// In-memory context keyed by project id.
#[derive(Debug, Default)]
pub struct StaticContextProvider {
    projects: RwLock<HashMap<String, String>>,
}

impl StaticContextProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, project_id: impl Into<String>, context: impl Into<String>) {
        self.projects.write().insert(project_id.into(), context.into());
    }
}

#[async_trait]
impl ContextProvider for StaticContextProvider {
    async fn render(&self, project_id: &str) -> SwitchboardResult<Option<String>> {
        Ok(self.projects.read().get(project_id).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticContextProvider::new();
        provider.set("proj-1", "Rust 2021, tokio, no unsafe");
        assert_eq!(
            provider.render("proj-1").await.unwrap().as_deref(),
            Some("Rust 2021, tokio, no unsafe")
        );
        assert!(provider.render("proj-2").await.unwrap().is_none());
    }
}
