use crate::arguments::ArgumentTable;
use crate::context::ContextProvider;
use crate::planner::{FallbackPlans, Planner};
use crate::selection::{FirstMatchPolicy, SelectionPolicy};
use crate::types::{
    OrchestratorResult, OrchestratorState, Plan, SelectionDecision, SelectionReason, StepResult,
    TaskRequest, TaskStatus,
};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use switchboard_core::{Event, EventBus, EventKind, ORCHESTRATOR_SOURCE};
use switchboard_mcp::{ConnectionRegistry, ContentItem, ToolResponse};
use tracing::{debug, info, warn};

const DEFAULT_PLANNER_TIMEOUT: Duration = Duration::from_secs(30);

/// Cooperative cancellation for one task execution.
///
/// Checked at the top of agent selection and of step execution; a set flag
/// ends the walk with status `failed` and error `"Task cancelled"`.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The plan → select → execute → aggregate state machine.
///
/// Many executions may run at once against the shared registry; each one
/// walks its own [`OrchestratorState`] strictly step by step.
pub struct Orchestrator {
    registry: Arc<ConnectionRegistry>,
    bus: EventBus,
    planner: Option<Arc<dyn Planner>>,
    planner_timeout: Duration,
    fallback: FallbackPlans,
    arguments: ArgumentTable,
    policy: Arc<dyn SelectionPolicy>,
    context: Option<Arc<dyn ContextProvider>>,
}

impl Orchestrator {
    /// An orchestrator with no planner (fallback table only), the built-in
    /// argument table and [`FirstMatchPolicy`].
    pub fn new(registry: Arc<ConnectionRegistry>, bus: EventBus) -> Self {
        Self {
            registry,
            bus,
            planner: None,
            planner_timeout: DEFAULT_PLANNER_TIMEOUT,
            fallback: FallbackPlans::builtin(),
            arguments: ArgumentTable::builtin(),
            policy: Arc::new(FirstMatchPolicy),
            context: None,
        }
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>, timeout: Duration) -> Self {
        self.planner = Some(planner);
        self.planner_timeout = timeout;
        self
    }

    pub fn with_fallback_plans(mut self, fallback: FallbackPlans) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn SelectionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_context_provider(mut self, context: Arc<dyn ContextProvider>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Run a task to a terminal status. Never fails: every fault ends up in
    /// the returned status, error and step results.
    pub async fn execute(&self, task: TaskRequest) -> OrchestratorResult {
        self.execute_cancellable(task, &CancelFlag::new()).await
    }

    /// [`execute`](Self::execute) with a cancellation hook.
    pub async fn execute_cancellable(&self, task: TaskRequest, cancel: &CancelFlag) -> OrchestratorResult {
        let start = Instant::now();
        info!(
            task_id = %task.task_id,
            task_type = %task.task_type,
            "Orchestrator: starting task"
        );
        self.publish(
            EventKind::TaskCreated,
            serde_json::json!({
                "task_id": task.task_id,
                "task_type": task.task_type,
                "subtask_id": task.subtask_id,
                "project_id": task.project_id,
            }),
        );

        let mut state = self.analyze(OrchestratorState::new(task)).await;
        while !state.is_done() {
            state = self.select_agent(state, cancel).await;
            if state.selected_agent.is_none() {
                break;
            }
            state = self.execute_step(state, cancel).await;
        }
        let state = self.aggregate(state);

        info!(
            task_id = %state.task.task_id,
            status = %state.status,
            steps = state.step_results.len(),
            duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Orchestrator: task finished"
        );
        state.into()
    }

    /// pending → planning: obtain the skill list and build the plan.
    pub async fn analyze(&self, mut state: OrchestratorState) -> OrchestratorState {
        info!(task_id = %state.task.task_id, "Orchestrator Phase 1: Planning");
        self.publish(
            EventKind::TaskStarted,
            serde_json::json!({
                "task_id": state.task.task_id,
                "task_type": state.task.task_type,
            }),
        );

        let skills = self.plan_skills(&state.task).await;
        info!(
            task_id = %state.task.task_id,
            plan = ?skills,
            "Orchestrator: plan ready"
        );

        state.plan = Plan::from_skills(skills);
        state.step_results.clear();
        state.status = TaskStatus::Planning;
        state
    }

    async fn plan_skills(&self, task: &TaskRequest) -> Vec<String> {
        let Some(planner) = &self.planner else {
            return self.fallback.plan_for(&task.task_type);
        };

        let context = self.project_context(task).await;
        let planned = tokio::time::timeout(
            self.planner_timeout,
            planner.plan(&task.task_type, &task.description, context.as_deref()),
        )
        .await;

        match planned {
            Ok(Ok(skills)) => skills,
            Ok(Err(e)) => {
                warn!(task_id = %task.task_id, error = %e, "Planner failed, using fallback plan");
                self.fallback.plan_for(&task.task_type)
            }
            Err(_) => {
                warn!(
                    task_id = %task.task_id,
                    timeout_secs = self.planner_timeout.as_secs(),
                    "Planner timed out, using fallback plan"
                );
                self.fallback.plan_for(&task.task_type)
            }
        }
    }

    async fn project_context(&self, task: &TaskRequest) -> Option<String> {
        let (Some(provider), Some(project_id)) = (&self.context, &task.project_id) else {
            return None;
        };
        match provider.render(project_id).await {
            Ok(context) => context,
            Err(e) => {
                warn!(project_id = %project_id, error = %e, "Project context unavailable");
                None
            }
        }
    }

    /// Pick the agent for the current step, or fail the task when no agent
    /// is online at all.
    pub async fn select_agent(&self, mut state: OrchestratorState, cancel: &CancelFlag) -> OrchestratorState {
        if cancel.is_cancelled() {
            return cancelled(state);
        }
        state.selected_agent = None;
        let Some((step_number, skill)) = state.plan.current().map(|s| (s.number, s.skill.clone())) else {
            return state;
        };

        let capable = self.registry.agents_with_tool(&skill).await;
        let online = self.registry.online_agents().await;
        let selection = self.policy.select(&skill, &capable, &online);

        let considered = if capable.is_empty() { &online } else { &capable };
        let candidates: Vec<String> = considered
            .iter()
            .map(|c| c.agent_id().to_string())
            .collect();

        let Some(selection) = selection else {
            let error = format!("No agents available for skill: {skill}");
            warn!(task_id = %state.task.task_id, skill = %skill, "{error}");
            self.publish(
                EventKind::SystemWarning,
                serde_json::json!({
                    "task_id": state.task.task_id,
                    "message": error,
                }),
            );
            state.selection_log.push(SelectionDecision {
                step: step_number,
                skill,
                candidates,
                chosen: None,
                reason: SelectionReason::NoAgents,
                timestamp: Utc::now(),
            });
            state.plan.fail_current();
            state.status = TaskStatus::Failed;
            state.error = Some(error);
            return state;
        };

        let agent_id = selection.agent.agent_id().to_string();
        debug!(
            task_id = %state.task.task_id,
            skill = %skill,
            agent_id = %agent_id,
            reason = ?selection.reason,
            "Agent selected"
        );
        self.bus.publish(
            Event::new(
                EventKind::TaskAssigned,
                serde_json::json!({
                    "task_id": state.task.task_id,
                    "agent_id": agent_id,
                    "tool": skill,
                    "reason": selection.reason,
                }),
            )
            .from(ORCHESTRATOR_SOURCE)
            .to(agent_id.clone()),
        );
        state.selection_log.push(SelectionDecision {
            step: step_number,
            skill,
            candidates,
            chosen: Some(agent_id.clone()),
            reason: selection.reason,
            timestamp: Utc::now(),
        });
        state.selected_agent = Some(agent_id);
        state.status = TaskStatus::Executing;
        state
    }

    /// Run the current step on the selected agent and advance.
    ///
    /// A tool that answers with an error still completes the step; the error
    /// is kept in the step result and downgrades the final status.
    pub async fn execute_step(&self, mut state: OrchestratorState, cancel: &CancelFlag) -> OrchestratorState {
        if cancel.is_cancelled() {
            return cancelled(state);
        }
        let selected = state.selected_agent.take();
        let current = state.plan.current().map(|s| (s.number, s.skill.clone()));
        let (Some(agent_id), Some((step_number, skill))) = (selected, current) else {
            state.status = TaskStatus::Failed;
            state.error = Some("No agent or tool selected".to_string());
            return state;
        };

        info!(
            task_id = %state.task.task_id,
            step = step_number,
            total = state.plan.len(),
            skill = %skill,
            agent_id = %agent_id,
            "Orchestrator Phase 2: Executing step"
        );

        let (inputs, output) = match self.arguments.prepare(&skill, &state.task.input_data) {
            Ok(arguments) => {
                let output = self
                    .registry
                    .call_tool(&agent_id, &skill, arguments.clone())
                    .await;
                (arguments, output)
            }
            Err(e) => (
                serde_json::Value::Object(state.task.input_data.clone()),
                ToolResponse::failure(e.to_string()),
            ),
        };
        if !output.success {
            warn!(
                task_id = %state.task.task_id,
                skill = %skill,
                agent_id = %agent_id,
                error = output.error.as_deref().unwrap_or("unknown"),
                "Step recorded an error"
            );
        }

        state.plan.complete_current(output.clone());
        state.step_results.push(StepResult {
            step: step_number,
            agent_id: agent_id.clone(),
            skill: skill.clone(),
            inputs,
            output: output.clone(),
            timestamp: Utc::now(),
        });

        self.publish(
            EventKind::TaskProgress,
            serde_json::json!({
                "task_id": state.task.task_id,
                "step": step_number,
                "total_steps": state.plan.len(),
                "skill": skill,
                "agent_id": agent_id,
                "result": output,
            }),
        );
        state
    }

    /// Build the report and settle the terminal status.
    pub fn aggregate(&self, mut state: OrchestratorState) -> OrchestratorState {
        info!(task_id = %state.task.task_id, "Orchestrator Phase 3: Aggregating");

        let parts: Vec<String> = state
            .step_results
            .iter()
            .flat_map(|r| {
                if r.output.success {
                    r.output
                        .content
                        .iter()
                        .filter_map(ContentItem::as_text)
                        .map(|text| format!("## {}\n{text}", r.skill))
                        .collect::<Vec<_>>()
                } else {
                    vec![format!(
                        "## {} (failed)\nError: {}",
                        r.skill,
                        r.output.error.as_deref().unwrap_or("Unknown error")
                    )]
                }
            })
            .collect();
        state.final_result = Some(if parts.is_empty() {
            "No results generated.".to_string()
        } else {
            parts.join("\n\n")
        });

        if state.status != TaskStatus::Failed {
            state.status = if state.step_results.iter().all(StepResult::succeeded) {
                TaskStatus::Completed
            } else {
                TaskStatus::CompletedWithErrors
            };
        }

        if state.status == TaskStatus::Failed {
            self.publish(
                EventKind::TaskFailed,
                serde_json::json!({
                    "task_id": state.task.task_id,
                    "subtask_id": state.task.subtask_id,
                    "status": state.status,
                    "error": state.error,
                    "step_count": state.step_results.len(),
                }),
            );
        } else {
            self.publish(
                EventKind::TaskCompleted,
                serde_json::json!({
                    "task_id": state.task.task_id,
                    "subtask_id": state.task.subtask_id,
                    "status": state.status,
                    "step_count": state.step_results.len(),
                    "handoff_required": true,
                }),
            );
        }
        state
    }

    fn publish(&self, kind: EventKind, data: serde_json::Value) {
        self.bus
            .publish(Event::new(kind, data).from(ORCHESTRATOR_SOURCE));
    }
}

fn cancelled(mut state: OrchestratorState) -> OrchestratorState {
    info!(task_id = %state.task.task_id, "Task cancelled");
    state.selected_agent = None;
    state.status = TaskStatus::Failed;
    state.error = Some("Task cancelled".to_string());
    state
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::StepStatus;
    use async_trait::async_trait;
    use switchboard_core::{SwitchboardError, SwitchboardResult};
    use switchboard_mcp::{ConnectionConfig, McpSession, McpTransport};

    struct NoAgents;

    #[async_trait]
    impl McpTransport for NoAgents {
        async fn open(&self, endpoint: &str) -> SwitchboardResult<Arc<dyn McpSession>> {
            Err(SwitchboardError::Transport(format!("unreachable: {endpoint}")))
        }
    }

    fn orchestrator() -> Orchestrator {
        let bus = EventBus::new();
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::new(NoAgents),
            bus.clone(),
            ConnectionConfig::default(),
        ));
        Orchestrator::new(registry, bus)
    }

    fn step_result(skill: &str, output: ToolResponse) -> StepResult {
        StepResult {
            step: 1,
            agent_id: "coder".into(),
            skill: skill.into(),
            inputs: serde_json::json!({}),
            output,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!flag.is_cancelled());
        clone.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_aggregate_report() {
        let orch = orchestrator();
        let mut state = OrchestratorState::new(TaskRequest::new("code_review", "Review"));
        state.step_results.push(step_result(
            "review_code",
            ToolResponse::ok(vec![
                ContentItem::Text { text: "Looks good".into() },
                ContentItem::Data { data: serde_json::json!({ "score": 9 }) },
            ]),
        ));
        state.step_results.push(step_result(
            "check_security",
            ToolResponse::failure("scanner offline"),
        ));

        let state = orch.aggregate(state);
        assert_eq!(state.status, TaskStatus::CompletedWithErrors);
        assert_eq!(
            state.final_result.as_deref(),
            Some("## review_code\nLooks good\n\n## check_security (failed)\nError: scanner offline")
        );
    }

    #[test]
    fn test_aggregate_without_results() {
        let orch = orchestrator();
        let state = orch.aggregate(OrchestratorState::new(TaskRequest::new("refactor", "x")));
        assert_eq!(state.status, TaskStatus::Completed);
        assert_eq!(state.final_result.as_deref(), Some("No results generated."));
    }

    #[test]
    fn test_aggregate_keeps_failed_status() {
        let orch = orchestrator();
        let mut state = OrchestratorState::new(TaskRequest::new("refactor", "x"));
        state.status = TaskStatus::Failed;
        state.error = Some("No agents available for skill: read_file".into());
        let state = orch.aggregate(state);
        assert_eq!(state.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_analyze_without_planner_uses_fallback() {
        let orch = orchestrator();
        let state = orch
            .analyze(OrchestratorState::new(TaskRequest::new("test_generation", "Cover parser")))
            .await;
        assert_eq!(state.status, TaskStatus::Planning);
        assert_eq!(state.plan.skills(), vec!["generate_tests", "run_tests"]);
        assert!(state.plan.steps().iter().all(|s| s.status == StepStatus::Pending));
    }

    #[tokio::test]
    async fn test_select_agent_with_nothing_online_fails() {
        let orch = orchestrator();
        let state = orch
            .analyze(OrchestratorState::new(TaskRequest::new("documentation", "Docs")))
            .await;
        let state = orch.select_agent(state, &CancelFlag::new()).await;
        assert_eq!(state.status, TaskStatus::Failed);
        assert_eq!(state.error.as_deref(), Some("No agents available for skill: generate_docs"));
        assert_eq!(state.selection_log[0].reason, SelectionReason::NoAgents);
        assert_eq!(state.plan.steps()[0].status, StepStatus::Failed);
        assert_eq!(state.plan.current_index(), 0);
    }

    #[tokio::test]
    async fn test_execute_step_without_selection() {
        let orch = orchestrator();
        let state = orch
            .analyze(OrchestratorState::new(TaskRequest::new("refactor", "x")))
            .await;
        let state = orch.execute_step(state, &CancelFlag::new()).await;
        assert_eq!(state.status, TaskStatus::Failed);
        assert_eq!(state.error.as_deref(), Some("No agent or tool selected"));
    }
}
