use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use switchboard_mcp::ToolResponse;
use uuid::Uuid;

/// Overall status of one task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Planning,
    Executing,
    Completed,
    /// Every step ran, at least one recorded an error.
    CompletedWithErrors,
    /// The plan could not proceed (no selectable agent, or cancelled).
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::CompletedWithErrors | TaskStatus::Failed
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Planning => write!(f, "planning"),
            TaskStatus::Executing => write!(f, "executing"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::CompletedWithErrors => write!(f, "completed_with_errors"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
}

/// One skill invocation of a [`Plan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based position in the plan.
    pub number: usize,
    pub skill: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResponse>,
}

/// Ordered skill steps plus the index of the next one to run.
///
/// The index only moves forward and never past the end; marking a step and
/// advancing happen in one call so the plan is never observed with an
/// advanced index over a still-pending step.
///
/// Deserializing re-checks that shape and rejects plans that break it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPlan")]
pub struct Plan {
    steps: Vec<Step>,
    current_step: usize,
}

#[derive(Deserialize)]
struct RawPlan {
    steps: Vec<Step>,
    current_step: usize,
}

impl TryFrom<RawPlan> for Plan {
    type Error = String;

    fn try_from(raw: RawPlan) -> Result<Self, Self::Error> {
        let RawPlan { steps, current_step } = raw;
        if current_step > steps.len() {
            return Err(format!(
                "current_step {current_step} is past the end of a {}-step plan",
                steps.len()
            ));
        }
        for (i, step) in steps.iter().enumerate() {
            if step.number != i + 1 {
                return Err(format!("step at position {} is numbered {}", i + 1, step.number));
            }
            let expected_ok = match i.cmp(&current_step) {
                std::cmp::Ordering::Less => step.status == StepStatus::Completed,
                std::cmp::Ordering::Equal => step.status != StepStatus::Completed,
                std::cmp::Ordering::Greater => step.status == StepStatus::Pending,
            };
            if !expected_ok {
                return Err(format!(
                    "step {} is {:?} but current_step is {current_step}",
                    step.number, step.status
                ));
            }
        }
        Ok(Self { steps, current_step })
    }
}

impl Plan {
    pub fn from_skills<I, S>(skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let steps = skills
            .into_iter()
            .enumerate()
            .map(|(i, skill)| Step {
                number: i + 1,
                skill: skill.into(),
                status: StepStatus::Pending,
                result: None,
            })
            .collect();
        Self {
            steps,
            current_step: 0,
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Zero-based index of the next step to run.
    pub fn current_index(&self) -> usize {
        self.current_step
    }

    pub fn current(&self) -> Option<&Step> {
        self.steps.get(self.current_step)
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_step >= self.steps.len()
    }

    pub fn skills(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.skill.as_str()).collect()
    }

    /// Record the outcome of the current step and move to the next one.
    pub fn complete_current(&mut self, result: ToolResponse) {
        if let Some(step) = self.steps.get_mut(self.current_step) {
            step.status = StepStatus::Completed;
            step.result = Some(result);
            self.current_step += 1;
        }
    }

    /// Mark the current step failed without advancing.
    pub fn fail_current(&mut self) {
        if let Some(step) = self.steps.get_mut(self.current_step) {
            step.status = StepStatus::Failed;
        }
    }
}

/// Audit record of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// 1-based step number.
    pub step: usize,
    pub agent_id: String,
    pub skill: String,
    /// Arguments sent to the tool.
    pub inputs: serde_json::Value,
    pub output: ToolResponse,
    pub timestamp: DateTime<Utc>,
}

impl StepResult {
    pub fn succeeded(&self) -> bool {
        self.output.success
    }
}

/// Why an agent was (or was not) picked for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    /// The agent declares the step's skill.
    SkillMatch,
    /// No online agent declares the skill; an arbitrary online agent was used.
    AnyOnlineFallback,
    NoAgents,
}

/// One entry of the selection log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionDecision {
    pub step: usize,
    pub skill: String,
    /// Agent ids considered, in registry order.
    pub candidates: Vec<String>,
    pub chosen: Option<String>,
    pub reason: SelectionReason,
    pub timestamp: DateTime<Utc>,
}

/// A unit of work submitted to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_id: String,
    pub task_type: String,
    pub description: String,
    #[serde(default)]
    pub input_data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub subtask_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            description: description.into(),
            input_data: serde_json::Map::new(),
            team_id: None,
            user_id: None,
            subtask_id: None,
            project_id: None,
        }
    }

    pub fn with_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.input_data.insert(key.into(), value.into());
        self
    }

    pub fn with_team(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_subtask(mut self, subtask_id: impl Into<String>) -> Self {
        self.subtask_id = Some(subtask_id.into());
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

/// The working set threaded through every state-machine transition.
#[derive(Debug, Clone)]
pub struct OrchestratorState {
    pub task: TaskRequest,
    pub plan: Plan,
    pub step_results: Vec<StepResult>,
    pub status: TaskStatus,
    /// Agent picked for the current step, cleared once the step ran.
    pub selected_agent: Option<String>,
    pub selection_log: Vec<SelectionDecision>,
    pub final_result: Option<String>,
    pub error: Option<String>,
}

impl OrchestratorState {
    pub fn new(task: TaskRequest) -> Self {
        Self {
            task,
            plan: Plan::default(),
            step_results: Vec::new(),
            status: TaskStatus::Pending,
            selected_agent: None,
            selection_log: Vec::new(),
            final_result: None,
            error: None,
        }
    }

    /// Whether the walk should stop selecting agents and aggregate.
    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Failed || self.plan.is_exhausted()
    }
}

/// What [`Orchestrator::execute`](crate::Orchestrator::execute) hands back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub steps: Vec<StepResult>,
    pub plan: Plan,
    pub selection_log: Vec<SelectionDecision>,
}

impl From<OrchestratorState> for OrchestratorResult {
    fn from(state: OrchestratorState) -> Self {
        Self {
            task_id: state.task.task_id,
            status: state.status,
            result: state.final_result,
            error: state.error,
            steps: state.step_results,
            plan: state.plan,
            selection_log: state.selection_log,
        }
    }
}
