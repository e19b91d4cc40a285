//! Task orchestration for Switchboard.
//!
//! Turns a task description into an ordered skill plan, routes each step to
//! a capable online agent through the connection registry and folds the step
//! results into one report for human handoff.
//!
//! # Main types
//!
//! - [`Orchestrator`]: The analyze → select-agent → execute-step → aggregate state machine.
//! - [`OrchestratorState`]: Typed working set threaded through every transition.
//! - [`Planner`] / [`FallbackPlans`]: Skill list producers; the table is the safety net.
//! - [`SelectionPolicy`]: Pluggable agent choice, [`FirstMatchPolicy`] by default.
//! - [`Runtime`]: The bus, registry and orchestrator of one instance.

/// Skill vocabulary and argument shapes.
pub mod arguments;
/// TOML configuration.
pub mod config;
/// Project context for the planner.
pub mod context;
/// The orchestration state machine.
pub mod engine;
/// Planner trait, fallback table and LLM planner.
pub mod planner;
/// Runtime context object.
pub mod runtime;
/// Agent selection policies.
pub mod selection;
/// Plan, step and task types.
pub mod types;

pub use arguments::{ArgumentTable, SKILL_VOCABULARY};
pub use config::{AgentEntry, PlannerConfig, SwitchboardConfig};
pub use context::{ContextProvider, StaticContextProvider};
pub use engine::{CancelFlag, Orchestrator};
pub use planner::{FallbackPlans, LlmPlanner, Planner};
pub use runtime::Runtime;
pub use selection::{FirstMatchPolicy, Selection, SelectionPolicy};
pub use types::{
    OrchestratorResult, OrchestratorState, Plan, SelectionDecision, SelectionReason, Step,
    StepResult, StepStatus, TaskRequest, TaskStatus,
};
