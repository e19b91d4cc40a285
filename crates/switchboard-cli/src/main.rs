//! `switchboard` binary: run a task against the configured agents or inspect
//! the agent pool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use switchboard_core::{handler_fn, Event, SwitchboardError};
use switchboard_orchestrator::{Runtime, SwitchboardConfig, TaskRequest, TaskStatus};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "switchboard", about = "Switchboard: multi-agent task orchestrator over MCP")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "switchboard.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan and execute one task, printing the result as JSON
    Run {
        /// Task type, e.g. code_review or bug_fix
        task_type: String,
        /// Free-form task description
        description: String,
        /// Input field as key=value; values are parsed as JSON when possible
        #[arg(short, long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,
        /// Project id passed to the planner context
        #[arg(long)]
        project: Option<String>,
    },
    /// Print the agent health summary
    Agents,
    /// List every tool exposed by online agents
    Tools,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let config = SwitchboardConfig::load(&cli.config).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load config file '{}': {e}",
            cli.config.display()
        )
    })?;

    let mut runtime = Runtime::from_config(config)?;
    runtime.bus().subscribe("*", event_logger());
    runtime.start().await;

    let outcome = match cli.command {
        Commands::Run {
            task_type,
            description,
            inputs,
            project,
        } => run_task(&runtime, task_type, description, &inputs, project).await,
        Commands::Agents => {
            let summary = runtime.registry().health_summary().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::Tools => {
            let tools = runtime.registry().all_tools().await;
            println!("{}", serde_json::to_string_pretty(&tools)?);
            Ok(())
        }
    };

    runtime.shutdown().await;
    outcome
}

async fn run_task(
    runtime: &Runtime,
    task_type: String,
    description: String,
    inputs: &[String],
    project: Option<String>,
) -> anyhow::Result<()> {
    let mut task = TaskRequest::new(task_type, description);
    for input in inputs {
        let (key, value) = parse_input(input)?;
        task = task.with_input(key, value);
    }
    if let Some(project) = project {
        task = task.with_project(project);
    }

    info!(task_id = %task.task_id, task_type = %task.task_type, "Running task");
    let result = runtime.orchestrator().execute(task).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.status == TaskStatus::Failed {
        anyhow::bail!(
            "Task {} failed: {}",
            result.task_id,
            result.error.unwrap_or_default()
        );
    }
    Ok(())
}

/// Split `key=value`; the value is JSON when it parses as JSON, otherwise a
/// plain string.
fn parse_input(raw: &str) -> anyhow::Result<(String, serde_json::Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Input '{raw}' is not in KEY=VALUE form"))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Input '{raw}' has an empty key");
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn event_logger() -> Arc<dyn switchboard_core::EventHandler> {
    handler_fn(|event: Arc<Event>| async move {
        info!(
            topic = event.topic(),
            event_id = %event.id,
            source = event.source.as_deref().unwrap_or("-"),
            target = event.target.as_deref().unwrap_or("-"),
            data = %event.data,
            "event"
        );
        Ok::<(), SwitchboardError>(())
    })
}
