use crate::arguments::{is_known_skill, SKILL_VOCABULARY};
use crate::config::PlannerConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use switchboard_core::{SwitchboardError, SwitchboardResult};
use tracing::debug;

/// Turns a task description into an ordered list of skill names.
///
/// Errors never reach the caller of the orchestrator: any `Err` (or a
/// timeout) is replaced by the [`FallbackPlans`] entry for the task type.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        task_type: &str,
        description: &str,
        context: Option<&str>,
    ) -> SwitchboardResult<Vec<String>>;
}

/// Static task type to skill list table used when no planner answer is usable.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackPlans {
    table: HashMap<String, Vec<String>>,
    default: Vec<String>,
}

impl FallbackPlans {
    pub fn builtin() -> Self {
        let table = [
            ("code_generation", &["generate_code", "write_file"][..]),
            (
                "code_review",
                &["review_code", "check_security", "suggest_improvements"][..],
            ),
            ("test_generation", &["generate_tests", "run_tests"][..]),
            ("documentation", &["generate_docs", "write_file"][..]),
            ("bug_fix", &["read_file", "search_code", "write_file"][..]),
            ("refactor", &["read_file", "review_code", "write_file"][..]),
            (
                "subtask_execution",
                &["read_file", "generate_code", "write_file"][..],
            ),
        ]
        .into_iter()
        .map(|(task_type, skills)| {
            (
                task_type.to_string(),
                skills.iter().map(|s| s.to_string()).collect(),
            )
        })
        .collect();

        Self {
            table,
            default: vec!["generate_code".to_string()],
        }
    }

    /// Override or add entries.
    pub fn merged(mut self, overrides: &HashMap<String, Vec<String>>) -> Self {
        for (task_type, skills) in overrides {
            self.table.insert(task_type.clone(), skills.clone());
        }
        self
    }

    /// The plan for `task_type`; unknown types get `["generate_code"]`.
    pub fn plan_for(&self, task_type: &str) -> Vec<String> {
        self.table
            .get(task_type)
            .unwrap_or(&self.default)
            .clone()
    }

    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.table.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl Default for FallbackPlans {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Planner backed by the Anthropic messages API.
pub struct LlmPlanner {
    config: PlannerConfig,
    api_key: String,
    http: reqwest::Client,
}

impl LlmPlanner {
    pub fn new(config: PlannerConfig, api_key: impl Into<String>) -> SwitchboardResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SwitchboardError::Planner(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            api_key: api_key.into(),
            http,
        })
    }

    fn prompt(task_type: &str, description: &str, context: Option<&str>) -> String {
        let mut prompt = format!(
            "You are an orchestration agent. Break the following software engineering task \
             into the tools autonomous agents should execute.\n\n\
             Task Type: {task_type}\n\
             Description: {description}\n"
        );
        if let Some(context) = context {
            prompt.push_str("\nProject context:\n");
            prompt.push_str(context);
            prompt.push('\n');
        }
        prompt.push_str(&format!(
            "\nAvailable tools: {}\n\n\
             Respond ONLY with a JSON array of tool names in execution order.\n\
             Example: [\"read_file\", \"generate_code\", \"write_file\"]",
            SKILL_VOCABULARY.join(", ")
        ));
        prompt
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(
        &self,
        task_type: &str,
        description: &str,
        context: Option<&str>,
    ) -> SwitchboardResult<Vec<String>> {
        let url = format!("{}/v1/messages", self.config.base_url());
        let body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "messages": [
                { "role": "user", "content": Self::prompt(task_type, description, context) }
            ],
        });

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| SwitchboardError::Planner(e.to_string()))?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SwitchboardError::Planner(e.to_string()))?;

        if !status.is_success() {
            return Err(SwitchboardError::Planner(format!(
                "Claude API error {status}: {resp_body}"
            )));
        }

        let text = resp_body["content"]
            .as_array()
            .into_iter()
            .flatten()
            .filter(|block| block["type"] == "text")
            .filter_map(|block| block["text"].as_str())
            .collect::<Vec<_>>()
            .join("");
        debug!(model = %self.config.model_id, response = %text, "Planner response");

        parse_skill_list(&text)
    }
}

/// Parse a model answer into a skill list. Accepts the array bare or inside
/// a markdown code fence; anything else, an empty list, or a skill outside
/// the vocabulary is a planner error.
pub fn parse_skill_list(text: &str) -> SwitchboardResult<Vec<String>> {
    let json = strip_fences(text);
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| SwitchboardError::Planner(format!("Planner output is not JSON: {e}")))?;

    let items = value
        .as_array()
        .ok_or_else(|| SwitchboardError::Planner("Planner output is not a JSON array".into()))?;
    if items.is_empty() {
        return Err(SwitchboardError::Planner("Planner returned an empty plan".into()));
    }

    items
        .iter()
        .map(|item| match item.as_str() {
            Some(skill) if is_known_skill(skill) => Ok(skill.to_string()),
            Some(skill) => Err(SwitchboardError::Planner(format!(
                "Planner chose unknown skill: {skill}"
            ))),
            None => Err(SwitchboardError::Planner(format!(
                "Planner output contains a non-string entry: {item}"
            ))),
        })
        .collect()
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after = &trimmed[start + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    match after.find("```") {
        Some(end) => after[..end].trim(),
        None => after.trim(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_fallbacks() {
        let plans = FallbackPlans::builtin();
        assert_eq!(
            plans.plan_for("code_review"),
            vec!["review_code", "check_security", "suggest_improvements"]
        );
        assert_eq!(
            plans.plan_for("bug_fix"),
            vec!["read_file", "search_code", "write_file"]
        );
        assert_eq!(plans.plan_for("translate_to_cobol"), vec!["generate_code"]);
        assert_eq!(plans.task_types().len(), 7);
    }

    #[test]
    fn test_builtin_fallbacks_use_known_skills() {
        let plans = FallbackPlans::builtin();
        for task_type in plans.task_types() {
            assert!(plans.plan_for(task_type).iter().all(|s| is_known_skill(s)));
        }
    }

    #[test]
    fn test_merged_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert("code_review".to_string(), vec!["review_code".to_string()]);
        overrides.insert("docs_only".to_string(), vec!["generate_docs".to_string()]);
        let plans = FallbackPlans::builtin().merged(&overrides);
        assert_eq!(plans.plan_for("code_review"), vec!["review_code"]);
        assert_eq!(plans.plan_for("docs_only"), vec!["generate_docs"]);
        assert_eq!(plans.plan_for("refactor").len(), 3);
    }

    #[test]
    fn test_parse_bare_and_fenced() {
        assert_eq!(
            parse_skill_list(r#"["read_file", "write_file"]"#).unwrap(),
            vec!["read_file", "write_file"]
        );
        assert_eq!(
            parse_skill_list("Here you go:\n```json\n[\"run_tests\"]\n```").unwrap(),
            vec!["run_tests"]
        );
        assert_eq!(
            parse_skill_list("```\n[\"generate_docs\"]\n```").unwrap(),
            vec!["generate_docs"]
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_skill_list(r#"{"tools": ["read_file"]}"#).is_err());
        assert!(parse_skill_list("[]").is_err());
        assert!(parse_skill_list(r#"["read_file", 3]"#).is_err());
        assert!(parse_skill_list("I would start by reading the file").is_err());
        let err = parse_skill_list(r#"["read_file", "deploy"]"#).unwrap_err();
        assert!(err.to_string().contains("unknown skill: deploy"));
    }

    #[test]
    fn test_prompt_mentions_context_and_vocabulary() {
        let prompt = LlmPlanner::prompt("bug_fix", "Crash on login", Some("Rust workspace"));
        assert!(prompt.contains("Task Type: bug_fix"));
        assert!(prompt.contains("Rust workspace"));
        assert!(prompt.contains("search_code"));
    }
}
