//! Skill vocabulary and the closed table that turns a task's input payload
//! into tool arguments.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use switchboard_core::{SwitchboardError, SwitchboardResult};

/// Every skill name a plan may contain.
pub const SKILL_VOCABULARY: &[&str] = &[
    "generate_code",
    "write_file",
    "review_code",
    "check_security",
    "suggest_improvements",
    "generate_tests",
    "run_tests",
    "generate_docs",
    "read_file",
    "search_code",
    "review_file",
];

pub fn is_known_skill(skill: &str) -> bool {
    SKILL_VOCABULARY.contains(&skill)
}

/// One argument of a skill: the first present input key wins, else `default`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub name: &'static str,
    pub sources: &'static [&'static str],
    pub default: &'static str,
}

const fn field(
    name: &'static str,
    sources: &'static [&'static str],
    default: &'static str,
) -> FieldRule {
    FieldRule {
        name,
        sources,
        default,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentShape {
    /// Hand the whole input payload to the tool.
    Passthrough,
    /// Build exactly these fields.
    Fields(Vec<FieldRule>),
}

/// Skill name to argument shape.
#[derive(Debug, Clone)]
pub struct ArgumentTable {
    shapes: BTreeMap<&'static str, ArgumentShape>,
}

impl ArgumentTable {
    pub fn builtin() -> Self {
        const PATH: &[&str] = &["file_path", "path"];
        let file = || ArgumentShape::Fields(vec![field("file_path", PATH, "")]);

        let mut shapes = BTreeMap::new();
        shapes.insert("read_file", file());
        shapes.insert("write_file", file());
        shapes.insert("review_file", file());
        shapes.insert(
            "generate_code",
            ArgumentShape::Fields(vec![
                field("task_description", &["description"], ""),
                field("language", &["language"], "python"),
            ]),
        );
        shapes.insert(
            "review_code",
            ArgumentShape::Fields(vec![
                field("code", &["code"], ""),
                field("language", &["language"], "python"),
            ]),
        );
        shapes.insert(
            "search_code",
            ArgumentShape::Fields(vec![
                field("directory", &["directory"], "."),
                field("pattern", &["pattern", "search"], ""),
            ]),
        );
        for skill in [
            "check_security",
            "suggest_improvements",
            "generate_tests",
            "run_tests",
            "generate_docs",
        ] {
            shapes.insert(skill, ArgumentShape::Passthrough);
        }
        Self { shapes }
    }

    pub fn shape(&self, skill: &str) -> Option<&ArgumentShape> {
        self.shapes.get(skill)
    }

    /// Check the table and the vocabulary describe the same skills.
    pub fn validate(&self) -> SwitchboardResult<()> {
        if let Some(extra) = self.shapes.keys().find(|s| !is_known_skill(s)) {
            return Err(SwitchboardError::Config(format!(
                "Argument rule for unknown skill: {extra}"
            )));
        }
        if let Some(missing) = SKILL_VOCABULARY.iter().find(|s| !self.shapes.contains_key(*s)) {
            return Err(SwitchboardError::Config(format!(
                "No argument rule for skill: {missing}"
            )));
        }
        Ok(())
    }

    /// Build the tool arguments for `skill` from a task's input payload.
    pub fn prepare(&self, skill: &str, input: &Map<String, Value>) -> SwitchboardResult<Value> {
        let shape = self
            .shapes
            .get(skill)
            .ok_or_else(|| SwitchboardError::Config(format!("Unknown skill: {skill}")))?;

        Ok(match shape {
            ArgumentShape::Passthrough => Value::Object(input.clone()),
            ArgumentShape::Fields(fields) => Value::Object(
                fields
                    .iter()
                    .map(|f| {
                        let value = f
                            .sources
                            .iter()
                            .find_map(|key| input.get(*key))
                            .cloned()
                            .unwrap_or_else(|| Value::String(f.default.to_string()));
                        (f.name.to_string(), value)
                    })
                    .collect(),
            ),
        })
    }
}

impl Default for ArgumentTable {
    fn default() -> Self {
        Self::builtin()
    }
}
