//! Stage instruction templates.
//!
//! Templates are authored in YAML: `agents` give the persona (role, goal,
//! backstory) and `tasks` give the instruction with `{name}` placeholders.
//! A built-in set ships in `config/stages.yaml`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::pipeline::stages::{STAGES, Stage, StageContext};

const BUILTIN_TEMPLATES: &str = include_str!("../config/stages.yaml");

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex"));

#[derive(Debug, Clone, Deserialize)]
struct AgentTemplate {
    role: String,
    goal: String,
    #[serde(default)]
    backstory: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TaskTemplate {
    description: String,
    #[serde(default)]
    expected_output: String,
    #[serde(default)]
    agent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TemplateFile {
    #[serde(default)]
    agents: HashMap<String, AgentTemplate>,
    #[serde(default)]
    tasks: HashMap<String, TaskTemplate>,
}

/// A rendered prompt pair for one stage call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePrompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone)]
struct ResolvedTemplate {
    agent: AgentTemplate,
    task: TaskTemplate,
}

/// Validated templates for every stage.
#[derive(Debug, Clone)]
pub struct StageTemplates {
    stages: HashMap<Stage, ResolvedTemplate>,
}

impl StageTemplates {
    /// The templates compiled into the binary.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_yaml(BUILTIN_TEMPLATES)
    }

    /// Load templates from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let templates = Self::from_yaml(&content)?;
        info!(path = %path.display(), "Loaded stage templates");
        Ok(templates)
    }

    /// Parse and validate templates.
    ///
    /// Fails when a stage has no task, the task's agent is undefined, or the
    /// description omits a context value the stage requires.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let file: TemplateFile =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        let mut stages = HashMap::with_capacity(STAGES.len());
        for descriptor in &STAGES {
            let task = file.tasks.get(descriptor.task_key).cloned().ok_or_else(|| {
                ConfigError::MissingTemplate {
                    stage: descriptor.stage,
                    task: descriptor.task_key.to_string(),
                }
            })?;

            let agent_key = task.agent.as_deref().unwrap_or(descriptor.agent_key);
            let agent = file.agents.get(agent_key).cloned().ok_or_else(|| {
                ConfigError::MissingAgent {
                    task: descriptor.task_key.to_string(),
                    agent: agent_key.to_string(),
                }
            })?;

            let declared = placeholders(&task.description);
            if let Some(missing) = descriptor
                .required_context
                .iter()
                .find(|key| !declared.iter().any(|d| d == *key))
            {
                return Err(ConfigError::MissingTemplateVariable {
                    task: descriptor.task_key.to_string(),
                    variable: missing.to_string(),
                });
            }

            debug!(stage = %descriptor.stage, agent = agent_key, "Resolved stage template");
            stages.insert(descriptor.stage, ResolvedTemplate { agent, task });
        }

        Ok(Self { stages })
    }

    /// Render the prompt for `stage` with the given context.
    ///
    /// Placeholders without a context value are left untouched.
    pub fn render(&self, stage: Stage, context: &StageContext) -> StagePrompt {
        let template = &self.stages[&stage];
        let schema = stage.descriptor().schema;

        let agent = &template.agent;
        let mut system = format!("You are a {}.\n\nGoal: {}", agent.role.trim(), agent.goal.trim());
        if !agent.backstory.trim().is_empty() {
            system.push_str("\n\n");
            system.push_str(agent.backstory.trim());
        }

        let mut user = substitute(template.task.description.trim(), context);
        if !template.task.expected_output.trim().is_empty() {
            user.push_str("\n\nExpected output: ");
            user.push_str(&substitute(template.task.expected_output.trim(), context));
        }
        user.push_str("\n\n");
        user.push_str(schema.instructions());

        StagePrompt { system, user }
    }
}

/// Placeholder names referenced in a template.
fn placeholders(text: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

fn substitute(text: &str, context: &StageContext) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &regex::Captures<'_>| {
            context
                .get(&caps[1])
                .map(str::to_string)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::{CLASSIFICATION_OUTPUT, EMAIL, EVALUATION_OUTPUT, NUM_TESTS};

    const MINIMAL: &str = r#"
agents:
  classifier: { role: sorter, goal: sort mail }
  evaluator: { role: reviewer, goal: review }
  tester: { role: tester, goal: test }
tasks:
  classification_task: { description: "Classify {email}" }
  evaluation_task: { description: "Check {classification_output} for {email}" }
  refine_classification_task:
    description: "Fix {classification_output} given {evaluation_output} for {email}"
  test_classification_task: { description: "Make {num_tests} emails" }
"#;

    #[test]
    fn builtin_templates_are_valid() {
        StageTemplates::builtin().unwrap();
    }

    #[test]
    fn minimal_templates_parse() {
        let templates = StageTemplates::from_yaml(MINIMAL).unwrap();
        let prompt = templates.render(
            Stage::Classify,
            &StageContext::new().with(EMAIL, "Win a free cruise!"),
        );
        assert!(prompt.system.contains("sorter"));
        assert!(prompt.user.starts_with("Classify Win a free cruise!"));
        assert!(prompt.user.contains("\"spam\""));
    }

    #[test]
    fn missing_task_is_config_error() {
        let yaml = MINIMAL.replace("test_classification_task", "other_task");
        let err = StageTemplates::from_yaml(&yaml).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingTemplate { stage: Stage::GenerateTests, .. }
        ));
    }

    #[test]
    fn missing_required_variable_is_config_error() {
        let yaml = MINIMAL.replace("given {evaluation_output} ", "");
        let err = StageTemplates::from_yaml(&yaml).unwrap_err();
        match err {
            ConfigError::MissingTemplateVariable { task, variable } => {
                assert_eq!(task, "refine_classification_task");
                assert_eq!(variable, EVALUATION_OUTPUT);
            }
            other => panic!("Expected MissingTemplateVariable, got {:?}", other),
        }
    }

    #[test]
    fn unknown_agent_is_config_error() {
        let yaml = MINIMAL.replace(
            "test_classification_task: { description: \"Make {num_tests} emails\" }",
            "test_classification_task: { description: \"Make {num_tests} emails\", agent: qa }",
        );
        let err = StageTemplates::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingAgent { .. }));
    }

    #[test]
    fn malformed_yaml_is_parse_error() {
        let err = StageTemplates::from_yaml("agents: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn render_threads_all_context_values() {
        let templates = StageTemplates::builtin().unwrap();
        let ctx = StageContext::new()
            .with(EMAIL, "Server down since 3am")
            .with(CLASSIFICATION_OUTPUT, r#"{"category":"To Read"}"#)
            .with(EVALUATION_OUTPUT, r#"{"verdict":"Incorrect"}"#);
        let prompt = templates.render(Stage::Refine, &ctx);
        assert!(prompt.user.contains("Server down since 3am"));
        assert!(prompt.user.contains(r#"{"category":"To Read"}"#));
        assert!(prompt.user.contains(r#"{"verdict":"Incorrect"}"#));
        assert!(!prompt.user.contains("{evaluation_output}"));
    }

    #[test]
    fn render_leaves_unknown_placeholders() {
        let templates = StageTemplates::from_yaml(MINIMAL).unwrap();
        let prompt = templates.render(Stage::GenerateTests, &StageContext::new());
        assert!(prompt.user.contains("{num_tests}"));
        let prompt = templates.render(
            Stage::GenerateTests,
            &StageContext::new().with(NUM_TESTS, "7"),
        );
        assert!(prompt.user.starts_with("Make 7 emails"));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stages.yaml");
        std::fs::write(&path, MINIMAL).unwrap();
        assert!(StageTemplates::load(&path).is_ok());

        let missing = dir.path().join("absent.yaml");
        assert!(matches!(
            StageTemplates::load(&missing),
            Err(ConfigError::Io(_))
        ));
    }
}
