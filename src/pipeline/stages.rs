//! Stage descriptors for the fixed set of reasoning calls the pipeline makes.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Context key holding the raw email text.
pub const EMAIL: &str = "email";
/// Context key holding the JSON of the first classification.
pub const CLASSIFICATION_OUTPUT: &str = "classification_output";
/// Context key holding the JSON of the evaluation.
pub const EVALUATION_OUTPUT: &str = "evaluation_output";
/// Context key holding the number of test emails to generate.
pub const NUM_TESTS: &str = "num_tests";

/// One reasoning-engine call with its own template and schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classify,
    Evaluate,
    Refine,
    GenerateTests,
}

impl Stage {
    pub fn descriptor(&self) -> &'static StageDescriptor {
        match self {
            Self::Classify => &STAGES[0],
            Self::Evaluate => &STAGES[1],
            Self::Refine => &STAGES[2],
            Self::GenerateTests => &STAGES[3],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Evaluate => "evaluate",
            Self::Refine => "refine",
            Self::GenerateTests => "generate_tests",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which configured model serves a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Classifier,
    Evaluator,
}

/// Shape the stage's JSON answer must take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSchema {
    Classification,
    Evaluation,
    TestBatch,
}

impl OutputSchema {
    /// Format instruction appended to the rendered task prompt.
    pub fn instructions(&self) -> &'static str {
        match self {
            Self::Classification => {
                "Respond with ONLY a JSON object of this shape:\n\
                 {\"spam\": true|false, \"category\": \"Spam\"|\"Urgent\"|\"Not Urgent\"|\"To Read\", \
                 \"reasoning\": \"...\", \"suggested_response\": \"...\" or null}\n\
                 \"spam\" must be true exactly when \"category\" is \"Spam\"."
            }
            Self::Evaluation => {
                "Respond with ONLY a JSON object of this shape:\n\
                 {\"verdict\": \"Correct\"|\"Incorrect\"|\"Partially correct\", \"explanation\": \"...\", \
                 \"evaluator_classification\": \"Spam\"|\"Urgent\"|\"Not Urgent\"|\"To Read\", \
                 \"evaluator_spam\": true|false, \"suggested_correction\": \"...\" or null}"
            }
            Self::TestBatch => {
                "Respond with ONLY a JSON object of this shape:\n\
                 {\"tests\": [{\"email\": \"...\", \"expected\": \"Spam\"|\"Urgent\"|\"Not Urgent\"|\"To Read\", \
                 \"predicted\": \"Spam\"|\"Urgent\"|\"Not Urgent\"|\"To Read\", \"success\": true|false, \
                 \"reasoning\": \"...\"}], \"score\": <number of successful tests>, \"suggestion\": \"...\" or null}"
            }
        }
    }
}

/// Static description of a stage.
#[derive(Debug)]
pub struct StageDescriptor {
    pub stage: Stage,
    /// Key of the task template in the templates file.
    pub task_key: &'static str,
    /// Key of the agent template used when the task does not name one.
    pub agent_key: &'static str,
    /// Context keys the stage needs; each must appear as `{key}` in the task.
    pub required_context: &'static [&'static str],
    pub schema: OutputSchema,
    pub model_role: ModelRole,
}

/// All stages, in pipeline order.
pub static STAGES: [StageDescriptor; 4] = [
    StageDescriptor {
        stage: Stage::Classify,
        task_key: "classification_task",
        agent_key: "classifier",
        required_context: &[EMAIL],
        schema: OutputSchema::Classification,
        model_role: ModelRole::Classifier,
    },
    StageDescriptor {
        stage: Stage::Evaluate,
        task_key: "evaluation_task",
        agent_key: "evaluator",
        required_context: &[EMAIL, CLASSIFICATION_OUTPUT],
        schema: OutputSchema::Evaluation,
        model_role: ModelRole::Evaluator,
    },
    StageDescriptor {
        stage: Stage::Refine,
        task_key: "refine_classification_task",
        agent_key: "classifier",
        required_context: &[EMAIL, CLASSIFICATION_OUTPUT, EVALUATION_OUTPUT],
        schema: OutputSchema::Classification,
        model_role: ModelRole::Classifier,
    },
    StageDescriptor {
        stage: Stage::GenerateTests,
        task_key: "test_classification_task",
        agent_key: "tester",
        required_context: &[NUM_TESTS],
        schema: OutputSchema::TestBatch,
        model_role: ModelRole::Evaluator,
    },
];

/// Named values merged into a stage template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageContext {
    values: BTreeMap<String, String>,
}

impl StageContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Required keys of `stage` that are absent or blank.
    pub fn missing_for(&self, stage: Stage) -> Vec<&'static str> {
        stage
            .descriptor()
            .required_context
            .iter()
            .copied()
            .filter(|key| self.get(key).is_none_or(|v| v.trim().is_empty()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_are_in_pipeline_order() {
        let order: Vec<Stage> = STAGES.iter().map(|d| d.stage).collect();
        assert_eq!(
            order,
            vec![
                Stage::Classify,
                Stage::Evaluate,
                Stage::Refine,
                Stage::GenerateTests
            ]
        );
        for d in &STAGES {
            assert_eq!(d.stage.descriptor().task_key, d.task_key);
        }
    }

    #[test]
    fn refine_needs_both_prior_outputs() {
        let keys = Stage::Refine.descriptor().required_context;
        assert!(keys.contains(&CLASSIFICATION_OUTPUT));
        assert!(keys.contains(&EVALUATION_OUTPUT));
    }

    #[test]
    fn model_roles_split_by_stage() {
        assert_eq!(Stage::Classify.descriptor().model_role, ModelRole::Classifier);
        assert_eq!(Stage::Refine.descriptor().model_role, ModelRole::Classifier);
        assert_eq!(Stage::Evaluate.descriptor().model_role, ModelRole::Evaluator);
        assert_eq!(
            Stage::GenerateTests.descriptor().model_role,
            ModelRole::Evaluator
        );
    }

    #[test]
    fn missing_context_keys_reported() {
        let ctx = StageContext::new()
            .with(EMAIL, "hello")
            .with(CLASSIFICATION_OUTPUT, "  ");
        assert_eq!(
            ctx.missing_for(Stage::Refine),
            vec![CLASSIFICATION_OUTPUT, EVALUATION_OUTPUT]
        );
        assert!(ctx.missing_for(Stage::Classify).is_empty());
    }
}
