//! Error types for inbox-reasoner.

use std::time::Duration;

use crate::pipeline::stages::Stage;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),
}

/// Configuration-related errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("No template defined for task '{task}' ({stage} stage)")]
    MissingTemplate { stage: Stage, task: String },

    #[error("Task '{task}' references unknown agent '{agent}'")]
    MissingAgent { task: String, agent: String },

    #[error("Template for task '{task}' does not declare required variable {{{variable}}}")]
    MissingTemplateVariable { task: String, variable: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },
}

/// Pipeline errors surfaced by the orchestrator.
///
/// A run that returns any of these produced no `PipelineRun`; stage results
/// obtained before the failure are dropped.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{stage} stage failed: {source}")]
    Invocation {
        stage: Stage,
        #[source]
        source: LlmError,
    },

    #[error("{stage} stage returned output that does not match its schema: {reason}")]
    SchemaDecode { stage: Stage, reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Test generation produced {produced} cases, {requested} were requested")]
    TestCountMismatch { requested: u32, produced: usize },
}

impl PipelineError {
    /// True when the failure came from the reasoning engine call itself.
    pub fn is_invocation(&self) -> bool {
        matches!(self, Self::Invocation { .. })
    }
}

/// Errors from the metrics aggregator.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Cannot compute metrics over an empty batch")]
    EmptyBatch,

    #[error("Test case {index} is missing field '{field}'")]
    MissingField { index: usize, field: String },

    #[error("Test case {index} has unknown category label '{value}'")]
    UnknownLabel { index: usize, value: String },

    #[error("Expected an array of test cases, got {0}")]
    NotAnArray(String),
}

/// Why a test suite run failed: generation or scoring.
#[derive(Debug, thiserror::Error)]
pub enum TestSuiteError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
