//! Structured contracts exchanged with the reasoning engine.
//!
//! Wire names follow the JSON the stage templates ask for (`"Not Urgent"`,
//! `"Partially correct"`, `spam`), with aliases for the spellings models
//! commonly drift into.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// ── Category ────────────────────────────────────────────────────────

/// Email category assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(alias = "spam", alias = "SPAM")]
    Spam,
    #[serde(alias = "urgent", alias = "URGENT")]
    Urgent,
    #[serde(
        rename = "Not Urgent",
        alias = "NotUrgent",
        alias = "Not urgent",
        alias = "not urgent",
        alias = "not_urgent"
    )]
    NotUrgent,
    #[serde(
        rename = "To Read",
        alias = "ToRead",
        alias = "To read",
        alias = "to read",
        alias = "to_read"
    )]
    ToRead,
}

impl Category {
    /// All categories in report order.
    pub const ALL: [Category; 4] = [
        Category::Spam,
        Category::Urgent,
        Category::NotUrgent,
        Category::ToRead,
    ];

    /// Label used on the wire and in reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Spam => "Spam",
            Self::Urgent => "Urgent",
            Self::NotUrgent => "Not Urgent",
            Self::ToRead => "To Read",
        }
    }

    /// Position in [`Category::ALL`].
    pub fn index(&self) -> usize {
        match self {
            Self::Spam => 0,
            Self::Urgent => 1,
            Self::NotUrgent => 2,
            Self::ToRead => 3,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Lenient parse: case, spaces, `_` and `-` are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "spam" => Ok(Self::Spam),
            "urgent" => Ok(Self::Urgent),
            "noturgent" => Ok(Self::NotUrgent),
            "toread" => Ok(Self::ToRead),
            _ => Err(format!("unknown category '{s}'")),
        }
    }
}

// ── Classification ──────────────────────────────────────────────────

/// Output of the classify and refine stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(rename = "spam", alias = "is_spam", alias = "isSpam")]
    pub is_spam: bool,
    pub category: Category,
    pub reasoning: String,
    #[serde(
        default,
        alias = "suggestedResponse",
        skip_serializing_if = "Option::is_none"
    )]
    pub suggested_response: Option<String>,
}

impl ClassificationResult {
    /// Whether the spam flag agrees with the category.
    ///
    /// Not enforced anywhere; the pipeline only logs a warning.
    pub fn is_consistent(&self) -> bool {
        self.is_spam == (self.category == Category::Spam)
    }
}

// ── Evaluation ──────────────────────────────────────────────────────

/// The evaluator's judgment of a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(alias = "correct", alias = "CORRECT")]
    Correct,
    #[serde(alias = "incorrect", alias = "INCORRECT")]
    Incorrect,
    #[serde(
        rename = "Partially correct",
        alias = "PartiallyCorrect",
        alias = "Partially Correct",
        alias = "partially correct",
        alias = "partially_correct"
    )]
    PartiallyCorrect,
}

impl Verdict {
    /// Refinement runs only when the evaluator disagrees.
    pub fn requires_refinement(&self) -> bool {
        matches!(self, Self::Incorrect | Self::PartiallyCorrect)
    }
}

/// Output of the evaluate stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub verdict: Verdict,
    pub explanation: String,
    #[serde(alias = "evaluatorClassification")]
    pub evaluator_classification: Category,
    #[serde(alias = "evaluatorSpam")]
    pub evaluator_spam: bool,
    #[serde(
        default,
        alias = "suggestedCorrection",
        skip_serializing_if = "Option::is_none"
    )]
    pub suggested_correction: Option<String>,
}

/// Evaluate-stage output after normalization.
///
/// An evaluator response that does not fully decode never aborts the run.
/// Its verdict still counts when that one field is readable; otherwise the
/// response is kept verbatim and treated as carrying no verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvaluationOutcome {
    Judged(EvaluationResult),
    VerdictOnly {
        verdict: Verdict,
        raw: String,
        reason: String,
    },
    Unreadable {
        raw: String,
        reason: String,
    },
}

impl EvaluationOutcome {
    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            Self::Judged(result) => Some(result.verdict),
            Self::VerdictOnly { verdict, .. } => Some(*verdict),
            Self::Unreadable { .. } => None,
        }
    }

    /// The fully decoded evaluation, if there is one.
    pub fn result(&self) -> Option<&EvaluationResult> {
        match self {
            Self::Judged(result) => Some(result),
            Self::VerdictOnly { .. } | Self::Unreadable { .. } => None,
        }
    }
}

// ── Pipeline run ────────────────────────────────────────────────────

/// Result of one classify → evaluate → [refine] cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub classification: ClassificationResult,
    pub evaluation: EvaluationOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refinement: Option<ClassificationResult>,
    pub completed_at: DateTime<Utc>,
}

impl PipelineRun {
    /// The classification to present: the refinement if one ran.
    pub fn final_classification(&self) -> &ClassificationResult {
        self.refinement.as_ref().unwrap_or(&self.classification)
    }

    pub fn was_refined(&self) -> bool {
        self.refinement.is_some()
    }
}

// ── Test generation ─────────────────────────────────────────────────

/// One synthetic test email with its ground truth and prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub email: String,
    pub expected: Category,
    pub predicted: Category,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Output of the test-generation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestBatch {
    pub tests: Vec<TestCase>,
    #[serde(deserialize_with = "whole_number")]
    pub score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Accepts `7`, `7.0` or `"7"`; rejects fractions and negatives.
fn whole_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Int(u32),
        Float(f64),
        Text(String),
    }

    let value = match Number::deserialize(deserializer)? {
        Number::Int(n) => return Ok(n),
        Number::Float(f) => f,
        Number::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("'{s}' is not a number")))?,
    };
    if value.fract() != 0.0 || !(0.0..=f64::from(u32::MAX)).contains(&value) {
        return Err(serde::de::Error::custom(format!(
            "{value} is not a whole non-negative number"
        )));
    }
    Ok(value as u32)
}

impl TestBatch {
    /// Number of cases whose prediction matched the expected label.
    pub fn success_count(&self) -> usize {
        self.tests
            .iter()
            .filter(|t| t.expected == t.predicted)
            .count()
    }

    /// (expected, predicted) pairs for the metrics aggregator.
    pub fn labeled_pairs(&self) -> Vec<crate::metrics::LabeledPair> {
        self.tests
            .iter()
            .map(|t| crate::metrics::LabeledPair::new(t.expected, t.predicted))
            .collect()
    }
}
