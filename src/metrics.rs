//! Classification metrics over (expected, predicted) label pairs.
//!
//! Per-category precision, recall and F1 with zero division reported as 0,
//! macro and support-weighted averages, overall accuracy and a confusion
//! matrix. Everything is derived from integer counts, so the report does not
//! depend on input order.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::MetricsError;
use crate::pipeline::types::Category;

/// One labeled prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledPair {
    pub expected: Category,
    pub predicted: Category,
}

impl LabeledPair {
    pub fn new(expected: Category, predicted: Category) -> Self {
        Self {
            expected,
            predicted,
        }
    }
}

/// Scores for one category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    #[serde(rename = "f1-score")]
    pub f1_score: f64,
    /// Number of cases whose expected label is this category.
    pub support: usize,
}

/// Averaged scores across categories.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AverageMetrics {
    pub precision: f64,
    pub recall: f64,
    #[serde(rename = "f1-score")]
    pub f1_score: f64,
    pub support: usize,
}

/// Full classification report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub categories: BTreeMap<Category, ClassMetrics>,
    pub accuracy: f64,
    #[serde(rename = "macro avg")]
    pub macro_avg: AverageMetrics,
    #[serde(rename = "weighted avg")]
    pub weighted_avg: AverageMetrics,
    /// `confusion[expected][predicted]`, indexed by [`Category::index`].
    pub confusion: [[usize; 4]; 4],
    pub total: usize,
}

impl MetricsReport {
    pub fn category(&self, category: Category) -> &ClassMetrics {
        &self.categories[&category]
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn harmonic_mean(precision: f64, recall: f64) -> f64 {
    if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    }
}

/// Compute the report for a batch of labeled pairs.
///
/// Macro averages cover the categories that occur as expected or predicted
/// labels; categories absent from both are still listed with zero scores.
pub fn compute_metrics(cases: &[LabeledPair]) -> Result<MetricsReport, MetricsError> {
    if cases.is_empty() {
        return Err(MetricsError::EmptyBatch);
    }

    let mut confusion = [[0usize; 4]; 4];
    for case in cases {
        confusion[case.expected.index()][case.predicted.index()] += 1;
    }

    let total = cases.len();
    let mut categories = BTreeMap::new();
    let mut correct = 0;
    let mut observed = 0usize;
    let (mut macro_p, mut macro_r, mut macro_f) = (0.0, 0.0, 0.0);
    let (mut weighted_p, mut weighted_r, mut weighted_f) = (0.0, 0.0, 0.0);

    for category in Category::ALL {
        let i = category.index();
        let tp = confusion[i][i];
        let support: usize = confusion[i].iter().sum();
        let predicted: usize = confusion.iter().map(|row| row[i]).sum();

        let precision = ratio(tp, predicted);
        let recall = ratio(tp, support);
        let f1_score = harmonic_mean(precision, recall);

        correct += tp;
        if support + predicted > 0 {
            observed += 1;
            macro_p += precision;
            macro_r += recall;
            macro_f += f1_score;
        }
        weighted_p += precision * support as f64;
        weighted_r += recall * support as f64;
        weighted_f += f1_score * support as f64;

        categories.insert(
            category,
            ClassMetrics {
                precision,
                recall,
                f1_score,
                support,
            },
        );
    }

    let observed = observed.max(1) as f64;
    let total_f = total as f64;

    Ok(MetricsReport {
        categories,
        accuracy: ratio(correct, total),
        macro_avg: AverageMetrics {
            precision: macro_p / observed,
            recall: macro_r / observed,
            f1_score: macro_f / observed,
            support: total,
        },
        weighted_avg: AverageMetrics {
            precision: weighted_p / total_f,
            recall: weighted_r / total_f,
            f1_score: weighted_f / total_f,
            support: total,
        },
        confusion,
        total,
    })
}

/// Compute the report from raw JSON test cases.
///
/// Every element must carry string `expected` and `predicted` labels;
/// a malformed element fails the whole computation.
pub fn compute_metrics_from_json(cases: &serde_json::Value) -> Result<MetricsReport, MetricsError> {
    let items = cases.as_array().ok_or_else(|| {
        MetricsError::NotAnArray(match cases {
            serde_json::Value::Null => "null".to_string(),
            serde_json::Value::Object(_) => "an object".to_string(),
            other => other.to_string(),
        })
    })?;

    let pairs = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            Ok(LabeledPair {
                expected: label_field(item, index, "expected")?,
                predicted: label_field(item, index, "predicted")?,
            })
        })
        .collect::<Result<Vec<_>, MetricsError>>()?;

    compute_metrics(&pairs)
}

fn label_field(
    item: &serde_json::Value,
    index: usize,
    field: &str,
) -> Result<Category, MetricsError> {
    let value = item
        .get(field)
        .filter(|v| !v.is_null())
        .ok_or_else(|| MetricsError::MissingField {
            index,
            field: field.to_string(),
        })?;
    let raw = value.as_str().ok_or_else(|| MetricsError::UnknownLabel {
        index,
        value: value.to_string(),
    })?;
    raw.parse().map_err(|_| MetricsError::UnknownLabel {
        index,
        value: raw.to_string(),
    })
}

impl fmt::Display for MetricsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>14} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for (category, m) in &self.categories {
            writeln!(
                f,
                "{:>14} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                category.label(),
                m.precision,
                m.recall,
                m.f1_score,
                m.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>14} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.total
        )?;
        for (name, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>14} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, avg.precision, avg.recall, avg.f1_score, avg.support
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::seq::SliceRandom;

    use super::*;
    use crate::pipeline::types::Category::{NotUrgent, Spam, ToRead, Urgent};

    fn pairs(raw: &[(Category, Category)]) -> Vec<LabeledPair> {
        raw.iter().map(|&(e, p)| LabeledPair::new(e, p)).collect()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn perfect_predictions() {
        let report = compute_metrics(&pairs(&[(Spam, Spam), (Urgent, Urgent), (ToRead, ToRead)])).unwrap();
        assert!(close(report.accuracy, 1.0));
        assert!(close(report.category(Spam).f1_score, 1.0));
        assert!(close(report.macro_avg.f1_score, 1.0));
        assert_eq!(report.total, 3);
    }

    #[test]
    fn mixed_predictions_match_hand_computed_values() {
        // Spam: tp=1, fp=0, fn=1 -> p=1, r=0.5, f1=2/3
        // Urgent: tp=1, fp=1, fn=0 -> p=0.5, r=1, f1=2/3
        // ToRead: tp=1, fp=0, fn=0 -> 1, 1, 1
        let report = compute_metrics(&pairs(&[
            (Spam, Spam),
            (Spam, Urgent),
            (Urgent, Urgent),
            (ToRead, ToRead),
        ]))
        .unwrap();

        let spam = report.category(Spam);
        assert!(close(spam.precision, 1.0));
        assert!(close(spam.recall, 0.5));
        assert!(close(spam.f1_score, 2.0 / 3.0));
        assert_eq!(spam.support, 2);

        let urgent = report.category(Urgent);
        assert!(close(urgent.precision, 0.5));
        assert!(close(urgent.recall, 1.0));

        assert!(close(report.accuracy, 0.75));
        // NotUrgent never appears, so the macro average covers three categories.
        assert!(close(report.macro_avg.f1_score, (2.0 / 3.0 + 2.0 / 3.0 + 1.0) / 3.0));
        // Weighted by support 2, 1, 1.
        assert!(close(
            report.weighted_avg.recall,
            (0.5 * 2.0 + 1.0 + 1.0) / 4.0
        ));
        assert_eq!(report.confusion[Spam.index()][Urgent.index()], 1);
    }

    #[test]
    fn absent_category_scores_zero_not_nan() {
        let report = compute_metrics(&pairs(&[(Spam, Spam), (Urgent, Spam)])).unwrap();
        let not_urgent = report.category(NotUrgent);
        assert_eq!(not_urgent.precision, 0.0);
        assert_eq!(not_urgent.recall, 0.0);
        assert_eq!(not_urgent.f1_score, 0.0);
        assert_eq!(not_urgent.support, 0);

        // Urgent has support but no predictions: precision 0 by zero division.
        let urgent = report.category(Urgent);
        assert_eq!(urgent.precision, 0.0);
        assert!(!urgent.f1_score.is_nan());
    }

    #[test]
    fn all_four_categories_listed() {
        let report = compute_metrics(&pairs(&[(Spam, Spam)])).unwrap();
        assert_eq!(report.categories.len(), 4);
    }

    #[test]
    fn accuracy_is_match_ratio() {
        let cases = pairs(&[
            (Spam, Spam),
            (Urgent, NotUrgent),
            (NotUrgent, NotUrgent),
            (ToRead, Urgent),
            (ToRead, ToRead),
        ]);
        let matches = cases.iter().filter(|c| c.expected == c.predicted).count();
        let report = compute_metrics(&cases).unwrap();
        assert!(close(report.accuracy, matches as f64 / cases.len() as f64));
    }

    #[test]
    fn order_independent() {
        let mut cases = pairs(&[
            (Spam, Spam),
            (Spam, ToRead),
            (Urgent, Urgent),
            (Urgent, NotUrgent),
            (NotUrgent, NotUrgent),
            (ToRead, ToRead),
            (ToRead, Spam),
            (NotUrgent, Urgent),
        ]);
        let baseline = compute_metrics(&cases).unwrap();
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            cases.shuffle(&mut rng);
            assert_eq!(compute_metrics(&cases).unwrap(), baseline);
        }
    }

    #[test]
    fn empty_batch_is_error() {
        assert!(matches!(compute_metrics(&[]), Err(MetricsError::EmptyBatch)));
    }

    #[test]
    fn json_cases_parse_labels() {
        let json = serde_json::json!([
            {"email": "a", "expected": "Not Urgent", "predicted": "Not Urgent"},
            {"expected": "To Read", "predicted": "ToRead"},
        ]);
        let report = compute_metrics_from_json(&json).unwrap();
        assert!(close(report.accuracy, 1.0));
    }

    #[test]
    fn json_missing_field_fails() {
        let json = serde_json::json!([
            {"expected": "Spam", "predicted": "Spam"},
            {"expected": "Urgent"},
        ]);
        match compute_metrics_from_json(&json) {
            Err(MetricsError::MissingField { index, field }) => {
                assert_eq!(index, 1);
                assert_eq!(field, "predicted");
            }
            other => panic!("Expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn json_unknown_label_fails() {
        let json = serde_json::json!([{"expected": "Newsletter", "predicted": "Spam"}]);
        assert!(matches!(
            compute_metrics_from_json(&json),
            Err(MetricsError::UnknownLabel { index: 0, .. })
        ));
        let json = serde_json::json!([{"expected": 3, "predicted": "Spam"}]);
        assert!(matches!(
            compute_metrics_from_json(&json),
            Err(MetricsError::UnknownLabel { .. })
        ));
    }

    #[test]
    fn json_not_array_fails() {
        assert!(matches!(
            compute_metrics_from_json(&serde_json::json!({"tests": []})),
            Err(MetricsError::NotAnArray(_))
        ));
    }

    #[test]
    fn report_serializes_in_report_layout() {
        let report = compute_metrics(&pairs(&[(Spam, Spam), (ToRead, Urgent)])).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["categories"]["Not Urgent"]["f1-score"].is_number());
        assert!(json["macro avg"]["precision"].is_number());
        assert_eq!(json["weighted avg"]["support"], 2);
    }

    #[test]
    fn display_renders_table() {
        let report = compute_metrics(&pairs(&[(Spam, Spam), (Urgent, Urgent)])).unwrap();
        let text = report.to_string();
        assert!(text.contains("precision"));
        assert!(text.contains("Not Urgent"));
        assert!(text.contains("weighted avg"));
    }
}
