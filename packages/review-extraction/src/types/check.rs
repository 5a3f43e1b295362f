//! Check results and iteration history.

use serde::{Deserialize, Serialize};

/// Category of a problem found by the checker or auditor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    /// Value does not match its quote
    Inaccurate,

    /// Value does not fit the theme's intent
    Inconsistent,

    /// Field left empty although the text has it
    Missing,

    /// Quote cannot be found in the source
    Hallucination,

    /// Quote found but does not support the value
    Unsupported,

    /// The checker itself failed
    CheckerFailure,

    #[default]
    Other,
}

impl IssueType {
    /// Parse a model-provided label, defaulting to `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "inaccurate" | "accuracy" | "incorrect" | "wrong_value" => Self::Inaccurate,
            "inconsistent" | "consistency" => Self::Inconsistent,
            "missing" | "omission" | "incomplete" => Self::Missing,
            "hallucination" | "hallucinated" | "fabricated" => Self::Hallucination,
            "unsupported" | "not_supported" => Self::Unsupported,
            "checker_failure" => Self::CheckerFailure,
            _ => Self::Other,
        }
    }
}

/// How serious an issue is.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
}

impl Severity {
    /// Parse a model-provided label, defaulting to `Medium`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "low" | "minor" => Self::Low,
            "high" | "critical" | "major" | "severe" => Self::High,
            _ => Self::Medium,
        }
    }
}

/// One itemized problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub field: String,
    pub issue_type: IssueType,
    pub severity: Severity,
    pub detail: String,
    #[serde(default)]
    pub suggested_fix: Option<String>,
}

impl Issue {
    pub fn new(
        field: impl Into<String>,
        issue_type: IssueType,
        severity: Severity,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            issue_type,
            severity,
            detail: detail.into(),
            suggested_fix: None,
        }
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }
}

/// Score weights for the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub accuracy: f64,
    pub consistency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            accuracy: 0.6,
            consistency: 0.4,
        }
    }
}

impl ScoreWeights {
    pub fn overall(&self, accuracy: f64, consistency: f64) -> f64 {
        self.accuracy * accuracy + self.consistency * consistency
    }
}

/// Outcome of checking one extraction attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub accuracy_score: f64,
    pub consistency_score: f64,
    pub overall_score: f64,
    pub issues: Vec<Issue>,
    pub suggestions: Vec<String>,
    pub passed: bool,
}

impl CheckResult {
    /// Build a result, computing the weighted overall score and pass flag.
    pub fn scored(
        accuracy_score: f64,
        consistency_score: f64,
        weights: ScoreWeights,
        threshold: f64,
        issues: Vec<Issue>,
        suggestions: Vec<String>,
    ) -> Self {
        let overall_score = weights.overall(accuracy_score, consistency_score);
        Self {
            accuracy_score,
            consistency_score,
            overall_score,
            issues,
            suggestions,
            passed: overall_score >= threshold,
        }
    }

    /// Maximal-failure result used when the checker call itself fails.
    pub fn checker_failed(reason: impl Into<String>, fields: &[String]) -> Self {
        let reason = reason.into();
        Self {
            accuracy_score: 0.0,
            consistency_score: 0.0,
            overall_score: 0.0,
            issues: vec![Issue::new(
                "*",
                IssueType::CheckerFailure,
                Severity::High,
                format!("checker failed: {}", reason),
            )],
            suggestions: vec![format!(
                "Re-extract every field from the source text: {}",
                fields.join(", ")
            )],
            passed: false,
        }
    }

    pub fn high_severity_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::High)
            .count()
    }
}

/// Snapshot of one validation iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub accuracy_score: f64,
    pub consistency_score: f64,
    pub overall_score: f64,
    pub issue_count: usize,
    pub suggestions: Vec<String>,
    pub passed: bool,
}

impl IterationRecord {
    pub fn from_check(iteration: usize, check: &CheckResult) -> Self {
        Self {
            iteration,
            accuracy_score: check.accuracy_score,
            consistency_score: check.consistency_score,
            overall_score: check.overall_score,
            issue_count: check.issues.len(),
            suggestions: check.suggestions.clone(),
            passed: check.passed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scored_uses_weights() {
        let result = CheckResult::scored(1.0, 0.5, ScoreWeights::default(), 0.8, vec![], vec![]);
        assert!((result.overall_score - 0.8).abs() < 1e-9);
        assert!(result.passed);

        let failing = CheckResult::scored(0.5, 0.5, ScoreWeights::default(), 0.8, vec![], vec![]);
        assert!(!failing.passed);
    }

    #[test]
    fn test_checker_failed_never_passes() {
        let result = CheckResult::checker_failed("timeout", &["a".into(), "b".into()]);
        assert!(!result.passed);
        assert_eq!(result.overall_score, 0.0);
        assert_eq!(result.high_severity_count(), 1);
        assert!(result.suggestions[0].contains("a, b"));
    }

    #[test]
    fn test_labels_default_sensibly() {
        assert_eq!(IssueType::from_label("Not Supported"), IssueType::Unsupported);
        assert_eq!(IssueType::from_label("weird"), IssueType::Other);
        assert_eq!(Severity::from_label("CRITICAL"), Severity::High);
        assert_eq!(Severity::from_label(""), Severity::Medium);
    }
}
