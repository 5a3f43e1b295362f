//! Accuracy and consistency checking of one extraction attempt.

use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use super::gateway::ModelGateway;
use super::prompts::format_check_prompt;
use super::responses::{CheckResponse, ResponseSchema};
use crate::traits::llm::Stage;
use crate::types::check::{CheckResult, Issue, IssueType, ScoreWeights, Severity};
use crate::types::evidence::EvidenceItem;
use crate::types::schema::FieldSchema;

/// Inputs for one check.
#[derive(Debug, Clone, Copy)]
pub struct CheckRequest<'a> {
    pub schema: &'a FieldSchema,
    pub theme: &'a str,
    pub context: &'a str,
    pub data: &'a IndexMap<String, Value>,
    pub evidence: &'a [EvidenceItem],
}

/// Model-backed checker.
#[derive(Debug, Clone)]
pub struct ExtractionChecker {
    gateway: ModelGateway,
    weights: ScoreWeights,
    threshold: f64,
}

impl ExtractionChecker {
    pub fn new(gateway: ModelGateway, weights: ScoreWeights, threshold: f64) -> Self {
        Self {
            gateway,
            weights,
            threshold,
        }
    }

    /// Score the attempt. A failed call yields a maximal-failure result.
    pub async fn check(&self, request: &CheckRequest<'_>) -> CheckResult {
        let prompt = format_check_prompt(
            request.theme,
            request.schema,
            request.data,
            request.evidence,
            request.context,
        );

        let response = match self
            .gateway
            .call(Stage::Check, prompt, CheckResponse::response_schema())
            .await
        {
            Ok(value) => CheckResponse::from_value(&value),
            Err(e) => {
                warn!(error = %e, "Checker call failed, scoring attempt as failed");
                return CheckResult::checker_failed(e.to_string(), &request.schema.field_names());
            }
        };

        let issues = response
            .issues
            .into_iter()
            .map(|raw| {
                let field = if raw.field.is_empty() {
                    "*".to_string()
                } else {
                    raw.field
                };
                let issue = Issue::new(
                    field,
                    IssueType::from_label(&raw.issue_type),
                    Severity::from_label(&raw.severity),
                    raw.detail,
                );
                match raw.suggested_fix {
                    Some(fix) => issue.with_fix(fix),
                    None => issue,
                }
            })
            .collect();

        CheckResult::scored(
            response.accuracy_score,
            response.consistency_score,
            self.weights,
            self.threshold,
            issues,
            response.suggestions,
        )
    }
}
