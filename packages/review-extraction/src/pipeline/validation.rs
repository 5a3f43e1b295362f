//! Iterate-until-pass loop: extract → check → audit → revise.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::auditor::QualityAuditor;
use super::checker::{CheckRequest, ExtractionChecker};
use super::evidence::{EvidenceExtractor, ExtractionRequest};
use super::patterns::PatternMatch;
use crate::error::{ExtractionError, Result};
use crate::types::check::{CheckResult, IterationRecord};
use crate::types::config::ValidationConfig;
use crate::types::evidence::EvidenceItem;
use crate::types::result::Termination;
use crate::types::schema::FieldSchema;

/// Per-document inputs, fixed for every iteration.
#[derive(Debug, Clone, Copy)]
pub struct LoopInput<'a> {
    pub schema: &'a FieldSchema,
    pub theme: &'a str,

    /// Extraction context built from the relevant units
    pub context: &'a str,

    /// Full document text that quotes are audited against
    pub source_text: &'a str,

    pub prefills: &'a IndexMap<String, PatternMatch>,
}

/// The delivered attempt plus the loop's history.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub data: IndexMap<String, Value>,
    pub evidence: Vec<EvidenceItem>,
    pub check: CheckResult,
    pub pattern_fields: Vec<String>,
    pub passed: bool,
    pub iterations: usize,
    pub history: Vec<IterationRecord>,
    pub termination: Termination,
    pub warnings: Vec<String>,
}

struct Attempt {
    data: IndexMap<String, Value>,
    evidence: Vec<EvidenceItem>,
    check: CheckResult,
    pattern_fields: Vec<String>,
}

/// Extractor, checker and auditor wired into one loop.
#[derive(Debug, Clone)]
pub struct ValidationLoop {
    extractor: EvidenceExtractor,
    checker: ExtractionChecker,
    auditor: QualityAuditor,
    config: ValidationConfig,
}

impl ValidationLoop {
    pub fn new(
        extractor: EvidenceExtractor,
        checker: ExtractionChecker,
        auditor: QualityAuditor,
        config: ValidationConfig,
    ) -> Self {
        Self {
            extractor,
            checker,
            auditor,
            config,
        }
    }

    /// Run up to `max_iterations` attempts.
    ///
    /// Returns the first passing attempt, or the best-scoring one with
    /// `passed = false` when the budget runs out or revisions stagnate.
    /// Fails only when every attempt's extraction call failed, or on
    /// resource exhaustion.
    pub async fn run(&self, input: &LoopInput<'_>) -> Result<ValidationOutcome> {
        let max_iterations = self.config.max_iterations.max(1);

        let mut best: Option<Attempt> = None;
        let mut history: Vec<IterationRecord> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();
        let mut revisions: Vec<String> = Vec::new();
        let mut previous_suggestions: Option<BTreeSet<String>> = None;
        let mut prior_suggestions: Vec<String> = Vec::new();
        let mut last_error: Option<String> = None;
        let mut termination = Termination::Exhausted;
        let mut iterations = 0;

        for iteration in 1..=max_iterations {
            iterations = iteration;

            let request = ExtractionRequest {
                schema: input.schema,
                theme: input.theme,
                context: input.context,
                prefills: input.prefills,
                revisions: &revisions,
            };
            let attempt = match self.extractor.extract(&request).await {
                Ok(attempt) => attempt,
                Err(e) if e.is_fatal_for_document() => return Err(e),
                Err(e) => {
                    warn!(iteration, error = %e, "Extraction attempt failed");
                    warnings.push(format!("iteration {}: extraction failed: {}", iteration, e));
                    last_error = Some(e.to_string());
                    continue;
                }
            };

            let mut evidence = attempt.evidence;
            let mut check = self
                .checker
                .check(&CheckRequest {
                    schema: input.schema,
                    theme: input.theme,
                    context: input.context,
                    data: &attempt.data,
                    evidence: &evidence,
                })
                .await;

            let audit = self.auditor.audit(&mut evidence, input.source_text).await;
            audit.apply_to(&mut check, self.config.audit_penalty);
            if audit.judge_failed {
                warnings.push(format!(
                    "iteration {}: audit judge unavailable, quote matching only",
                    iteration
                ));
            }

            if check.passed {
                let newly_missing: Vec<String> = input
                    .schema
                    .missing_fields(&attempt.data)
                    .into_iter()
                    .filter(|f| !prior_suggestions.iter().any(|s| mentions(s, f)))
                    .collect();
                if !newly_missing.is_empty() {
                    debug!(iteration, fields = ?newly_missing, "Passing attempt has empty fields, retrying for recall");
                    check.passed = false;
                    check.suggestions.push(format!(
                        "Search the document again for: {}. Fill them only if the text reports them.",
                        newly_missing.join(", ")
                    ));
                }
            }

            history.push(IterationRecord::from_check(iteration, &check));
            info!(
                iteration,
                overall_score = check.overall_score,
                passed = check.passed,
                issues = check.issues.len(),
                "Validation iteration complete"
            );

            let passed = check.passed;
            let suggestions: BTreeSet<String> = check
                .suggestions
                .iter()
                .map(|s| s.trim().to_lowercase())
                .collect();
            prior_suggestions.extend(suggestions.iter().cloned());
            let next_revisions = check.suggestions.clone();

            let current = Attempt {
                data: attempt.data,
                evidence,
                check,
                pattern_fields: attempt.pattern_fields,
            };

            if passed {
                best = Some(current);
                termination = Termination::Passed;
                break;
            }

            if best
                .as_ref()
                .map_or(true, |b| current.check.overall_score > b.check.overall_score)
            {
                best = Some(current);
            }

            if previous_suggestions.as_ref() == Some(&suggestions) {
                warn!(iteration, "Revision suggestions repeated, stopping early");
                warnings.push(format!(
                    "stopped after iteration {}: suggestions identical to the previous iteration",
                    iteration
                ));
                termination = Termination::Stagnant;
                break;
            }
            previous_suggestions = Some(suggestions);
            revisions = next_revisions;
        }

        let Some(best) = best else {
            return Err(ExtractionError::AllIterationsFailed {
                iterations,
                last_error: last_error.unwrap_or_else(|| "no attempt completed".into()),
            });
        };

        let passed = termination == Termination::Passed;
        if termination == Termination::Exhausted {
            warnings.push(format!(
                "validation did not pass after {} iterations; returning best attempt (score {:.2})",
                iterations, best.check.overall_score
            ));
        }

        Ok(ValidationOutcome {
            data: best.data,
            evidence: best.evidence,
            check: best.check,
            pattern_fields: best.pattern_fields,
            passed,
            iterations,
            history,
            termination,
            warnings,
        })
    }
}

/// Whether a lowercased suggestion names `field`, as a key or in words.
fn mentions(suggestion: &str, field: &str) -> bool {
    let key = field.to_lowercase();
    suggestion.contains(&key) || suggestion.contains(&key.replace('_', " "))
}
