//! Quality audit: are the quotes real, and do they support the values?
//!
//! The deterministic pass locates every quote in the source text and
//! repairs near-misses to the exact source wording. A judge call then
//! decides whether each located quote supports its value. The audit can
//! only lower a check result, never raise it.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::fuzzy::find_best_match;
use super::gateway::ModelGateway;
use super::prompts::format_audit_prompt;
use super::responses::{AuditResponse, ResponseSchema};
use crate::traits::llm::Stage;
use crate::types::check::{CheckResult, Issue, IssueType, Severity};
use crate::types::evidence::EvidenceItem;

/// Per-field audit verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditFinding {
    pub field: String,
    pub is_correct: bool,
    pub severity: Severity,
    pub explanation: String,
}

/// Where a quote was found, if at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteMatch {
    pub field: String,
    /// Best fuzzy score, 0 when below the match threshold
    pub score: f64,
    pub found: bool,
    /// Quote was rewritten to the exact source text
    pub corrected: bool,
}

/// Outcome of auditing one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub score: f64,
    pub findings: Vec<AuditFinding>,
    pub quote_matches: Vec<QuoteMatch>,
    pub passed: bool,
    /// The judge call failed and only deterministic findings were used
    pub judge_failed: bool,
}

impl AuditReport {
    /// Merge a failed audit into a check result.
    ///
    /// Multiplies the overall score by `penalty`, forces `passed = false`
    /// and appends the incorrect findings as issues. A passed audit leaves
    /// the check untouched.
    pub fn apply_to(&self, check: &mut CheckResult, penalty: f64) {
        if self.passed {
            return;
        }

        check.overall_score *= penalty.clamp(0.0, 1.0);
        check.passed = false;

        for finding in self.findings.iter().filter(|f| !f.is_correct) {
            let not_found = self
                .quote_matches
                .iter()
                .any(|m| m.field == finding.field && !m.found);
            let (issue_type, fix) = if not_found {
                (
                    IssueType::Hallucination,
                    format!(
                        "Quote a sentence that appears verbatim in the document for {}, or leave it empty",
                        finding.field
                    ),
                )
            } else {
                (
                    IssueType::Unsupported,
                    format!(
                        "Re-check {} against its quote and correct the value",
                        finding.field
                    ),
                )
            };
            check.issues.push(
                Issue::new(
                    finding.field.clone(),
                    issue_type,
                    finding.severity,
                    finding.explanation.clone(),
                )
                .with_fix(fix.clone()),
            );
            if !check.suggestions.contains(&fix) {
                check.suggestions.push(fix);
            }
        }
    }

    pub fn has_high_severity_error(&self) -> bool {
        self.findings
            .iter()
            .any(|f| !f.is_correct && f.severity == Severity::High)
    }
}

/// Deterministic quote matcher plus model judge.
#[derive(Debug, Clone)]
pub struct QualityAuditor {
    gateway: ModelGateway,
    match_threshold: f64,
    pass_score: f64,
}

impl QualityAuditor {
    pub fn new(gateway: ModelGateway, match_threshold: f64, pass_score: f64) -> Self {
        Self {
            gateway,
            match_threshold,
            pass_score,
        }
    }

    /// Audit evidence against the source, repairing quotes in place.
    ///
    /// Only `quote`, `position` and `quote_corrected` are ever modified.
    pub async fn audit(&self, evidence: &mut [EvidenceItem], source: &str) -> AuditReport {
        let mut findings = Vec::new();
        let mut quote_matches = Vec::new();
        let mut located = Vec::new();

        for (i, item) in evidence.iter_mut().enumerate() {
            if !item.has_quote() {
                continue;
            }
            match find_best_match(&item.quote, source, self.match_threshold) {
                Some(m) => {
                    let corrected = m.score < 1.0;
                    if corrected {
                        item.quote = m.text;
                        item.quote_corrected = true;
                    }
                    item.position = Some(m.char_start);
                    quote_matches.push(QuoteMatch {
                        field: item.field.clone(),
                        score: m.score,
                        found: true,
                        corrected,
                    });
                    located.push(i);
                }
                None => {
                    findings.push(AuditFinding {
                        field: item.field.clone(),
                        is_correct: false,
                        severity: Severity::High,
                        explanation: "quote does not appear in the source text".into(),
                    });
                    quote_matches.push(QuoteMatch {
                        field: item.field.clone(),
                        score: 0.0,
                        found: false,
                        corrected: false,
                    });
                }
            }
        }

        let deterministic = if quote_matches.is_empty() {
            1.0
        } else {
            quote_matches.iter().map(|m| m.score).sum::<f64>() / quote_matches.len() as f64
        };

        let mut judge_failed = false;
        let mut score = deterministic;
        if !located.is_empty() {
            let items: Vec<&EvidenceItem> = located.iter().map(|i| &evidence[*i]).collect();
            match self
                .gateway
                .call(
                    Stage::Audit,
                    format_audit_prompt(&items),
                    AuditResponse::response_schema(),
                )
                .await
            {
                Ok(value) => {
                    let judged = AuditResponse::from_value(&value);
                    score = score.min(judged.score);
                    for judgment in judged.judgments {
                        if !items.iter().any(|e| e.field == judgment.field) {
                            continue;
                        }
                        findings.push(AuditFinding {
                            field: judgment.field,
                            is_correct: judgment.is_correct,
                            severity: Severity::from_label(&judgment.severity),
                            explanation: judgment.explanation,
                        });
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Audit judge failed, using quote matching only");
                    judge_failed = true;
                }
            }
        }

        let mut report = AuditReport {
            score,
            findings,
            quote_matches,
            passed: false,
            judge_failed,
        };
        report.passed = report.score >= self.pass_score && !report.has_high_severity_error();

        debug!(
            score = report.score,
            passed = report.passed,
            corrected = report.quote_matches.iter().filter(|m| m.corrected).count(),
            "Audit complete"
        );
        report
    }
}
