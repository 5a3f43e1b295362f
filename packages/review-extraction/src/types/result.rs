//! Per-document pipeline output.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::check::{CheckResult, IterationRecord};
use crate::types::document::UnitMetadata;
use crate::types::evidence::EvidenceItem;

/// Final scores of the delivered attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Scores {
    pub accuracy: f64,
    pub consistency: f64,
    pub overall: f64,
}

impl From<&CheckResult> for Scores {
    fn from(check: &CheckResult) -> Self {
        Self {
            accuracy: check.accuracy_score,
            consistency: check.consistency_score,
            overall: check.overall_score,
        }
    }
}

/// How the validation loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// An iteration passed
    Passed,

    /// Iteration budget used up without a pass
    Exhausted,

    /// Two consecutive iterations proposed the same fixes
    Stagnant,
}

/// What the content filter removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FilterStats {
    pub original_units: usize,
    pub kept_units: usize,
    pub removed_by_section: usize,
    pub removed_as_references: usize,
    pub removed_as_boilerplate: usize,
    pub removed_exact_duplicates: usize,
    pub removed_near_duplicates: usize,
    pub original_chars: usize,
    pub kept_chars: usize,
    pub chars_saved: usize,
    pub estimated_tokens_saved: usize,
    /// Filtering removed everything and the unfiltered units were used
    #[serde(default)]
    pub fell_back: bool,
}

impl FilterStats {
    pub fn removed_units(&self) -> usize {
        self.original_units.saturating_sub(self.kept_units)
    }
}

/// Relevance gate summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RelevanceStats {
    pub total_units: usize,
    pub relevant_units: usize,
    pub relevance_rate: f64,
    pub average_confidence: f64,
    pub failed_batches: usize,
    /// Nothing was relevant and all filtered units were used
    #[serde(default)]
    pub fell_back: bool,
}

/// Everything produced for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Field values in schema order
    pub final_data: IndexMap<String, Value>,

    pub evidence: Vec<EvidenceItem>,

    pub scores: Scores,

    pub passed_validation: bool,

    /// Iterations attempted (including ones whose extraction call failed)
    pub iterations: usize,

    pub iteration_history: Vec<IterationRecord>,

    pub termination: Termination,

    pub filter_stats: FilterStats,

    pub relevance_stats: RelevanceStats,

    /// Fields pre-filled by Tier-0 patterns
    #[serde(default)]
    pub prefilled_fields: Vec<String>,

    /// Metadata of the units the extraction context was built from
    #[serde(default)]
    pub unit_metadata: Vec<UnitMetadata>,

    pub warnings: Vec<String>,

    pub source_filename: String,

    pub timestamp: DateTime<Utc>,
}

impl PipelineResult {
    /// Value of one field, if present and non-null.
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.final_data.get(field).filter(|v| !v.is_null())
    }

    /// Evidence for one field.
    pub fn evidence_for(&self, field: &str) -> Option<&EvidenceItem> {
        self.evidence.iter().find(|e| e.field == field)
    }
}
