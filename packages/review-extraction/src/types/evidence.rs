//! Evidence: a (field, value, verbatim quote) triple.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where an evidence item's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    /// Generative tier
    #[default]
    Model,

    /// Tier-0 pattern pre-fill the model did not override
    Pattern,
}

/// Proof of where an extracted value came from.
///
/// The auditor may rewrite `quote` to the exact source text it matched;
/// `field` and `value` are never changed after extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub field: String,
    pub value: Value,

    /// Verbatim supporting quote
    pub quote: String,

    #[serde(default)]
    pub page: Option<u32>,

    /// Character offset of the quote in the source text, once located
    #[serde(default)]
    pub position: Option<usize>,

    /// Confidence in [0, 1]
    pub confidence: f64,

    #[serde(default)]
    pub source: EvidenceSource,

    /// Set when the auditor replaced the quote with its best source match
    #[serde(default)]
    pub quote_corrected: bool,
}

impl EvidenceItem {
    /// Create a model-sourced evidence item.
    pub fn new(field: impl Into<String>, value: Value, quote: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value,
            quote: quote.into(),
            page: None,
            position: None,
            confidence: 0.7,
            source: EvidenceSource::Model,
            quote_corrected: false,
        }
    }

    /// Set the confidence, clamped to [0, 1].
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Set the page.
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Mark as coming from a pattern pre-fill.
    pub fn from_pattern(mut self) -> Self {
        self.source = EvidenceSource::Pattern;
        self
    }

    /// True when there is a quote to audit.
    pub fn has_quote(&self) -> bool {
        !self.quote.trim().is_empty()
    }
}
