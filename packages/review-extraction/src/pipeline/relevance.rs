//! Relevance gate: keep only units that may contain a target field.
//!
//! Fails open. A batch whose call fails, or a unit the model forgot to
//! classify, is treated as relevant at the fallback confidence so that no
//! text is lost to a transient error.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::gateway::ModelGateway;
use super::prompts::format_relevance_prompt;
use super::responses::{RelevanceResponse, ResponseSchema};
use crate::traits::llm::Stage;
use crate::types::config::RelevanceConfig;
use crate::types::document::DocumentUnit;
use crate::types::result::RelevanceStats;
use crate::types::schema::FieldSchema;

/// Verdict for one unit, indexed into the input slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceResult {
    pub index: usize,
    pub relevant: bool,
    pub confidence: f64,
    pub reason: String,
}

/// Relevant subset plus per-unit verdicts.
#[derive(Debug, Clone)]
pub struct RelevanceOutcome {
    pub relevant_units: Vec<DocumentUnit>,
    pub results: Vec<RelevanceResult>,
    pub stats: RelevanceStats,
}

/// Batched model classifier.
#[derive(Debug, Clone)]
pub struct RelevanceClassifier {
    gateway: ModelGateway,
    config: RelevanceConfig,
}

impl RelevanceClassifier {
    pub fn new(gateway: ModelGateway, config: RelevanceConfig) -> Self {
        Self { gateway, config }
    }

    /// Classify every unit. Never fails.
    pub async fn classify(
        &self,
        units: &[DocumentUnit],
        theme: &str,
        schema: &FieldSchema,
    ) -> RelevanceOutcome {
        if !self.config.enabled {
            let results = (0..units.len())
                .map(|index| RelevanceResult {
                    index,
                    relevant: true,
                    confidence: 1.0,
                    reason: "relevance gate disabled".into(),
                })
                .collect();
            return summarize(units, results, 0);
        }

        let indexed: Vec<(usize, &DocumentUnit)> = units.iter().enumerate().collect();
        let batches: Vec<&[(usize, &DocumentUnit)]> =
            indexed.chunks(self.config.batch_size.max(1)).collect();

        let calls = batches.iter().map(|batch| self.classify_batch(batch, theme, schema));
        let batch_results = join_all(calls).await;

        let mut failed_batches = 0;
        let mut results = Vec::with_capacity(units.len());
        for outcome in batch_results {
            let (batch, failed) = outcome;
            if failed {
                failed_batches += 1;
            }
            results.extend(batch);
        }
        results.sort_by_key(|r| r.index);

        summarize(units, results, failed_batches)
    }

    /// Returns the batch's verdicts and whether the call failed.
    async fn classify_batch(
        &self,
        batch: &[(usize, &DocumentUnit)],
        theme: &str,
        schema: &FieldSchema,
    ) -> (Vec<RelevanceResult>, bool) {
        let prompt = format_relevance_prompt(theme, schema, batch, self.config.max_unit_chars);
        let response = self
            .gateway
            .call(
                Stage::Relevance,
                prompt,
                RelevanceResponse::response_schema(),
            )
            .await;

        let parsed = match response {
            Ok(value) => RelevanceResponse::from_value(&value),
            Err(e) => {
                warn!(error = %e, units = batch.len(), "Relevance batch failed, including all units");
                let results = batch
                    .iter()
                    .map(|(index, _)| self.fallback(*index, "classification failed"))
                    .collect();
                return (results, true);
            }
        };

        let results = batch
            .iter()
            .map(|(index, _)| {
                // Models may answer with batch-local or global indices.
                let local = index - batch[0].0;
                parsed
                    .classifications
                    .iter()
                    .find(|c| c.index == *index)
                    .or_else(|| parsed.classifications.iter().find(|c| c.index == local))
                    .map(|c| RelevanceResult {
                        index: *index,
                        relevant: c.relevant,
                        confidence: c.confidence,
                        reason: c.reason.clone(),
                    })
                    .unwrap_or_else(|| self.fallback(*index, "not classified"))
            })
            .collect();
        (results, false)
    }

    fn fallback(&self, index: usize, reason: &str) -> RelevanceResult {
        RelevanceResult {
            index,
            relevant: true,
            confidence: self.config.fallback_confidence,
            reason: reason.to_string(),
        }
    }
}

fn summarize(
    units: &[DocumentUnit],
    results: Vec<RelevanceResult>,
    failed_batches: usize,
) -> RelevanceOutcome {
    let relevant_units: Vec<DocumentUnit> = results
        .iter()
        .filter(|r| r.relevant)
        .filter_map(|r| units.get(r.index).cloned())
        .collect();

    let total = results.len();
    let stats = RelevanceStats {
        total_units: total,
        relevant_units: relevant_units.len(),
        relevance_rate: if total == 0 {
            0.0
        } else {
            relevant_units.len() as f64 / total as f64
        },
        average_confidence: if total == 0 {
            0.0
        } else {
            results.iter().map(|r| r.confidence).sum::<f64>() / total as f64
        },
        failed_batches,
        fell_back: false,
    };

    debug!(
        total = stats.total_units,
        relevant = stats.relevant_units,
        failed_batches,
        "Relevance classification complete"
    );

    RelevanceOutcome {
        relevant_units,
        results,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::testing::MockLlm;
    use crate::types::schema::FieldType;
    use serde_json::json;
    use std::sync::Arc;

    fn units(n: usize) -> Vec<DocumentUnit> {
        (0..n)
            .map(|i| DocumentUnit::new("doc", format!("Passage number {}", i)))
            .collect()
    }

    fn schema() -> FieldSchema {
        FieldSchema::new("t").with_field("sample_size", FieldType::Integer, "Participants")
    }

    fn classifier(llm: MockLlm, batch_size: usize) -> RelevanceClassifier {
        RelevanceClassifier::new(
            ModelGateway::new(Arc::new(llm)),
            RelevanceConfig {
                batch_size,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_keeps_only_relevant_units() {
        let llm = MockLlm::new().with_relevance(json!({
            "classifications": [
                {"index": 0, "relevant": true, "confidence": 0.9, "reason": "methods"},
                {"index": 1, "relevant": false, "confidence": 0.8, "reason": "intro"},
                {"index": 2, "relevant": true, "confidence": 0.7, "reason": "results"}
            ]
        }));
        let outcome = classifier(llm, 10).classify(&units(3), "falls", &schema()).await;

        assert_eq!(outcome.relevant_units.len(), 2);
        assert_eq!(outcome.stats.relevant_units, 2);
        assert!((outcome.stats.average_confidence - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_batch_fails_open() {
        let llm = MockLlm::new().with_failure("RelevanceResponse", LlmError::Provider("503".into()));
        let outcome = classifier(llm.clone(), 2).classify(&units(5), "falls", &schema()).await;

        assert_eq!(llm.call_count(Stage::Relevance), 3);
        assert_eq!(outcome.relevant_units.len(), 5);
        assert_eq!(outcome.stats.failed_batches, 3);
        assert!(outcome.results.iter().all(|r| r.confidence == 0.5));
    }

    #[tokio::test]
    async fn test_missing_indices_are_included() {
        let llm = MockLlm::new().with_relevance(json!({
            "classifications": [{"index": 1, "relevant": false, "confidence": 0.9, "reason": "x"}]
        }));
        let outcome = classifier(llm, 10).classify(&units(3), "falls", &schema()).await;

        let relevant: Vec<usize> = outcome
            .results
            .iter()
            .filter(|r| r.relevant)
            .map(|r| r.index)
            .collect();
        assert_eq!(relevant, vec![0, 2]);
        assert_eq!(outcome.results[0].confidence, 0.5);
    }
}
