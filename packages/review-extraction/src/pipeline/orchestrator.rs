//! Per-document pipeline: filter → relevance → context → pre-fill → loop.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use super::auditor::QualityAuditor;
use super::checker::ExtractionChecker;
use super::evidence::EvidenceExtractor;
use super::filter::ContentFilter;
use super::gateway::ModelGateway;
use super::patterns::PatternRegistry;
use super::prompts::truncate_chars;
use super::relevance::RelevanceClassifier;
use super::validation::{LoopInput, ValidationLoop};
use crate::error::{ExtractionError, Result};
use crate::traits::extractor::DocumentExtractor;
use crate::traits::llm::{Llm, UsageSink};
use crate::types::config::PipelineConfig;
use crate::types::document::{Document, DocumentUnit};
use crate::types::result::PipelineResult;
use crate::types::schema::FieldSchema;

/// The validated extraction pipeline for one document at a time.
///
/// Stateless across documents; one instance can be shared by every
/// worker of a batch.
#[derive(Debug, Clone)]
pub struct ReviewPipeline {
    filter: ContentFilter,
    relevance: RelevanceClassifier,
    patterns: PatternRegistry,
    validation: ValidationLoop,
    config: PipelineConfig,
}

impl ReviewPipeline {
    /// Build a pipeline around a model, applying the configured timeout.
    pub fn new(llm: Arc<dyn Llm>, config: PipelineConfig) -> Result<Self> {
        let gateway = ModelGateway::new(llm).with_timeout(config.validation.call_timeout());
        Self::from_gateway(gateway, config)
    }

    /// Like [`new`](Self::new), forwarding usage to `sink`.
    pub fn with_usage_sink(
        llm: Arc<dyn Llm>,
        config: PipelineConfig,
        sink: Arc<dyn UsageSink>,
    ) -> Result<Self> {
        let gateway = ModelGateway::new(llm)
            .with_timeout(config.validation.call_timeout())
            .with_usage_sink(sink);
        Self::from_gateway(gateway, config)
    }

    /// Build from a prepared gateway.
    pub fn from_gateway(gateway: ModelGateway, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let v = &config.validation;

        let validation = ValidationLoop::new(
            EvidenceExtractor::new(gateway.clone()),
            ExtractionChecker::new(gateway.clone(), v.weights, v.score_threshold),
            QualityAuditor::new(gateway.clone(), v.quote_match_threshold, v.audit_pass_score),
            v.clone(),
        );

        Ok(Self {
            filter: ContentFilter::new(config.filter.clone()),
            relevance: RelevanceClassifier::new(gateway, config.relevance.clone()),
            patterns: PatternRegistry::builtin().with_context_window(config.patterns.context_window),
            validation,
            config,
        })
    }

    /// Replace the Tier-0 pattern registry.
    pub fn with_patterns(mut self, registry: PatternRegistry) -> Self {
        self.patterns = registry.with_context_window(self.config.patterns.context_window);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage for one document.
    pub async fn run(
        &self,
        document: &Document,
        schema: &FieldSchema,
        theme: &str,
    ) -> Result<PipelineResult> {
        let filename = document.filename.as_str();
        if document.is_blank() {
            return Err(ExtractionError::EmptyDocument {
                filename: filename.to_string(),
            });
        }
        if schema.is_empty() {
            return Err(ExtractionError::Config(format!(
                "schema '{}' has no fields",
                schema.name
            )));
        }

        info!(filename = %filename, units = document.units.len(), "Extracting document");
        let mut warnings = Vec::new();

        let units = if document.units.is_empty() {
            vec![DocumentUnit::new(filename, document.full_text.clone())]
        } else {
            document.units.clone()
        };

        let mut filtered = self.filter.filter(&units);
        if filtered.units.is_empty() {
            warn!(filename = %filename, "Filter removed every unit, using unfiltered text");
            warnings.push("content filter removed every unit; using unfiltered units".into());
            filtered.units = units.clone();
            filtered.stats.fell_back = true;
        }

        let mut relevance = self
            .relevance
            .classify(&filtered.units, theme, schema)
            .await;
        if relevance.relevant_units.is_empty() {
            warn!(filename = %filename, "No relevant units, using all filtered units");
            warnings.push("no unit classified as relevant; using all filtered units".into());
            relevance.relevant_units = filtered.units.clone();
            relevance.stats.fell_back = true;
        }
        if relevance.stats.failed_batches > 0 {
            warnings.push(format!(
                "{} relevance batch(es) failed; their units were included",
                relevance.stats.failed_batches
            ));
        }

        let context = build_context(&relevance.relevant_units, self.config.max_context_chars);
        if context.text.trim().is_empty() {
            return Err(ExtractionError::EmptyContext {
                filename: filename.to_string(),
            });
        }

        // Only text the model sees may be pre-filled.
        let prefills = if self.config.patterns.enabled {
            self.patterns.prefill_each(
                context.segments.iter().map(String::as_str),
                schema,
                self.config.patterns.prefill_floor,
            )
        } else {
            Default::default()
        };

        let source_text = document.source_text();
        let outcome = self
            .validation
            .run(&LoopInput {
                schema,
                theme,
                context: &context.text,
                source_text: &source_text,
                prefills: &prefills,
            })
            .await?;
        warnings.extend(outcome.warnings);

        info!(
            filename = %filename,
            passed = outcome.passed,
            iterations = outcome.iterations,
            overall_score = outcome.check.overall_score,
            "Document extraction complete"
        );

        Ok(PipelineResult {
            final_data: outcome.data,
            evidence: outcome.evidence,
            scores: (&outcome.check).into(),
            passed_validation: outcome.passed,
            iterations: outcome.iterations,
            iteration_history: outcome.history,
            termination: outcome.termination,
            filter_stats: filtered.stats,
            relevance_stats: relevance.stats,
            prefilled_fields: outcome.pattern_fields,
            unit_metadata: relevance
                .relevant_units
                .iter()
                .map(DocumentUnit::metadata)
                .collect(),
            warnings,
            source_filename: filename.to_string(),
            timestamp: Utc::now(),
        })
    }
}

#[async_trait]
impl DocumentExtractor for ReviewPipeline {
    async fn extract(
        &self,
        document: &Document,
        schema: &FieldSchema,
        theme: &str,
    ) -> Result<PipelineResult> {
        self.run(document, schema, theme).await
    }
}

/// The extraction context and the unit text that made it in.
#[derive(Debug, Default)]
struct Context {
    text: String,

    /// Verbatim unit text included in `text`, without headers
    segments: Vec<String>,
}

/// Join units under `[Section | p.N]` headers, bounded by `max_chars`.
fn build_context(units: &[DocumentUnit], max_chars: usize) -> Context {
    let mut context = Context::default();
    let mut used = 0;

    for unit in units {
        let text = unit.text.trim();
        if text.is_empty() {
            continue;
        }

        let mut header_parts = Vec::new();
        if let Some(heading) = unit.heading() {
            header_parts.push(heading);
        }
        if let Some(page) = unit.page {
            header_parts.push(format!("p.{}", page));
        }
        let header = if header_parts.is_empty() {
            String::new()
        } else {
            format!("[{}]\n", header_parts.join(" | "))
        };
        let block = format!("{}{}", header, text);

        let separator = if context.text.is_empty() { 0 } else { 2 };
        let block_len = block.chars().count();
        if used + separator + block_len > max_chars {
            let remaining = max_chars.saturating_sub(used + separator);
            if remaining > 0 {
                if separator > 0 {
                    context.text.push_str("\n\n");
                }
                let kept = truncate_chars(&block, remaining);
                context.text.push_str(kept);
                if kept.len() > header.len() {
                    context.segments.push(kept[header.len()..].to_string());
                }
            }
            break;
        }

        if separator > 0 {
            context.text.push_str("\n\n");
        }
        context.text.push_str(&block);
        context.segments.push(text.to_string());
        used += separator + block_len;
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_document, sample_schema, MockLlm, RecordingUsage};
    use crate::traits::llm::{Stage, Usage};
    use crate::types::result::Termination;
    use crate::types::schema::FieldType;
    use serde_json::json;

    fn pipeline(llm: MockLlm) -> ReviewPipeline {
        ReviewPipeline::new(Arc::new(llm), PipelineConfig::new()).unwrap()
    }

    #[test]
    fn test_build_context_headers_and_bound() {
        let units = vec![
            DocumentUnit::new("d", "First.").with_section("Methods").with_page(2),
            DocumentUnit::new("d", "Second."),
        ];
        let full = build_context(&units, 1000);
        assert_eq!(full.text, "[Methods | p.2]\nFirst.\n\nSecond.");
        assert_eq!(full.segments, vec!["First.", "Second."]);

        let bounded = build_context(&units, 10);
        assert_eq!(bounded.text.chars().count(), 10);
        assert!(bounded.segments.is_empty());

        let cut = build_context(&units, 19);
        assert_eq!(cut.text, "[Methods | p.2]\nFir");
        assert_eq!(cut.segments, vec!["Fir"]);
    }

    #[tokio::test]
    async fn test_blank_document_is_structural_failure() {
        let doc = Document::new("blank.pdf", vec![DocumentUnit::new("blank.pdf", "  ")]);
        let err = pipeline(MockLlm::new())
            .run(&doc, &sample_schema(), "falls")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::EmptyDocument { .. }));
    }

    #[tokio::test]
    async fn test_references_never_reach_the_model() {
        let llm = MockLlm::new()
            .with_values(json!({"country": "Norway", "intervention": "balance training"}))
            .with_quotes(json!({"country": "Oslo, Norway",
                                "intervention": "twelve weeks of supervised balance training"}));
        let result = pipeline(llm.clone())
            .run(&sample_document("trial.pdf"), &sample_schema(), "falls prevention")
            .await
            .unwrap();

        assert_eq!(result.filter_stats.removed_by_section, 1);
        for prompt in llm.prompts(Stage::Extraction) {
            assert!(!prompt.contains("Lancet"));
        }
        assert!(llm.prompts(Stage::Extraction)[0].contains("[Methods | p.2]"));
        assert_eq!(result.source_filename, "trial.pdf");
    }

    #[tokio::test]
    async fn test_prefilled_sample_size_survives_empty_model_output() {
        let llm = MockLlm::new()
            .with_values(json!({"country": "Norway", "intervention": "balance training"}))
            .with_quotes(json!({"country": "Oslo, Norway",
                                "intervention": "twelve weeks of supervised balance training"}));
        let result = pipeline(llm)
            .run(&sample_document("trial.pdf"), &sample_schema(), "falls prevention")
            .await
            .unwrap();

        assert_eq!(result.value("sample_size"), Some(&json!(42)));
        assert_eq!(result.prefilled_fields, vec!["sample_size".to_string()]);
        assert!(result.passed_validation);
        assert_eq!(result.termination, Termination::Passed);
    }

    #[tokio::test]
    async fn test_irrelevant_everything_falls_back() {
        let llm = MockLlm::new().with_relevance(json!({"classifications": [
            {"index": 0, "relevant": false, "confidence": 0.9, "reason": "title"},
            {"index": 1, "relevant": false, "confidence": 0.9, "reason": "no"}
        ]}));
        let result = pipeline(llm)
            .run(&sample_document("trial.pdf"), &sample_schema(), "falls")
            .await
            .unwrap();

        assert!(result.relevance_stats.fell_back);
        assert_eq!(result.unit_metadata.len(), 2);
        assert!(result.warnings.iter().any(|w| w.contains("relevant")));
    }

    #[tokio::test]
    async fn test_usage_is_forwarded() {
        let sink = Arc::new(RecordingUsage::new());
        let llm = MockLlm::new().with_usage(Usage {
            input_tokens: 10,
            output_tokens: 5,
        });
        ReviewPipeline::with_usage_sink(Arc::new(llm), PipelineConfig::new(), sink.clone())
            .unwrap()
            .run(&sample_document("trial.pdf"), &sample_schema(), "falls")
            .await
            .unwrap();

        assert!(!sink.records().is_empty());
        assert_eq!(sink.total_tokens(), 15 * sink.records().len() as u64);
    }

    #[tokio::test]
    async fn test_filtered_units_are_never_prefilled() {
        let doc = Document::new(
            "trial.pdf",
            vec![
                DocumentUnit::new(
                    "trial.pdf",
                    "Community-dwelling adults in Oslo, Norway received twelve weeks \
                     of supervised balance training.",
                )
                .with_section("Methods"),
                DocumentUnit::new(
                    "trial.pdf",
                    "1. Smith J. Falls trial, N = 900. Lancet. doi:10.1000/cited.paper",
                )
                .with_section("References"),
            ],
        );
        let schema = sample_schema().with_field("doi", FieldType::Identifier, "Article DOI");
        let llm = MockLlm::new();

        let result = pipeline(llm.clone()).run(&doc, &schema, "falls").await.unwrap();

        assert_eq!(result.filter_stats.removed_by_section, 1);
        assert_eq!(result.value("sample_size"), None);
        assert_eq!(result.value("doi"), None);
        assert!(result.prefilled_fields.is_empty());
        for prompt in llm.prompts(Stage::Extraction) {
            assert!(!prompt.contains("N = 900"));
            assert!(!prompt.contains("cited.paper"));
        }
    }

    #[tokio::test]
    async fn test_default_config_extracts() {
        let result = ReviewPipeline::new(Arc::new(MockLlm::new()), PipelineConfig::default())
            .unwrap()
            .run(&sample_document("trial.pdf"), &sample_schema(), "falls")
            .await
            .unwrap();
        assert_eq!(result.value("sample_size"), Some(&json!(42)));

        let zero_bound = PipelineConfig {
            max_context_chars: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            ReviewPipeline::new(Arc::new(MockLlm::new()), zero_bound),
            Err(ExtractionError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_everything_filtered_falls_back_to_all_units() {
        let doc = Document::new(
            "notes.pdf",
            vec![
                DocumentUnit::new(
                    "notes.pdf",
                    "We thank the physiotherapists in Oslo, Norway who ran the balance classes.",
                )
                .with_section("Acknowledgements"),
                DocumentUnit::new(
                    "notes.pdf",
                    "The balance training programme was supported by a regional health grant.",
                )
                .with_section("Funding"),
            ],
        );
        let llm = MockLlm::new();

        let result = pipeline(llm.clone())
            .run(&doc, &sample_schema(), "falls")
            .await
            .unwrap();

        assert!(result.filter_stats.fell_back);
        assert_eq!(result.filter_stats.removed_by_section, 2);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("content filter removed every unit")));
        assert!(llm.call_count(Stage::Extraction) >= 1);
        assert!(llm.prompts(Stage::Extraction)[0].contains("physiotherapists in Oslo"));
    }
}
