//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the extraction engine
//! without making real model calls.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::error::{ExtractionError, LlmError, LlmResult, Result};
use crate::traits::{
    extractor::DocumentExtractor,
    llm::{Llm, LlmRequest, LlmResponse, Stage, Usage, UsageSink},
};
use crate::types::{
    check::IterationRecord,
    document::{Document, DocumentUnit},
    evidence::EvidenceItem,
    result::{FilterStats, PipelineResult, RelevanceStats, Scores, Termination},
    schema::{FieldSchema, FieldType},
};

/// Scripted reply for one schema title.
#[derive(Debug, Clone)]
pub enum MockReply {
    Value(Value),
    Fail(LlmError),
}

/// Record of a call made to the mock model.
#[derive(Debug, Clone)]
pub struct MockLlmCall {
    pub stage: Stage,
    pub schema_title: String,
    pub prompt: String,
}

/// A mock model routed on the target schema's `title`.
///
/// Each title has a reply queue; the last reply is sticky so a single
/// scripted response answers every call. Unscripted titles get a benign
/// default: all-null values, no quotes, perfect check and audit, and an
/// empty relevance list (which the classifier fills fail-open).
#[derive(Default, Clone)]
pub struct MockLlm {
    /// Reply queues by schema title
    replies: Arc<RwLock<HashMap<String, VecDeque<MockReply>>>>,

    /// Artificial latency per call
    delay: Option<Duration>,

    /// Usage attached to every successful reply
    usage: Option<Usage>,

    /// Call tracking for assertions
    calls: Arc<RwLock<Vec<MockLlmCall>>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for a schema title.
    pub fn with_reply(self, title: impl Into<String>, reply: MockReply) -> Self {
        self.replies
            .write()
            .unwrap()
            .entry(title.into())
            .or_default()
            .push_back(reply);
        self
    }

    /// Queue a field-values reply.
    pub fn with_values(self, value: Value) -> Self {
        self.with_reply("FieldValues", MockReply::Value(value))
    }

    /// Queue a quotes reply.
    pub fn with_quotes(self, value: Value) -> Self {
        self.with_reply("QuoteResponse", MockReply::Value(value))
    }

    /// Queue a checker reply.
    pub fn with_check(self, value: Value) -> Self {
        self.with_reply("CheckResponse", MockReply::Value(value))
    }

    /// Queue an audit judge reply.
    pub fn with_audit(self, value: Value) -> Self {
        self.with_reply("AuditResponse", MockReply::Value(value))
    }

    /// Queue a relevance reply.
    pub fn with_relevance(self, value: Value) -> Self {
        self.with_reply("RelevanceResponse", MockReply::Value(value))
    }

    /// Queue a failure for a schema title.
    pub fn with_failure(self, title: impl Into<String>, error: LlmError) -> Self {
        self.with_reply(title, MockReply::Fail(error))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockLlmCall> {
        self.calls.read().unwrap().clone()
    }

    /// Number of calls made for a stage.
    pub fn call_count(&self, stage: Stage) -> usize {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.stage == stage)
            .count()
    }

    /// Prompts sent for a stage, in call order.
    pub fn prompts(&self, stage: Stage) -> Vec<String> {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.stage == stage)
            .map(|c| c.prompt.clone())
            .collect()
    }

    fn next_reply(&self, title: &str) -> Option<MockReply> {
        let mut replies = self.replies.write().unwrap();
        let queue = replies.get_mut(title)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    fn default_reply(request: &LlmRequest) -> Value {
        match request.schema_title() {
            "FieldValues" => {
                let nulls: serde_json::Map<String, Value> = request
                    .schema
                    .get("properties")
                    .and_then(Value::as_object)
                    .map(|props| props.keys().map(|k| (k.clone(), Value::Null)).collect())
                    .unwrap_or_default();
                Value::Object(nulls)
            }
            "QuoteResponse" => json!({ "quotes": [] }),
            "RelevanceResponse" => json!({ "classifications": [] }),
            "CheckResponse" => json!({
                "accuracy_score": 1.0,
                "consistency_score": 1.0,
                "issues": [],
                "suggestions": []
            }),
            "AuditResponse" => json!({ "score": 1.0, "judgments": [] }),
            _ => json!({}),
        }
    }
}

#[async_trait]
impl Llm for MockLlm {
    async fn call(&self, request: &LlmRequest) -> LlmResult<LlmResponse> {
        self.calls.write().unwrap().push(MockLlmCall {
            stage: request.stage,
            schema_title: request.schema_title().to_string(),
            prompt: request.prompt.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let value = match self.next_reply(request.schema_title()) {
            Some(MockReply::Value(value)) => value,
            Some(MockReply::Fail(error)) => return Err(error),
            None => Self::default_reply(request),
        };

        let response = LlmResponse::new(value);
        Ok(match self.usage {
            Some(usage) => response.with_usage(usage),
            None => response,
        })
    }
}

/// Usage sink that keeps everything it receives.
#[derive(Default)]
pub struct RecordingUsage {
    records: Mutex<Vec<(Stage, Usage)>>,
}

impl RecordingUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(Stage, Usage)> {
        self.records.lock().unwrap().clone()
    }

    pub fn total_tokens(&self) -> u64 {
        self.records.lock().unwrap().iter().map(|(_, u)| u.total()).sum()
    }
}

impl UsageSink for RecordingUsage {
    fn record(&self, stage: Stage, usage: &Usage) {
        self.records.lock().unwrap().push((stage, *usage));
    }
}

/// How a scripted document should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Provider,
    ResourceExhausted,
    Structural,
}

impl MockFailure {
    fn to_error(self, filename: &str) -> ExtractionError {
        match self {
            Self::Provider => ExtractionError::Llm(LlmError::Provider(format!(
                "scripted provider failure for {}",
                filename
            ))),
            Self::ResourceExhausted => {
                ExtractionError::ResourceExhausted(format!("scripted OOM for {}", filename))
            }
            Self::Structural => ExtractionError::EmptyDocument {
                filename: filename.to_string(),
            },
        }
    }
}

/// A scripted per-document extractor for batch tests.
///
/// Succeeds with [`sample_result`] unless a failure is scripted for the
/// filename (or for every document). Tracks calls and peak concurrency.
#[derive(Default, Clone)]
pub struct MockExtractor {
    failures: Arc<RwLock<HashMap<String, MockFailure>>>,
    fail_all: Option<MockFailure>,
    delay: Option<Duration>,
    calls: Arc<RwLock<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail one document.
    pub fn failing(self, filename: impl Into<String>, failure: MockFailure) -> Self {
        self.failures
            .write()
            .unwrap()
            .insert(filename.into(), failure);
        self
    }

    /// Fail every document.
    pub fn failing_all(mut self, failure: MockFailure) -> Self {
        self.fail_all = Some(failure);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Filenames extracted, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    /// Distinct filenames extracted.
    pub fn distinct_calls(&self) -> HashSet<String> {
        self.calls().into_iter().collect()
    }

    /// Highest number of documents in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentExtractor for MockExtractor {
    async fn extract(
        &self,
        document: &Document,
        _schema: &FieldSchema,
        _theme: &str,
    ) -> Result<PipelineResult> {
        self.calls.write().unwrap().push(document.filename.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self
            .failures
            .read()
            .unwrap()
            .get(&document.filename)
            .copied()
            .or(self.fail_all);
        match scripted {
            Some(failure) => Err(failure.to_error(&document.filename)),
            None => Ok(sample_result(document)),
        }
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Schema used throughout the tests.
pub fn sample_schema() -> FieldSchema {
    FieldSchema::new("clinical_trial")
        .with_required_field("sample_size", FieldType::Integer, "Number of participants")
        .with_field("country", FieldType::Text, "Country where the study ran")
        .with_field("intervention", FieldType::Text, "Intervention delivered")
}

/// A short trial report with a methods section and a reference list.
pub fn sample_document(filename: &str) -> Document {
    Document::new(
        filename,
        vec![
            DocumentUnit::new(filename, "Falls prevention in older adults: a randomised trial.")
                .with_section("Title")
                .with_page(1),
            DocumentUnit::new(
                filename,
                "We enrolled N = 42 community-dwelling adults in Oslo, Norway. \
                 Participants received twelve weeks of supervised balance training.",
            )
            .with_section("Methods")
            .with_page(2),
            DocumentUnit::new(filename, "Smith J, Jones K. Balance. Lancet. 2019;12(3):45-67.")
                .with_section("References")
                .with_page(9),
        ],
    )
}

/// A successful result derived deterministically from the document text.
pub fn sample_result(document: &Document) -> PipelineResult {
    let mut final_data = IndexMap::new();
    final_data.insert(
        "opening".to_string(),
        Value::String(document.full_text.chars().take(40).collect()),
    );
    let evidence = vec![EvidenceItem::new(
        "opening",
        final_data["opening"].clone(),
        document.full_text.chars().take(40).collect::<String>(),
    )];

    PipelineResult {
        final_data,
        evidence,
        scores: Scores {
            accuracy: 0.9,
            consistency: 0.9,
            overall: 0.9,
        },
        passed_validation: true,
        iterations: 1,
        iteration_history: vec![IterationRecord {
            iteration: 1,
            accuracy_score: 0.9,
            consistency_score: 0.9,
            overall_score: 0.9,
            issue_count: 0,
            suggestions: vec![],
            passed: true,
        }],
        termination: Termination::Passed,
        filter_stats: FilterStats::default(),
        relevance_stats: RelevanceStats::default(),
        prefilled_fields: vec![],
        unit_metadata: document.units.iter().map(DocumentUnit::metadata).collect(),
        warnings: vec![],
        source_filename: document.filename.clone(),
        timestamp: chrono::Utc::now(),
    }
}
