//! Validated Evidence Extraction Engine
//!
//! Extracts structured field values from scientific documents for
//! literature-review synthesis. Every value carries a verbatim supporting
//! quote, is checked against the source text and a review theme, and is
//! revised until it passes a quality threshold or the retry budget runs
//! out. A batch layer runs the pipeline over many documents with bounded
//! concurrency, a circuit breaker and a resumable checkpoint.
//!
//! # Design Philosophy
//!
//! **"Never lose data, never invent it"**
//!
//! - Cheap deterministic filters first, model calls only where needed
//! - Fail open on relevance: over-inclusion costs tokens, under-inclusion loses data
//! - Every value is grounded in a quote that provably appears in the source
//! - Failures are contained at the document boundary
//! - Library handles mechanics, the application supplies the model
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use review_extraction::{
//!     BatchConfig, BatchJob, BatchRunner, FieldSchema, FieldType, PipelineConfig, ReviewPipeline,
//! };
//!
//! let schema = FieldSchema::new("trial")
//!     .with_required_field("sample_size", FieldType::Integer, "Participants enrolled")
//!     .with_field("country", FieldType::Text, "Country where the study ran");
//!
//! // One document
//! let pipeline = ReviewPipeline::new(llm, PipelineConfig::from_env()?)?;
//! let result = pipeline.run(&document, &schema, "falls prevention").await?;
//!
//! // Many documents, resumable
//! let runner = BatchRunner::new(Arc::new(pipeline), BatchConfig::from_env()?)?;
//! let report = runner.run(BatchJob::new(documents, schema, "falls prevention")).await?;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Core trait abstractions (Llm, UsageSink, DocumentExtractor)
//! - [`types`] - Documents, schemas, evidence, check results, configuration
//! - [`pipeline`] - Per-document filter, relevance, extraction and validation loop
//! - [`batch`] - Schedulers, circuit breaker, checkpoint and fingerprint cache
//! - [`testing`] - Mock implementations for testing

pub mod batch;
pub mod error;
pub mod pipeline;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{CheckpointError, ExtractionError, FailureKind, LlmError};
pub use traits::{
    extractor::DocumentExtractor,
    llm::{Llm, LlmRequest, LlmResponse, NoopUsage, Stage, Usage, UsageSink},
};
pub use types::{
    check::{CheckResult, Issue, IssueType, IterationRecord, ScoreWeights, Severity},
    config::{
        BatchConfig, FilterConfig, PatternConfig, PipelineConfig, RelevanceConfig,
        ValidationConfig,
    },
    document::{Document, DocumentUnit, UnitMetadata, UnitType},
    evidence::{EvidenceItem, EvidenceSource},
    result::{FilterStats, PipelineResult, RelevanceStats, Scores, Termination},
    schema::{FieldSchema, FieldSpec, FieldType},
};

// Re-export pipeline components
pub use pipeline::{
    // Orchestration
    ReviewPipeline, ValidationLoop, ValidationOutcome,
    // Stages
    ContentFilter, EvidenceExtractor, ExtractionChecker, QualityAuditor, RelevanceClassifier,
    // Tier-0 patterns
    Normalization, PatternMatch, PatternRegistry,
    // Audit
    AuditFinding, AuditReport, QuoteMatch,
    // Model boundary
    ModelGateway,
};

// Re-export batch layer
pub use batch::{
    BatchJob, BatchReport, BatchRunner, Checkpoint, CheckpointManager, CircuitBreaker,
    CircuitState, DocumentOutcome, ExtractionStats, Fingerprint, FingerprintCache,
    ResourceSignal,
};

// Re-export testing utilities
pub use testing::{MockExtractor, MockLlm};
