//! Per-document extraction pipeline - the core of the library.
//!
//! The pipeline orchestrates:
//! - Content filtering (sections, references, boilerplate, duplicates)
//! - Relevance gating (batched model calls, fail-open)
//! - Tier-0 pattern pre-fill
//! - Evidence extraction with verbatim quotes
//! - Accuracy/consistency checking and quote auditing
//! - Iterative revision until pass, stagnation or budget exhaustion

pub mod auditor;
pub mod checker;
pub mod coerce;
pub mod evidence;
pub mod filter;
pub mod fuzzy;
pub mod gateway;
pub mod orchestrator;
pub mod patterns;
pub mod prompts;
pub mod relevance;
pub mod responses;
pub mod validation;

pub use auditor::{AuditFinding, AuditReport, QualityAuditor, QuoteMatch};
pub use checker::{CheckRequest, ExtractionChecker};
pub use evidence::{EvidenceExtractor, ExtractionAttempt, ExtractionRequest};
pub use filter::{ContentFilter, FilterOutcome};
pub use fuzzy::{find_best_match, FuzzyMatch};
pub use gateway::ModelGateway;
pub use orchestrator::ReviewPipeline;
pub use patterns::{Normalization, PatternMatch, PatternRegistry};
pub use relevance::{RelevanceClassifier, RelevanceOutcome, RelevanceResult};
pub use validation::{LoopInput, ValidationLoop, ValidationOutcome};
