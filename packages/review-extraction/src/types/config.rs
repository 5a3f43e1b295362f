//! Configuration types for the pipeline and the batch layer.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExtractionError, Result};
use crate::types::check::ScoreWeights;

/// Configuration for the content filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Run the filter at all.
    pub enabled: bool,

    /// Fuzzy ratio above which a unit counts as a near-duplicate.
    ///
    /// Default: 0.90.
    pub similarity_threshold: f64,

    /// Leading non-empty lines sampled by the reference-list heuristic.
    pub reference_probe_lines: usize,

    /// Share of sampled lines that must look like citations.
    pub reference_density: f64,

    /// Units shorter than this (chars) are checked for boilerplate.
    pub boilerplate_max_chars: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.90,
            reference_probe_lines: 10,
            reference_density: 0.5,
            boilerplate_max_chars: 400,
        }
    }
}

/// Configuration for the relevance classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceConfig {
    pub enabled: bool,

    /// Units per model call.
    pub batch_size: usize,

    /// Unit text is truncated to this many chars in the prompt.
    pub max_unit_chars: usize,

    /// Confidence assigned when a unit is included by the fail-open rule.
    pub fallback_confidence: f64,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 10,
            max_unit_chars: 1500,
            fallback_confidence: 0.5,
        }
    }
}

/// Configuration for Tier-0 pattern extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    pub enabled: bool,

    /// Matches at or above this confidence become pre-fills.
    pub prefill_floor: f64,

    /// Chars kept on each side of a match for the supporting quote.
    pub context_window: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefill_floor: 0.8,
            context_window: 60,
        }
    }
}

/// Configuration for the iterate-until-pass loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Maximum extraction attempts per document.
    pub max_iterations: usize,

    /// Overall score needed to pass.
    pub score_threshold: f64,

    /// Weights for the overall score (default 0.6 / 0.4).
    pub weights: ScoreWeights,

    /// Fuzzy ratio needed to locate a quote in the source.
    pub quote_match_threshold: f64,

    /// Audit score needed for the audit to pass.
    pub audit_pass_score: f64,

    /// Multiplier applied to the overall score when the audit fails.
    pub audit_penalty: f64,

    /// Timeout for each model call, in seconds. `None` disables it.
    pub call_timeout_secs: Option<u64>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            score_threshold: 0.8,
            weights: ScoreWeights::default(),
            quote_match_threshold: 0.8,
            audit_pass_score: 0.8,
            audit_penalty: 0.8,
            call_timeout_secs: Some(120),
        }
    }
}

impl ValidationConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }
}

/// Configuration for the per-document pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub filter: FilterConfig,
    pub relevance: RelevanceConfig,
    pub patterns: PatternConfig,
    pub validation: ValidationConfig,

    /// Upper bound on the extraction context, in chars.
    ///
    /// Default: 60,000.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

fn default_max_context_chars() -> usize {
    60_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            relevance: RelevanceConfig::default(),
            patterns: PatternConfig::default(),
            validation: ValidationConfig::default(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

impl PipelineConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `REVIEW_*` environment variables.
    ///
    /// Loads a `.env` file if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = Self::new();
        if let Some(max) = env_parse::<usize>("REVIEW_MAX_ITERATIONS")? {
            config.validation.max_iterations = max;
        }
        if let Some(threshold) = env_parse::<f64>("REVIEW_SCORE_THRESHOLD")? {
            config.validation.score_threshold = threshold;
        }
        if let Some(secs) = env_parse::<u64>("REVIEW_CALL_TIMEOUT_SECS")? {
            config.validation.call_timeout_secs = (secs > 0).then_some(secs);
        }
        config.validate()?;
        Ok(config)
    }

    /// Set the iteration budget.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.validation.max_iterations = max;
        self
    }

    /// Set the pass threshold.
    pub fn with_score_threshold(mut self, threshold: f64) -> Self {
        self.validation.score_threshold = threshold;
        self
    }

    /// Set the overall-score weights.
    pub fn with_weights(mut self, accuracy: f64, consistency: f64) -> Self {
        self.validation.weights = ScoreWeights {
            accuracy,
            consistency,
        };
        self
    }

    /// Set the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.validation.call_timeout_secs = timeout.map(|d| d.as_secs().max(1));
        self
    }

    /// Disable the content filter.
    pub fn without_filter(mut self) -> Self {
        self.filter.enabled = false;
        self
    }

    /// Disable the relevance gate.
    pub fn without_relevance(mut self) -> Self {
        self.relevance.enabled = false;
        self
    }

    /// Reject settings that would make the loop meaningless.
    pub fn validate(&self) -> Result<()> {
        let v = &self.validation;
        if v.max_iterations == 0 {
            return Err(ExtractionError::Config(
                "max_iterations must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("score_threshold", v.score_threshold),
            ("quote_match_threshold", v.quote_match_threshold),
            ("audit_pass_score", v.audit_pass_score),
            ("audit_penalty", v.audit_penalty),
            ("similarity_threshold", self.filter.similarity_threshold),
            ("prefill_floor", self.patterns.prefill_floor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ExtractionError::Config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if v.weights.accuracy < 0.0 || v.weights.consistency < 0.0 {
            return Err(ExtractionError::Config(
                "score weights must be non-negative".into(),
            ));
        }
        if self.relevance.batch_size == 0 {
            return Err(ExtractionError::Config(
                "relevance batch_size must be at least 1".into(),
            ));
        }
        if self.max_context_chars == 0 {
            return Err(ExtractionError::Config(
                "max_context_chars must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for batch execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum documents in flight.
    pub workers: usize,

    /// Skip documents already recorded in the checkpoint.
    pub resume: bool,

    /// On resume, also retry documents recorded as failed.
    pub retry_failed: bool,

    /// Checkpoint file location.
    pub checkpoint_path: PathBuf,

    /// Consecutive document failures that open the circuit.
    pub circuit_threshold: usize,

    /// Leading chars of document text hashed for the duplicate fingerprint.
    pub fingerprint_prefix_chars: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            resume: true,
            retry_failed: false,
            checkpoint_path: PathBuf::from("extraction_checkpoint.json"),
            circuit_threshold: 5,
            fingerprint_prefix_chars: 10_000,
        }
    }
}

impl BatchConfig {
    /// Create a batch config writing its checkpoint to `path`.
    pub fn new(checkpoint_path: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_path: checkpoint_path.into(),
            ..Default::default()
        }
    }

    /// Defaults overridden by `REVIEW_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = Self::default();
        if let Some(workers) = env_parse::<usize>("REVIEW_WORKERS")? {
            config.workers = workers;
        }
        if let Some(resume) = env_parse::<bool>("REVIEW_RESUME")? {
            config.resume = resume;
        }
        if let Ok(path) = env::var("REVIEW_CHECKPOINT_PATH") {
            config.checkpoint_path = PathBuf::from(path);
        }
        if let Some(threshold) = env_parse::<usize>("REVIEW_CIRCUIT_THRESHOLD")? {
            config.circuit_threshold = threshold;
        }
        config.validate()?;
        Ok(config)
    }

    /// Set worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Enable or disable resume.
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Retry recorded failures on resume.
    pub fn retry_failed(mut self) -> Self {
        self.retry_failed = true;
        self
    }

    /// Set the circuit breaker threshold.
    pub fn with_circuit_threshold(mut self, threshold: usize) -> Self {
        self.circuit_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ExtractionError::Config("workers must be at least 1".into()));
        }
        if self.circuit_threshold == 0 {
            return Err(ExtractionError::Config(
                "circuit_threshold must be at least 1".into(),
            ));
        }
        if self.fingerprint_prefix_chars == 0 {
            return Err(ExtractionError::Config(
                "fingerprint_prefix_chars must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ExtractionError::Config(format!("{} is invalid: {}", key, e))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(PipelineConfig::new().validate().is_ok());
        assert!(BatchConfig::default().validate().is_ok());
        assert_eq!(PipelineConfig::new().max_context_chars, 60_000);
    }

    #[test]
    fn test_default_matches_new() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_context_chars, PipelineConfig::new().max_context_chars);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_context_bound() {
        let config = PipelineConfig {
            max_context_chars: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ExtractionError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_iterations() {
        let config = PipelineConfig::new().with_max_iterations(0);
        assert!(matches!(config.validate(), Err(ExtractionError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_out_of_range_threshold() {
        let config = PipelineConfig::new().with_score_threshold(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_call_timeout_round_trip() {
        let config = PipelineConfig::new().with_call_timeout(Some(Duration::from_secs(30)));
        assert_eq!(config.validation.call_timeout(), Some(Duration::from_secs(30)));

        let none = PipelineConfig::new().with_call_timeout(None);
        assert_eq!(none.validation.call_timeout(), None);
    }

    #[test]
    fn test_batch_validate_rejects_zero_workers() {
        assert!(BatchConfig::default().with_workers(0).validate().is_err());
    }
}
