//! Generative-model capability.
//!
//! The engine treats the model as a black box: send a prompt and a target
//! JSON schema, get back a structured value and optional usage numbers.
//! Provider clients, retries and model selection live behind this trait.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LlmResult;

/// Pipeline stage a model call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Relevance,
    Extraction,
    Quotes,
    Check,
    Audit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Relevance => "relevance",
            Self::Extraction => "extraction",
            Self::Quotes => "quotes",
            Self::Check => "check",
            Self::Audit => "audit",
        };
        f.write_str(name)
    }
}

/// One structured-output request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub stage: Stage,

    /// Fully rendered prompt
    pub prompt: String,

    /// JSON schema the response must satisfy. Always carries a `title`.
    pub schema: Value,
}

impl LlmRequest {
    pub fn new(stage: Stage, prompt: impl Into<String>, schema: Value) -> Self {
        Self {
            stage,
            prompt: prompt.into(),
            schema,
        }
    }

    /// The schema's `title`, used by providers as the output name.
    pub fn schema_title(&self) -> &str {
        self.schema
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("Response")
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Structured response from the model.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub value: Value,
    pub usage: Option<Usage>,
}

impl LlmResponse {
    pub fn new(value: Value) -> Self {
        Self { value, usage: None }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Generative model used by every stage of the pipeline.
///
/// Synchronous clients can implement this by returning immediately; the
/// thread-pool scheduler is the blocking variant at the scheduling level.
#[async_trait]
pub trait Llm: Send + Sync {
    /// Call the model with a prompt and a target schema.
    async fn call(&self, request: &LlmRequest) -> LlmResult<LlmResponse>;
}

#[async_trait]
impl<T: Llm + ?Sized> Llm for std::sync::Arc<T> {
    async fn call(&self, request: &LlmRequest) -> LlmResult<LlmResponse> {
        (**self).call(request).await
    }
}

/// Receives usage numbers for every model call.
///
/// The engine never interprets them; cost accounting is the sink's job.
pub trait UsageSink: Send + Sync {
    fn record(&self, stage: Stage, usage: &Usage);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsage;

impl UsageSink for NoopUsage {
    fn record(&self, _stage: Stage, _usage: &Usage) {}
}
