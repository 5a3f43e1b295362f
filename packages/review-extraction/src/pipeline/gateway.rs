//! Single boundary for model calls.
//!
//! Every stage goes through [`ModelGateway::call`], which applies the
//! per-call timeout and forwards usage to the configured sink.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

use crate::error::{LlmError, LlmResult};
use crate::traits::llm::{Llm, LlmRequest, NoopUsage, Stage, UsageSink};

/// Shared handle to the model plus call policy.
#[derive(Clone)]
pub struct ModelGateway {
    llm: Arc<dyn Llm>,
    timeout: Option<Duration>,
    usage: Arc<dyn UsageSink>,
}

impl ModelGateway {
    pub fn new(llm: Arc<dyn Llm>) -> Self {
        Self {
            llm,
            timeout: None,
            usage: Arc::new(NoopUsage),
        }
    }

    /// Bound every call; `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage = sink;
        self
    }

    /// Call the model and return its structured value.
    pub async fn call(&self, stage: Stage, prompt: String, schema: Value) -> LlmResult<Value> {
        let request = LlmRequest::new(stage, prompt, schema);
        let started = Instant::now();

        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.llm.call(&request))
                .await
                .map_err(|_| LlmError::Timeout(limit))??,
            None => self.llm.call(&request).await?,
        };

        if let Some(usage) = &response.usage {
            self.usage.record(stage, usage);
        }

        debug!(
            stage = %stage,
            schema = request.schema_title(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Model call complete"
        );

        Ok(response.value)
    }
}

impl std::fmt::Debug for ModelGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGateway")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
