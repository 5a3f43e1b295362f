//! Typed errors for the extraction engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised at the generative-model boundary.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// Provider returned an error or the transport failed
    #[error("provider error: {0}")]
    Provider(String),

    /// Call did not finish within the configured timeout
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    /// Provider or host ran out of memory / context capacity
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Response could not be interpreted at all
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

/// Errors that can occur while extracting a single document or running a batch.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Generative-model call failed
    #[error("model call failed: {0}")]
    Llm(#[from] LlmError),

    /// Document has no units and no text
    #[error("document has no usable text: {filename}")]
    EmptyDocument { filename: String },

    /// Context could not be built from the selected units
    #[error("no extraction context could be built for: {filename}")]
    EmptyContext { filename: String },

    /// Every validation iteration raised
    #[error("all {iterations} extraction iterations failed; last error: {last_error}")]
    AllIterationsFailed { iterations: usize, last_error: String },

    /// Out-of-memory class failure for this document
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// Checkpoint could not be read or written
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl ExtractionError {
    /// Classify this error for the failure payload stored in the checkpoint.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::ResourceExhausted(_) | Self::Llm(LlmError::ResourceExhausted(_)) => {
                FailureKind::ResourceExhausted
            }
            Self::EmptyDocument { .. }
            | Self::EmptyContext { .. }
            | Self::AllIterationsFailed { .. } => FailureKind::Structural,
            _ => FailureKind::Error,
        }
    }

    /// Whether the error must end the document immediately instead of
    /// skipping a single iteration.
    pub fn is_fatal_for_document(&self) -> bool {
        self.failure_kind() == FailureKind::ResourceExhausted
    }
}

/// Distinguishes failure payloads in downstream reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Ordinary error (provider failure, configuration, parse)
    Error,

    /// Out-of-memory class failure
    ResourceExhausted,

    /// No usable text, or every iteration raised
    Structural,
}

/// Errors from checkpoint persistence.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Filesystem operation failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Existing checkpoint could not be read (aborts the run)
    #[error("checkpoint unreadable at {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot could not be serialized
    #[error("checkpoint serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Advisory lock could not be acquired
    #[error("could not lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractionError>;

/// Result type alias for model calls.
pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Result type alias for checkpoint operations.
pub type CheckpointResult<T> = std::result::Result<T, CheckpointError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_classification() {
        let oom = ExtractionError::Llm(LlmError::ResourceExhausted("gpu".into()));
        assert_eq!(oom.failure_kind(), FailureKind::ResourceExhausted);
        assert!(oom.is_fatal_for_document());

        let empty = ExtractionError::EmptyDocument {
            filename: "a.pdf".into(),
        };
        assert_eq!(empty.failure_kind(), FailureKind::Structural);

        let provider = ExtractionError::Llm(LlmError::Provider("503".into()));
        assert_eq!(provider.failure_kind(), FailureKind::Error);
        assert!(!provider.is_fatal_for_document());
    }
}
