//! Batch execution layer.
//!
//! Runs the per-document pipeline over many documents with:
//! - Bounded concurrency (cooperative permits or an OS thread pool)
//! - A shared circuit breaker that skips work after repeated failures
//! - Durable, atomic, resumable checkpointing
//! - In-run duplicate detection by content fingerprint

pub mod checkpoint;
pub mod circuit;
mod cooperative;
pub mod fingerprint;
pub mod runner;
mod thread_pool;

pub use checkpoint::{Checkpoint, CheckpointManager, DocumentOutcome, ExtractionStats};
pub use circuit::{CircuitBreaker, CircuitState};
pub use fingerprint::{Fingerprint, FingerprintCache};
pub use runner::{BatchJob, BatchReport, BatchRunner, ResourceSignal};
