//! Batch entry point and the per-document state machine both schedulers
//! share.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::checkpoint::{Checkpoint, CheckpointManager, DocumentOutcome, ExtractionStats};
use super::circuit::{CircuitBreaker, CircuitState};
use super::fingerprint::{Fingerprint, FingerprintCache};
use super::{cooperative, thread_pool};
use crate::error::{CheckpointError, ExtractionError, Result};
use crate::traits::extractor::DocumentExtractor;
use crate::types::config::BatchConfig;
use crate::types::document::Document;
use crate::types::result::PipelineResult;
use crate::types::schema::FieldSchema;

/// Advisory cap on concurrency, consulted once at batch start.
///
/// Implemented for any `Fn() -> Option<usize>`.
pub trait ResourceSignal: Send + Sync {
    /// Recommended maximum number of workers, if constrained.
    fn recommended_workers(&self) -> Option<usize>;
}

impl<F> ResourceSignal for F
where
    F: Fn() -> Option<usize> + Send + Sync,
{
    fn recommended_workers(&self) -> Option<usize> {
        self()
    }
}

/// Documents plus the schema and theme they are extracted against.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub documents: Vec<Document>,
    pub schema: FieldSchema,
    pub theme: String,
}

impl BatchJob {
    pub fn new(documents: Vec<Document>, schema: FieldSchema, theme: impl Into<String>) -> Self {
        Self {
            documents,
            schema,
            theme: theme.into(),
        }
    }
}

/// Summary of one batch run.
///
/// `checkpoint` is read back from disk after every worker has joined, so
/// it also holds outcomes of documents skipped by resume.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub workers: usize,

    /// Distinct documents submitted
    pub submitted: usize,

    /// Left alone because the checkpoint already had them
    pub resumed: usize,
    pub succeeded: usize,
    pub failed: usize,

    /// Not attempted because the circuit was open
    pub skipped: usize,

    /// Never started because the run was cancelled
    pub not_started: usize,
    pub cancelled: bool,
    pub circuit: CircuitState,
    pub checkpoint: Checkpoint,
}

impl BatchReport {
    pub fn stats(&self) -> ExtractionStats {
        self.checkpoint.extraction_stats
    }

    pub fn outcome(&self, filename: &str) -> Option<&DocumentOutcome> {
        self.checkpoint.outcome(filename)
    }

    /// Every successful result in the checkpoint, in filename order.
    pub fn results(&self) -> Vec<&PipelineResult> {
        self.checkpoint.successes().collect()
    }
}

/// Terminal state of one document within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DocumentStatus {
    Succeeded,
    Failed,
    Skipped,
    NotStarted,
}

/// How checkpoint writes are issued from worker code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    /// Write on the calling thread (OS worker threads)
    Inline,

    /// Write on the blocking pool (cooperative tasks)
    Offloaded,
}

/// Per-run counters; the first fatal error stops new work.
#[derive(Debug, Default)]
pub(crate) struct Tally {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_started: usize,
    pub error: Option<ExtractionError>,
}

impl Tally {
    pub fn add(&mut self, status: Result<DocumentStatus>, cancel: &CancellationToken) {
        match status {
            Ok(DocumentStatus::Succeeded) => self.succeeded += 1,
            Ok(DocumentStatus::Failed) => self.failed += 1,
            Ok(DocumentStatus::Skipped) => self.skipped += 1,
            Ok(DocumentStatus::NotStarted) => self.not_started += 1,
            Err(e) => {
                error!(error = %e, "Stopping batch");
                cancel.cancel();
                if self.error.is_none() {
                    self.error = Some(e);
                }
            }
        }
    }
}

/// Everything a worker needs to drive one document.
pub(crate) struct BatchContext {
    extractor: Arc<dyn DocumentExtractor>,
    schema: FieldSchema,
    theme: String,
    checkpoint: Arc<CheckpointManager>,
    circuit: Arc<CircuitBreaker>,
    cache: FingerprintCache,
    prefix_chars: usize,
    write_mode: WriteMode,
    pub cancel: CancellationToken,
}

impl BatchContext {
    /// Run one document to a recorded outcome.
    ///
    /// Only checkpoint persistence errors are returned; extraction errors
    /// are recorded as failures.
    pub async fn process(&self, document: &Document) -> Result<DocumentStatus> {
        if self.cancel.is_cancelled() {
            return Ok(DocumentStatus::NotStarted);
        }

        let filename = document.filename.as_str();
        if self.circuit.is_open() {
            warn!(filename = %filename, "Circuit open, skipping document");
            self.record(filename, DocumentOutcome::skipped("circuit breaker open"))
                .await?;
            return Ok(DocumentStatus::Skipped);
        }

        let started = Instant::now();
        let fingerprint = Fingerprint::of(document, self.prefix_chars);
        let extracted = self
            .cache
            .get_or_compute(document, &fingerprint, || {
                self.extractor.extract(document, &self.schema, &self.theme)
            })
            .await;

        match extracted {
            Ok(result) => {
                self.circuit.record_success();
                info!(
                    filename = %filename,
                    passed = result.passed_validation,
                    iterations = result.iterations,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Document succeeded"
                );
                self.record(
                    filename,
                    DocumentOutcome::Success {
                        result: Box::new(result),
                    },
                )
                .await?;
                Ok(DocumentStatus::Succeeded)
            }
            Err(e) => {
                self.circuit.record_failure();
                warn!(
                    filename = %filename,
                    kind = ?e.failure_kind(),
                    error = %e,
                    "Document failed"
                );
                self.record(filename, DocumentOutcome::failed(&e)).await?;
                Ok(DocumentStatus::Failed)
            }
        }
    }

    async fn record(&self, filename: &str, outcome: DocumentOutcome) -> Result<()> {
        match self.write_mode {
            WriteMode::Inline => self.checkpoint.record(filename, outcome)?,
            WriteMode::Offloaded => {
                let checkpoint = self.checkpoint.clone();
                let owned = filename.to_string();
                tokio::task::spawn_blocking(move || checkpoint.record(&owned, outcome))
                    .await
                    .map_err(|e| CheckpointError::Io {
                        path: self.checkpoint.path().to_path_buf(),
                        source: std::io::Error::other(e.to_string()),
                    })??;
            }
        }
        Ok(())
    }
}

struct Prepared {
    run_id: Uuid,
    context: Arc<BatchContext>,
    pending: Vec<Document>,
    submitted: usize,
    resumed: usize,
    workers: usize,
}

/// Runs a [`DocumentExtractor`] over many documents with bounded
/// concurrency, a circuit breaker and a resumable checkpoint.
///
/// # Example
///
/// ```rust,ignore
/// let pipeline = Arc::new(ReviewPipeline::new(llm, PipelineConfig::from_env()?)?);
/// let runner = BatchRunner::new(pipeline, BatchConfig::from_env()?)?;
/// let report = runner.run(BatchJob::new(documents, schema, "falls prevention")).await?;
/// println!("{} succeeded", report.stats().success);
/// ```
pub struct BatchRunner {
    extractor: Arc<dyn DocumentExtractor>,
    config: BatchConfig,
    resource_signal: Option<Arc<dyn ResourceSignal>>,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(extractor: Arc<dyn DocumentExtractor>, config: BatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            extractor,
            config,
            resource_signal: None,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_resource_signal(mut self, signal: Arc<dyn ResourceSignal>) -> Self {
        self.resource_signal = Some(signal);
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Cancelling this token stops new documents from starting; documents
    /// already in flight finish and are recorded.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Configured workers, capped by the resource signal.
    pub fn effective_workers(&self) -> usize {
        let configured = self.config.workers.max(1);
        match self
            .resource_signal
            .as_ref()
            .and_then(|s| s.recommended_workers())
        {
            Some(recommended) => configured.min(recommended).max(1),
            None => configured,
        }
    }

    /// Run the batch on cooperative tasks within the current runtime.
    pub async fn run(&self, job: BatchJob) -> Result<BatchReport> {
        let started_at = Utc::now();
        let prepared = self.prepare(job, WriteMode::Offloaded)?;
        let tally = cooperative::drive(&prepared.context, &prepared.pending, prepared.workers).await;
        self.finish(prepared, tally, started_at)
    }

    /// Run the batch on a pool of OS threads, each blocking on `handle`.
    ///
    /// Must not be called from inside an async task. `handle` must belong to
    /// a multi-thread runtime: a current-thread runtime only makes progress
    /// while its owner blocks on it, so workers would stall.
    pub fn run_blocking(&self, job: BatchJob, handle: Handle) -> Result<BatchReport> {
        if handle.runtime_flavor() == RuntimeFlavor::CurrentThread {
            return Err(ExtractionError::Config(
                "run_blocking needs a multi-thread runtime handle".to_string(),
            ));
        }
        let started_at = Utc::now();
        let prepared = self.prepare(job, WriteMode::Inline)?;
        let tally = thread_pool::drive(
            &prepared.context,
            &prepared.pending,
            prepared.workers,
            &handle,
        )?;
        self.finish(prepared, tally, started_at)
    }

    fn prepare(&self, job: BatchJob, write_mode: WriteMode) -> Result<Prepared> {
        if job.schema.is_empty() {
            return Err(ExtractionError::Config(format!(
                "schema '{}' has no fields",
                job.schema.name
            )));
        }

        let run_id = Uuid::now_v7();
        let checkpoint = CheckpointManager::open(&self.config.checkpoint_path, self.config.resume)?;

        let mut seen = HashSet::new();
        let mut documents = Vec::with_capacity(job.documents.len());
        for document in job.documents {
            if seen.insert(document.filename.clone()) {
                documents.push(document);
            } else {
                warn!(filename = %document.filename, "Duplicate filename in batch, ignoring repeat");
            }
        }
        let submitted = documents.len();

        let pending: Vec<Document> = documents
            .into_iter()
            .filter(|d| {
                !(self.config.resume && checkpoint.is_done(&d.filename, self.config.retry_failed))
            })
            .collect();
        let resumed = submitted - pending.len();
        let workers = self.effective_workers();

        info!(
            run_id = %run_id,
            submitted,
            pending = pending.len(),
            resumed,
            workers,
            "Starting batch"
        );

        let context = BatchContext {
            extractor: self.extractor.clone(),
            schema: job.schema,
            theme: job.theme,
            checkpoint: Arc::new(checkpoint),
            circuit: Arc::new(CircuitBreaker::new(self.config.circuit_threshold)),
            cache: FingerprintCache::new(),
            prefix_chars: self.config.fingerprint_prefix_chars,
            write_mode,
            cancel: self.cancel.child_token(),
        };

        Ok(Prepared {
            run_id,
            context: Arc::new(context),
            pending,
            submitted,
            resumed,
            workers,
        })
    }

    fn finish(
        &self,
        prepared: Prepared,
        tally: Tally,
        started_at: DateTime<Utc>,
    ) -> Result<BatchReport> {
        let manager = &prepared.context.checkpoint;
        if let Some(e) = tally.error {
            if let Err(flush_error) = manager.flush() {
                error!(
                    path = %manager.path().display(),
                    error = %flush_error,
                    "Final checkpoint flush failed"
                );
            }
            return Err(e);
        }

        manager.flush()?;
        let checkpoint = CheckpointManager::load(manager.path())?;

        let report = BatchReport {
            run_id: prepared.run_id,
            started_at,
            finished_at: Utc::now(),
            workers: prepared.workers,
            submitted: prepared.submitted,
            resumed: prepared.resumed,
            succeeded: tally.succeeded,
            failed: tally.failed,
            skipped: tally.skipped,
            not_started: tally.not_started,
            cancelled: self.cancel.is_cancelled(),
            circuit: prepared.context.circuit.state(),
            checkpoint,
        };

        info!(
            run_id = %report.run_id,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            resumed = report.resumed,
            not_started = report.not_started,
            total = report.stats().total,
            "Batch complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_document, sample_schema, MockExtractor};
    use tempfile::tempdir;

    #[test]
    fn test_resource_signal_caps_workers() {
        let dir = tempdir().unwrap();
        let config = BatchConfig::new(dir.path().join("c.json")).with_workers(8);
        let runner = BatchRunner::new(Arc::new(MockExtractor::new()), config.clone()).unwrap();
        assert_eq!(runner.effective_workers(), 8);

        let capped = BatchRunner::new(Arc::new(MockExtractor::new()), config.clone())
            .unwrap()
            .with_resource_signal(Arc::new(|| Some(2usize)));
        assert_eq!(capped.effective_workers(), 2);

        let floor = BatchRunner::new(Arc::new(MockExtractor::new()), config)
            .unwrap()
            .with_resource_signal(Arc::new(|| Some(0usize)));
        assert_eq!(floor.effective_workers(), 1);
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        let config = BatchConfig::default().with_workers(0);
        assert!(matches!(
            BatchRunner::new(Arc::new(MockExtractor::new()), config),
            Err(ExtractionError::Config(_))
        ));
    }

    #[test]
    fn test_fatal_error_cancels_run() {
        let cancel = CancellationToken::new();
        let mut tally = Tally::default();
        tally.add(Ok(DocumentStatus::Succeeded), &cancel);
        tally.add(Err(ExtractionError::Config("disk".into())), &cancel);
        tally.add(Err(ExtractionError::Config("again".into())), &cancel);

        assert!(cancel.is_cancelled());
        assert_eq!(tally.succeeded, 1);
        assert!(tally.error.unwrap().to_string().contains("disk"));
    }

    #[test]
    fn test_current_thread_handle_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.json");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let extractor = Arc::new(MockExtractor::new());
        let runner = BatchRunner::new(extractor.clone(), BatchConfig::new(path.clone())).unwrap();
        let job = BatchJob::new(vec![sample_document("a.pdf")], sample_schema(), "falls");

        let result = runner.run_blocking(job, runtime.handle().clone());
        assert!(matches!(result, Err(ExtractionError::Config(_))));
        assert_eq!(extractor.call_count(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_fatal_error_survives_failed_final_flush() {
        let dir = tempdir().unwrap();
        // Parent directory never exists, so every flush fails.
        let config = BatchConfig::new(dir.path().join("missing").join("c.json"));
        let runner = BatchRunner::new(Arc::new(MockExtractor::new()), config).unwrap();
        let job = BatchJob::new(vec![sample_document("a.pdf")], sample_schema(), "falls");
        let prepared = runner.prepare(job, WriteMode::Inline).unwrap();

        let tally = Tally {
            error: Some(ExtractionError::Config("disk".into())),
            ..Tally::default()
        };
        let err = runner.finish(prepared, tally, Utc::now()).unwrap_err();
        assert!(matches!(err, ExtractionError::Config(ref m) if m == "disk"));
    }
}
