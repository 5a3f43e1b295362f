//! Durable, resumable record of per-document outcomes.
//!
//! The checkpoint is one JSON document. Every write serializes a full
//! snapshot into a temp file beside the target, takes an exclusive
//! advisory lock on `<checkpoint>.lock`, writes, flushes and syncs, then
//! renames over the target. A crash mid-write leaves the previous
//! checkpoint intact.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::error::{CheckpointError, CheckpointResult, ExtractionError, FailureKind};
use crate::types::result::PipelineResult;

/// What happened to one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Success {
        result: Box<PipelineResult>,
    },
    Failed {
        kind: FailureKind,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// Not attempted because the circuit was open
    Skipped {
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl DocumentOutcome {
    pub fn failed(error: &ExtractionError) -> Self {
        Self::Failed {
            kind: error.failure_kind(),
            error: error.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    pub fn result(&self) -> Option<&PipelineResult> {
        match self {
            Self::Success { result } => Some(&**result),
            _ => None,
        }
    }
}

/// Aggregate counters; always derived from the file sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExtractionStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
}

/// The persisted batch state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub timestamp: DateTime<Utc>,
    pub processed_files: BTreeSet<String>,

    /// Failed and skipped documents
    pub failed_files: BTreeSet<String>,
    pub results: BTreeMap<String, DocumentOutcome>,
    pub extraction_stats: ExtractionStats,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            processed_files: BTreeSet::new(),
            failed_files: BTreeSet::new(),
            results: BTreeMap::new(),
            extraction_stats: ExtractionStats::default(),
        }
    }
}

impl Checkpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome, replacing any earlier one for the same file.
    pub fn record(&mut self, filename: &str, outcome: DocumentOutcome) {
        self.processed_files.remove(filename);
        self.failed_files.remove(filename);
        if outcome.is_success() {
            self.processed_files.insert(filename.to_string());
        } else {
            self.failed_files.insert(filename.to_string());
        }
        self.results.insert(filename.to_string(), outcome);
        self.timestamp = Utc::now();
        self.recompute_stats();
    }

    /// Whether a resumed run should leave this file alone.
    ///
    /// Successes are always done. Recorded failures are done unless
    /// `retry_failed`; circuit-open skips were never attempted and are
    /// always retried.
    pub fn is_done(&self, filename: &str, retry_failed: bool) -> bool {
        if self.processed_files.contains(filename) {
            return true;
        }
        if !self.failed_files.contains(filename) {
            return false;
        }
        match self.results.get(filename) {
            Some(outcome) if outcome.is_skipped() => false,
            _ => !retry_failed,
        }
    }

    pub fn outcome(&self, filename: &str) -> Option<&DocumentOutcome> {
        self.results.get(filename)
    }

    /// Successful results, in filename order.
    pub fn successes(&self) -> impl Iterator<Item = &PipelineResult> {
        self.results.values().filter_map(DocumentOutcome::result)
    }

    fn recompute_stats(&mut self) {
        // A file lives in exactly one set.
        self.failed_files.retain(|f| !self.processed_files.contains(f));
        self.extraction_stats = ExtractionStats {
            total: self.processed_files.len() + self.failed_files.len(),
            success: self.processed_files.len(),
            failed: self.failed_files.len(),
        };
    }
}

/// Owns the on-disk checkpoint for one batch run.
///
/// In-process writers serialize on the inner mutex; other processes are
/// kept out by the advisory lock.
#[derive(Debug)]
pub struct CheckpointManager {
    path: PathBuf,
    lock_path: PathBuf,
    state: Mutex<Checkpoint>,
}

impl CheckpointManager {
    /// Open the checkpoint at `path`.
    ///
    /// With `resume`, an existing file is loaded; a corrupt one is moved
    /// aside to `<name>.corrupt-<UTC timestamp>` and a fresh checkpoint is
    /// started. A file that exists but cannot be read aborts.
    pub fn open(path: impl Into<PathBuf>, resume: bool) -> CheckpointResult<Self> {
        let path = path.into();
        let checkpoint = if resume {
            Self::load_or_recover(&path)?
        } else {
            Checkpoint::new()
        };

        info!(
            path = %path.display(),
            resume,
            processed = checkpoint.processed_files.len(),
            failed = checkpoint.failed_files.len(),
            "Checkpoint opened"
        );

        Ok(Self {
            lock_path: lock_path_for(&path),
            path,
            state: Mutex::new(checkpoint),
        })
    }

    /// Read a checkpoint from disk. A missing file is an empty checkpoint.
    pub fn load(path: impl AsRef<Path>) -> CheckpointResult<Checkpoint> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Checkpoint::new()),
            Err(source) => {
                return Err(CheckpointError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let mut checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
        checkpoint.recompute_stats();
        Ok(checkpoint)
    }

    fn load_or_recover(path: &Path) -> CheckpointResult<Checkpoint> {
        match Self::load(path) {
            Ok(checkpoint) => Ok(checkpoint),
            Err(CheckpointError::Serialize(parse_error)) => {
                let backup = backup_path_for(path);
                warn!(
                    path = %path.display(),
                    backup = %backup.display(),
                    error = %parse_error,
                    "Checkpoint is corrupt, backing it up and starting fresh"
                );
                std::fs::rename(path, &backup).map_err(|source| CheckpointError::Io {
                    path: backup.clone(),
                    source,
                })?;
                Ok(Checkpoint::new())
            }
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A copy of the in-memory state.
    pub fn snapshot(&self) -> Checkpoint {
        self.lock().clone()
    }

    pub fn is_done(&self, filename: &str, retry_failed: bool) -> bool {
        self.lock().is_done(filename, retry_failed)
    }

    /// Record an outcome and persist the full snapshot.
    ///
    /// Blocks on file I/O; async callers should use `spawn_blocking`.
    pub fn record(&self, filename: &str, outcome: DocumentOutcome) -> CheckpointResult<()> {
        let mut state = self.lock();
        state.record(filename, outcome);
        let result = self.persist(&state);
        if let Err(e) = &result {
            error!(path = %self.path.display(), filename = %filename, error = %e, "Failed to persist checkpoint");
        }
        result
    }

    pub fn record_success(&self, filename: &str, result: PipelineResult) -> CheckpointResult<()> {
        self.record(
            filename,
            DocumentOutcome::Success {
                result: Box::new(result),
            },
        )
    }

    pub fn record_failure(&self, filename: &str, error: &ExtractionError) -> CheckpointResult<()> {
        self.record(filename, DocumentOutcome::failed(error))
    }

    pub fn record_skipped(&self, filename: &str, reason: &str) -> CheckpointResult<()> {
        self.record(filename, DocumentOutcome::skipped(reason))
    }

    /// Write the current state even if nothing changed.
    pub fn flush(&self) -> CheckpointResult<()> {
        let state = self.lock();
        self.persist(&state)
    }

    fn persist(&self, checkpoint: &Checkpoint) -> CheckpointResult<()> {
        let bytes = serde_json::to_vec_pretty(checkpoint)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| CheckpointError::Io { path, source }
        };

        let mut temp = NamedTempFile::new_in(&dir).map_err(io_error(&dir))?;

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|source| CheckpointError::Lock {
                path: self.lock_path.clone(),
                source,
            })?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = lock.write().map_err(|source| CheckpointError::Lock {
            path: self.lock_path.clone(),
            source,
        })?;

        temp.write_all(&bytes).map_err(io_error(temp.path()))?;
        temp.flush().map_err(io_error(temp.path()))?;
        temp.as_file().sync_all().map_err(io_error(temp.path()))?;
        temp.persist(&self.path).map_err(|e| CheckpointError::Io {
            path: self.path.clone(),
            source: e.error,
        })?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "Checkpoint written");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Checkpoint> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%SZ")));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::testing::{sample_document, sample_result};
    use tempfile::tempdir;

    #[test]
    fn test_record_moves_file_between_sets() {
        let mut checkpoint = Checkpoint::new();
        let err = ExtractionError::Llm(LlmError::Provider("503".into()));
        checkpoint.record("a.pdf", DocumentOutcome::failed(&err));
        assert_eq!(checkpoint.extraction_stats.failed, 1);

        let doc = sample_document("a.pdf");
        checkpoint.record("a.pdf", DocumentOutcome::Success {
            result: Box::new(sample_result(&doc)),
        });
        assert!(checkpoint.failed_files.is_empty());
        assert_eq!(
            checkpoint.extraction_stats,
            ExtractionStats {
                total: 1,
                success: 1,
                failed: 0
            }
        );
    }

    #[test]
    fn test_is_done_policy() {
        let mut checkpoint = Checkpoint::new();
        let doc = sample_document("ok.pdf");
        checkpoint.record("ok.pdf", DocumentOutcome::Success {
            result: Box::new(sample_result(&doc)),
        });
        checkpoint.record(
            "bad.pdf",
            DocumentOutcome::failed(&ExtractionError::Llm(LlmError::Provider("x".into()))),
        );
        checkpoint.record("skip.pdf", DocumentOutcome::skipped("circuit open"));

        assert!(checkpoint.is_done("ok.pdf", true));
        assert!(checkpoint.is_done("bad.pdf", false));
        assert!(!checkpoint.is_done("bad.pdf", true));
        assert!(!checkpoint.is_done("skip.pdf", false));
        assert!(!checkpoint.is_done("new.pdf", false));
    }

    #[test]
    fn test_persist_and_reload_is_lossless() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let manager = CheckpointManager::open(&path, true).unwrap();

        let doc = sample_document("a.pdf");
        manager.record_success("a.pdf", sample_result(&doc)).unwrap();
        manager
            .record_failure("b.pdf", &ExtractionError::ResourceExhausted("oom".into()))
            .unwrap();

        let loaded = CheckpointManager::load(&path).unwrap();
        assert_eq!(loaded, manager.snapshot());
        assert!(dir.path().join("checkpoint.json.lock").exists());

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["processed_files"], serde_json::json!(["a.pdf"]));
        assert_eq!(raw["results"]["b.pdf"]["status"], "failed");
        assert_eq!(raw["results"]["b.pdf"]["kind"], "resource_exhausted");
    }

    #[test]
    fn test_corrupt_checkpoint_is_backed_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let manager = CheckpointManager::open(&path, true).unwrap();
        assert_eq!(manager.snapshot().extraction_stats.total, 0);
        assert!(!path.exists());

        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn test_unreadable_checkpoint_aborts() {
        let dir = tempdir().unwrap();
        // A directory where the file should be cannot be read.
        let path = dir.path().join("checkpoint.json");
        std::fs::create_dir(&path).unwrap();

        let err = CheckpointManager::open(&path, true).unwrap_err();
        assert!(matches!(err, CheckpointError::Unreadable { .. }));
    }

    #[test]
    fn test_stats_are_recomputed_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(
            &path,
            r#"{"timestamp":"2024-01-01T00:00:00Z","processed_files":["a"],"failed_files":["b"],
                "results":{},"extraction_stats":{"total":99,"success":0,"failed":0}}"#,
        )
        .unwrap();

        let loaded = CheckpointManager::load(&path).unwrap();
        assert_eq!(
            loaded.extraction_stats,
            ExtractionStats {
                total: 2,
                success: 1,
                failed: 1
            }
        );
    }
}
