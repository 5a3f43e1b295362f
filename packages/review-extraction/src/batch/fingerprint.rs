//! Duplicate-document short circuit for a single batch run.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::info;

use crate::error::Result;
use crate::types::document::Document;
use crate::types::result::PipelineResult;

/// SHA-256 of the first N characters of a document's text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(document: &Document, prefix_chars: usize) -> Self {
        let prefix: String = document.source_text().chars().take(prefix_chars).collect();
        let mut hasher = Sha256::new();
        hasher.update(prefix.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0[..12.min(self.0.len())])
    }
}

/// Fingerprint → result, filled at most once per fingerprint.
///
/// Concurrent duplicates wait on the same cell, so only one of them runs
/// the pipeline. A failed computation leaves the cell empty and the next
/// duplicate computes for itself.
#[derive(Debug, Default)]
pub struct FingerprintCache {
    entries: Mutex<HashMap<Fingerprint, Arc<OnceCell<PipelineResult>>>>,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached result for `fingerprint`, or run `compute`.
    ///
    /// A hit is re-labelled with `document`'s filename and carries a
    /// warning naming the original; values and evidence are unchanged.
    pub async fn get_or_compute<F, Fut>(
        &self,
        document: &Document,
        fingerprint: &Fingerprint,
        compute: F,
    ) -> Result<PipelineResult>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PipelineResult>>,
    {
        let cell = {
            let mut entries = self
                .entries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            entries.entry(fingerprint.clone()).or_default().clone()
        };

        let computed = AtomicBool::new(false);
        let cached = cell
            .get_or_try_init(|| {
                let computed = &computed;
                async move {
                    computed.store(true, Ordering::SeqCst);
                    compute().await
                }
            })
            .await?;

        if computed.load(Ordering::SeqCst) {
            return Ok(cached.clone());
        }

        info!(
            filename = %document.filename,
            original = %cached.source_filename,
            fingerprint = %fingerprint,
            "Duplicate document, reusing cached result"
        );
        let mut result = cached.clone();
        result.warnings.push(format!(
            "duplicate of {}; result reused from the fingerprint cache",
            cached.source_filename
        ));
        result.source_filename = document.filename.clone();
        Ok(result)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExtractionError, LlmError};
    use crate::testing::{sample_document, sample_result};
    use crate::types::document::DocumentUnit;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_fingerprint_ignores_filename_and_tail() {
        let a = Document::new("a.pdf", vec![DocumentUnit::new("a", "same text here")]);
        let b = Document::new("b.pdf", vec![DocumentUnit::new("b", "same text here")]);
        let c = Document::new("c.pdf", vec![DocumentUnit::new("c", "same text, other tail")]);

        assert_eq!(Fingerprint::of(&a, 100), Fingerprint::of(&b, 100));
        assert_ne!(Fingerprint::of(&a, 100), Fingerprint::of(&c, 100));
        assert_eq!(Fingerprint::of(&a, 4), Fingerprint::of(&c, 4));
        assert_eq!(Fingerprint::of(&a, 100).as_str().len(), 64);
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_compute_once() {
        let cache = FingerprintCache::new();
        let runs = AtomicUsize::new(0);
        let first = sample_document("first.pdf");
        let second = sample_document("second.pdf");
        let fp = Fingerprint::of(&first, 10_000);

        let compute = |doc: Document| {
            let runs = &runs;
            move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(sample_result(&doc))
            }
        };

        let (a, b) = tokio::join!(
            cache.get_or_compute(&first, &fp, compute(first.clone())),
            cache.get_or_compute(&second, &fp, compute(second.clone())),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(a.final_data, b.final_data);
        assert_eq!(a.evidence, b.evidence);
        assert_eq!(a.source_filename, "first.pdf");
        assert_eq!(b.source_filename, "second.pdf");
        assert!(b.warnings.iter().any(|w| w.contains("first.pdf")));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = FingerprintCache::new();
        let doc = sample_document("a.pdf");
        let fp = Fingerprint::of(&doc, 10_000);

        let failed = cache
            .get_or_compute(&doc, &fp, || async {
                Err(ExtractionError::Llm(LlmError::Provider("503".into())))
            })
            .await;
        assert!(failed.is_err());
        assert!(cache.is_empty());

        let ok = cache
            .get_or_compute(&doc, &fp, || async { Ok(sample_result(&doc)) })
            .await
            .unwrap();
        assert!(ok.warnings.is_empty());
    }
}
