//! Per-document extraction seam used by the batch layer.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{document::Document, result::PipelineResult, schema::FieldSchema};

/// Anything that can turn one document into a validated result.
///
/// `ReviewPipeline` is the production implementation; the batch layer only
/// depends on this trait, so tests can swap in a scripted extractor.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(
        &self,
        document: &Document,
        schema: &FieldSchema,
        theme: &str,
    ) -> Result<PipelineResult>;
}

#[async_trait]
impl<T: DocumentExtractor + ?Sized> DocumentExtractor for std::sync::Arc<T> {
    async fn extract(
        &self,
        document: &Document,
        schema: &FieldSchema,
        theme: &str,
    ) -> Result<PipelineResult> {
        (**self).extract(document, schema, theme).await
    }
}
