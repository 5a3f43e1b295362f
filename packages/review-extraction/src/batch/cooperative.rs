//! Cooperative scheduler: every document is a future on the caller's
//! runtime, and semaphore permits bound how many run at once.

use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;

use super::runner::{BatchContext, DocumentStatus, Tally};
use crate::types::document::Document;

pub(crate) async fn drive(
    context: &Arc<BatchContext>,
    documents: &[Document],
    workers: usize,
) -> Tally {
    let permits = Semaphore::new(workers.max(1));
    let tally = Mutex::new(Tally::default());

    stream::iter(documents)
        .for_each_concurrent(None, |document| {
            let permits = &permits;
            let tally = &tally;
            async move {
                let status = match permits.acquire().await {
                    Ok(_permit) => context.process(document).await,
                    Err(_) => Ok(DocumentStatus::NotStarted),
                };
                tally
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .add(status, &context.cancel);
            }
        })
        .await;

    tally
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
