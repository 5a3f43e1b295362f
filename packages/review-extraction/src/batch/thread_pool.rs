//! Thread-pool scheduler: a fixed pool of OS threads, each driving one
//! document at a time to completion by blocking on the runtime.

use std::sync::{Arc, Mutex};

use rayon::prelude::*;
use tokio::runtime::Handle;
use tracing::debug;

use super::runner::{BatchContext, Tally};
use crate::error::{ExtractionError, Result};
use crate::types::document::Document;

pub(crate) fn drive(
    context: &Arc<BatchContext>,
    documents: &[Document],
    workers: usize,
    handle: &Handle,
) -> Result<Tally> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("review-worker-{}", i))
        .build()
        .map_err(|e| ExtractionError::Config(format!("could not start worker pool: {}", e)))?;
    debug!(threads = pool.current_num_threads(), "Worker pool started");

    let tally = Mutex::new(Tally::default());
    pool.install(|| {
        documents.par_iter().for_each(|document| {
            let status = handle.block_on(context.process(document));
            tally
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .add(status, &context.cancel);
        });
    });

    Ok(tally
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner()))
}
