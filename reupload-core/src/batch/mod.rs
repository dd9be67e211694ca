mod manifest;
mod store;

pub use manifest::{
    batch_template, parse_batch_csv, parse_publish_time, CsvRowError, BATCH_COLUMNS,
    OPTIONAL_COLUMNS,
};
pub use store::{BatchError, BatchJob, BatchResult, JobStatus, JobStore};

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::PipelineResult;
use crate::pipeline::{ItemSpec, Pipeline, PipelineReport};

/// Runs a single item to completion. Implemented by [`Pipeline`].
#[async_trait]
pub trait ItemRunner: Send + Sync {
    async fn run_item(&self, spec: &ItemSpec, cancel: CancellationToken) -> PipelineResult<PipelineReport>;
}

#[async_trait]
impl ItemRunner for Pipeline {
    async fn run_item(&self, spec: &ItemSpec, cancel: CancellationToken) -> PipelineResult<PipelineReport> {
        self.run_with_cancel(spec, cancel).await
    }
}

/// Drains a list of items through the runner, recording every outcome on the job.
/// Item failures never stop the batch.
pub struct BatchCoordinator {
    runner: Arc<dyn ItemRunner>,
    store: JobStore,
    concurrency: usize,
    cancel: CancellationToken,
}

impl BatchCoordinator {
    pub fn new(runner: Arc<dyn ItemRunner>, store: JobStore) -> Self {
        Self {
            runner,
            store,
            concurrency: 1,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn status(&self, job_id: &str) -> BatchResult<BatchJob> {
        self.store.get(job_id)
    }

    /// Registers the job and processes it in the background. The returned record is the
    /// initial "processing" snapshot.
    pub fn submit(&self, items: Vec<ItemSpec>) -> (BatchJob, JoinHandle<BatchResult<BatchJob>>) {
        let job = self.store.create(items.len());
        let handle = tokio::spawn(drive(
            self.runner.clone(),
            self.store.clone(),
            job.job_id.clone(),
            items,
            self.concurrency,
            self.cancel.clone(),
        ));
        (job, handle)
    }

    /// Processes the items inline and returns the completed job.
    pub async fn run(&self, items: Vec<ItemSpec>) -> BatchResult<BatchJob> {
        let job = self.store.create(items.len());
        drive(
            self.runner.clone(),
            self.store.clone(),
            job.job_id,
            items,
            self.concurrency,
            self.cancel.clone(),
        )
        .await
    }
}

async fn drive(
    runner: Arc<dyn ItemRunner>,
    store: JobStore,
    job_id: String,
    items: Vec<ItemSpec>,
    concurrency: usize,
    cancel: CancellationToken,
) -> BatchResult<BatchJob> {
    info!(job_id = %job_id, total = items.len(), concurrency, "batch started");
    let runner = &runner;
    let store = &store;
    let job_ref = job_id.as_str();
    let cancel = &cancel;

    stream::iter(items.into_iter().enumerate())
        .for_each_concurrent(concurrency, |(index, spec)| async move {
            let position = index + 1;
            let recorded = match runner.run_item(&spec, cancel.child_token()).await {
                Ok(report) => {
                    info!(job_id = job_ref, item = position, video_id = %report.video_id, "batch item published");
                    store.record_success(job_ref, &report.video_id)
                }
                Err(err) => {
                    warn!(job_id = job_ref, item = position, error = %err, "batch item failed");
                    store.record_failure(
                        job_ref,
                        format!("Error processing {} (item {position}): {err}", spec.input),
                    )
                }
            };
            if let Err(err) = recorded {
                warn!(job_id = job_ref, error = %err, "failed to record batch item outcome");
            }
        })
        .await;

    let job = store.complete(job_ref)?;
    info!(
        job_id = %job.job_id,
        processed = job.processed_videos,
        failed = job.failed_videos,
        "batch completed"
    );
    Ok(job)
}
