mod types;

pub use types::{
    InputDescriptor, ItemArtifacts, ItemSpec, ItemStatus, PipelineItem, PipelineReport,
    RetryPolicy,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::acquire::{validate_reference, Downloader};
use crate::error::{PipelineError, PipelineResult};
use crate::media::MediaTransformer;
use crate::metadata::VideoMetadata;
use crate::publish::{prepare_thumbnail, PublishOutcome, Publisher, UploadProgress};

pub const FAILURE_LOG_NAME: &str = "pipeline_failures.log";

/// Runs Acquire, Transform and Publish for one item and removes everything it wrote.
pub struct Pipeline {
    downloader: Arc<dyn Downloader>,
    transformer: Arc<MediaTransformer>,
    publisher: Arc<Publisher>,
    retry_policy: RetryPolicy,
    work_dir: PathBuf,
    download_dir: PathBuf,
    timeout: Option<Duration>,
    failure_log: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        transformer: Arc<MediaTransformer>,
        publisher: Arc<Publisher>,
        work_dir: impl Into<PathBuf>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            downloader,
            transformer,
            publisher,
            retry_policy: RetryPolicy::default(),
            work_dir: work_dir.into(),
            download_dir: download_dir.into(),
            timeout: None,
            failure_log: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_failure_log(mut self, logs_dir: impl AsRef<Path>) -> Self {
        self.failure_log = Some(logs_dir.as_ref().join(FAILURE_LOG_NAME));
        self
    }

    pub async fn run(&self, spec: &ItemSpec) -> PipelineResult<PipelineReport> {
        self.run_with_cancel(spec, CancellationToken::new()).await
    }

    pub async fn run_with_cancel(
        &self,
        spec: &ItemSpec,
        cancel: CancellationToken,
    ) -> PipelineResult<PipelineReport> {
        let mut item = PipelineItem::new(spec.input.clone());
        info!(item = %item.key, input = %item.input, "pipeline started");

        let result = self.run_bounded(&mut item, spec, &cancel).await;
        self.cleanup(&item).await;

        match &result {
            Ok(report) => {
                item.status = ItemStatus::Published;
                info!(item = %item.key, video_id = %report.video_id, "pipeline finished");
            }
            Err(err) => {
                item.status = match err {
                    PipelineError::Cancelled(_) => ItemStatus::Cancelled,
                    _ => ItemStatus::Failed,
                };
                warn!(
                    item = %item.key,
                    input = %item.input,
                    kind = err.kind_label(),
                    error = %err,
                    "pipeline failed"
                );
                self.log_failure(&item, err).await;
            }
        }
        result
    }

    async fn run_bounded(
        &self,
        item: &mut PipelineItem,
        spec: &ItemSpec,
        cancel: &CancellationToken,
    ) -> PipelineResult<PipelineReport> {
        let limit = self.timeout;
        let stages = async {
            match limit {
                Some(limit) => tokio::time::timeout(limit, self.run_stages(item, spec, cancel))
                    .await
                    .unwrap_or_else(|_| {
                        Err(PipelineError::Cancelled(format!(
                            "pipeline timed out after {}s",
                            limit.as_secs()
                        )))
                    }),
                None => self.run_stages(item, spec, cancel).await,
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled("pipeline cancelled".into())),
            result = stages => result,
        }
    }

    async fn run_stages(
        &self,
        item: &mut PipelineItem,
        spec: &ItemSpec,
        cancel: &CancellationToken,
    ) -> PipelineResult<PipelineReport> {
        let (source, remote) = match &spec.input {
            InputDescriptor::Local(path) => (path.clone(), None),
            InputDescriptor::Remote(reference) => {
                validate_reference(reference)?;
                item.status = ItemStatus::Acquiring;
                let dest = self.download_dir.join(&item.key);
                item.artifacts.download_root = Some(dest.clone());
                let acquired = self.downloader.fetch(reference, &dest).await?;
                info!(
                    item = %item.key,
                    title = %acquired.metadata.title,
                    duration_seconds = ?acquired.metadata.duration_seconds,
                    "source acquired"
                );
                (acquired.path, Some(acquired.metadata))
            }
        };
        let metadata = VideoMetadata::resolve(&spec.metadata, remote.as_ref(), &source, Utc::now())?;

        item.status = ItemStatus::Transforming;
        let work_root = self.work_dir.join(&item.key);
        item.artifacts.work_root = Some(work_root.clone());
        let transformed = self.transformer.transform(&work_root, &source).await?;

        let thumbnail = match &metadata.thumbnail {
            Some(image) => match prepare_thumbnail(image, &work_root.join("thumbnail.jpg")).await {
                Ok(prepared) => Some(prepared),
                Err(err) => {
                    warn!(item = %item.key, error = %err, "skipping thumbnail");
                    None
                }
            },
            None => None,
        };

        item.status = ItemStatus::Publishing;
        let (published, attempts) = self
            .publish_with_retry(
                &item.key,
                &transformed.output,
                &metadata,
                thumbnail.as_deref(),
                cancel,
            )
            .await?;

        Ok(PipelineReport {
            item_key: item.key.clone(),
            input: item.input.clone(),
            video_id: published.video_id,
            metadata,
            publish_attempts: attempts,
            thumbnail_set: published.thumbnail_set,
            completed_at: Utc::now(),
        })
    }

    /// Retries only retryable failures, resuming the same upload session each time. A
    /// rejected credential earns one immediate retry after the store refreshes it.
    async fn publish_with_retry(
        &self,
        item_key: &str,
        file: &Path,
        metadata: &VideoMetadata,
        thumbnail: Option<&Path>,
        cancel: &CancellationToken,
    ) -> PipelineResult<(PublishOutcome, u32)> {
        let mut progress = UploadProgress::default();
        let mut attempt = 0u32;
        let mut auth_retried = false;
        loop {
            attempt += 1;
            let err = match self
                .publisher
                .publish(file, metadata, thumbnail, &mut progress, cancel)
                .await
            {
                Ok(outcome) => return Ok((outcome, attempt)),
                Err(err) => err,
            };
            if err.is_auth_failure() && !err.is_auth_exhausted() && !auth_retried {
                auth_retried = true;
                warn!(item = item_key, error = %err, "credential rejected, retrying publish");
                continue;
            }
            let Some(retryable) = err.as_retryable() else {
                return Err(err);
            };
            let allowed = self.retry_policy.attempts_for(retryable);
            if attempt >= allowed {
                return Err(err);
            }
            let delay = self.retry_policy.delay_for(retryable, attempt - 1);
            warn!(
                item = item_key,
                attempt,
                allowed,
                offset = progress.offset,
                wait = ?delay,
                error = %err,
                "retrying publish"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(PipelineError::Cancelled("publish retry cancelled".into()));
                }
                _ = sleep(delay) => {}
            }
        }
    }

    async fn cleanup(&self, item: &PipelineItem) {
        for root in item.artifacts.roots() {
            match fs::remove_dir_all(root).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(item = %item.key, path = %root.display(), error = %err, "failed to clean artifacts")
                }
            }
        }
    }

    async fn log_failure(&self, item: &PipelineItem, error: &PipelineError) {
        let Some(path) = &self.failure_log else {
            return;
        };
        let line = format!(
            "{} [{}] {} {}: {}\n",
            Utc::now().to_rfc3339(),
            error.kind_label(),
            item.key,
            item.input,
            error
        );
        if let Err(err) = append_line(path, &line).await {
            warn!(path = %path.display(), error = %err, "failed to write failure log");
        }
    }
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
