mod thumbnail;
mod types;
mod youtube;

pub use thumbnail::{prepare_thumbnail, THUMBNAIL_HEIGHT, THUMBNAIL_WIDTH};
pub use types::{
    ChunkOutcome, ErrorBody, ErrorDetail, ErrorEnvelope, PublishOutcome, Snippet, UploadProgress,
    UploadRequest, UploadResponse, UploadSession, UploadStatus,
};
pub use youtube::{YouTubeClient, DEFAULT_UPLOAD_BASE};

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{Credential, CredentialStore};
use crate::config::CHUNK_GRANULARITY;
use crate::error::{PipelineError, PipelineResult};
use crate::metadata::VideoMetadata;

/// Transport to the hosting platform. Every error is already classified.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn start_upload(
        &self,
        credential: &Credential,
        request: &UploadRequest,
        total_bytes: u64,
    ) -> PipelineResult<UploadSession>;

    async fn upload_chunk(
        &self,
        credential: &Credential,
        session: &UploadSession,
        offset: u64,
        chunk: Vec<u8>,
    ) -> PipelineResult<ChunkOutcome>;

    async fn set_thumbnail(
        &self,
        credential: &Credential,
        video_id: &str,
        image: &Path,
    ) -> PipelineResult<()>;
}

pub struct Publisher {
    client: Arc<dyn PlatformClient>,
    credentials: Arc<CredentialStore>,
    chunk_size: usize,
    permits: Arc<Semaphore>,
}

impl Publisher {
    pub fn new(client: Arc<dyn PlatformClient>, credentials: Arc<CredentialStore>) -> Self {
        Self {
            client,
            credentials,
            chunk_size: 5 * 1024 * 1024,
            permits: Arc::new(Semaphore::new(2)),
        }
    }

    /// Rounded down to the platform granularity, never below one granule.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = (chunk_size / CHUNK_GRANULARITY).max(1) * CHUNK_GRANULARITY;
        self
    }

    /// Caps in-flight publishes across every pipeline sharing this publisher.
    pub fn with_max_concurrent(mut self, limit: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Drives the resumable upload. Chunk failures are returned as classified errors
    /// without retrying; `progress` keeps the session and acknowledged offset so the
    /// caller can resume.
    pub async fn publish(
        &self,
        file: &Path,
        metadata: &VideoMetadata,
        thumbnail: Option<&Path>,
        progress: &mut UploadProgress,
        cancel: &CancellationToken,
    ) -> PipelineResult<PublishOutcome> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(PipelineError::Cancelled("publish cancelled while queued".into()));
            }
            permit = self.permits.acquire() => permit
                .map_err(|_| PipelineError::Publish("publisher is shut down".into()))?,
        };

        let total_bytes = tokio::fs::metadata(file)
            .await
            .map_err(|err| PipelineError::storage(file, "stat", err))?
            .len();
        if total_bytes == 0 {
            return Err(PipelineError::validation(
                "file",
                format!("{} is empty", file.display()),
            ));
        }

        let credential = self.credentials.ensure_valid().await?;
        let session = match progress.session.clone() {
            Some(session) if session.total_bytes == total_bytes => {
                info!(offset = progress.offset, total_bytes, "resuming upload session");
                session
            }
            _ => {
                let request = UploadRequest::from_metadata(metadata);
                let session = self
                    .guarded(&credential, self.client.start_upload(&credential, &request, total_bytes))
                    .await?;
                progress.session = Some(session.clone());
                progress.offset = 0;
                progress.chunks_sent = 0;
                info!(title = %metadata.title, total_bytes, "upload session opened");
                session
            }
        };

        let mut reader = File::open(file)
            .await
            .map_err(|err| PipelineError::storage(file, "open", err))?;
        let video_id = loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled(format!(
                    "upload cancelled at offset {}",
                    progress.offset
                )));
            }
            let offset = progress.offset;
            let length = (total_bytes - offset).min(self.chunk_size as u64) as usize;
            let mut chunk = vec![0u8; length];
            reader
                .seek(SeekFrom::Start(offset))
                .await
                .map_err(|err| PipelineError::storage(file, "seek", err))?;
            reader
                .read_exact(&mut chunk)
                .await
                .map_err(|err| PipelineError::storage(file, "read", err))?;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(PipelineError::Cancelled(format!("upload cancelled at offset {offset}")));
                }
                outcome = self.guarded(&credential, self.client.upload_chunk(&credential, &session, offset, chunk)) => outcome?,
            };
            progress.chunks_sent += 1;
            match outcome {
                ChunkOutcome::Complete { video_id } => break video_id,
                ChunkOutcome::Continue { next_offset } => {
                    if next_offset <= offset || next_offset >= total_bytes {
                        return Err(PipelineError::Publish(format!(
                            "platform acknowledged offset {next_offset} after sending {offset}..{} of {total_bytes}",
                            offset + length as u64
                        )));
                    }
                    debug!(next_offset, total_bytes, "chunk acknowledged");
                    progress.offset = next_offset;
                }
            }
        };
        let chunks = progress.chunks_sent;
        progress.reset();
        info!(%video_id, total_bytes, chunks, "upload complete");

        let mut thumbnail_set = false;
        if let Some(image) = thumbnail {
            match self.client.set_thumbnail(&credential, &video_id, image).await {
                Ok(()) => {
                    thumbnail_set = true;
                    info!(%video_id, "thumbnail set");
                }
                Err(err) => warn!(%video_id, error = %err, "failed to set thumbnail"),
            }
        }

        Ok(PublishOutcome {
            video_id,
            bytes_uploaded: total_bytes,
            chunks,
            thumbnail_set,
        })
    }

    /// Invalidates the credential when the platform rejects it, then passes the error on.
    async fn guarded<T>(
        &self,
        credential: &Arc<Credential>,
        call: impl std::future::Future<Output = PipelineResult<T>>,
    ) -> PipelineResult<T> {
        match call.await {
            Err(err) if err.is_auth_failure() => {
                self.credentials.invalidate(credential).await;
                Err(err)
            }
            other => other,
        }
    }
}
