use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE, RETRY_AFTER};
use reqwest::StatusCode;
use tracing::debug;

use crate::auth::Credential;
use crate::error::{classify_platform_error, PipelineError, PipelineResult, RetryableError, RetryableKind};

use super::types::{ChunkOutcome, ErrorEnvelope, UploadRequest, UploadResponse, UploadSession};
use super::PlatformClient;

pub const DEFAULT_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/youtube/v3";

/// Resumable-upload client for the YouTube Data API.
///
/// The `reqwest::Client` must not follow redirects: chunk acknowledgements arrive as
/// `308 Resume Incomplete`.
pub struct YouTubeClient {
    http: reqwest::Client,
    upload_base: String,
}

impl YouTubeClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            upload_base: DEFAULT_UPLOAD_BASE.to_string(),
        }
    }

    pub fn with_upload_base(mut self, upload_base: impl Into<String>) -> Self {
        self.upload_base = upload_base.into();
        self
    }
}

#[async_trait]
impl PlatformClient for YouTubeClient {
    async fn start_upload(
        &self,
        credential: &Credential,
        request: &UploadRequest,
        total_bytes: u64,
    ) -> PipelineResult<UploadSession> {
        let url = format!("{}/videos", self.upload_base);
        let response = self
            .http
            .post(&url)
            .query(&[("uploadType", "resumable"), ("part", request.parts())])
            .header(AUTHORIZATION, credential.bearer())
            .header("X-Upload-Content-Length", total_bytes.to_string())
            .header("X-Upload-Content-Type", "video/*")
            .json(request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_response(status, &headers, &body));
        }
        let uri = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| PipelineError::Publish("upload session response has no Location header".into()))?;
        debug!(session = %uri, "resumable session created");
        Ok(UploadSession { uri, total_bytes })
    }

    async fn upload_chunk(
        &self,
        credential: &Credential,
        session: &UploadSession,
        offset: u64,
        chunk: Vec<u8>,
    ) -> PipelineResult<ChunkOutcome> {
        if chunk.is_empty() {
            return Err(PipelineError::Publish("refusing to send an empty chunk".into()));
        }
        let last = offset + chunk.len() as u64 - 1;
        let response = self
            .http
            .put(&session.uri)
            .header(AUTHORIZATION, credential.bearer())
            .header(CONTENT_LENGTH, chunk.len().to_string())
            .header(CONTENT_RANGE, format!("bytes {offset}-{last}/{}", session.total_bytes))
            .body(chunk)
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::PERMANENT_REDIRECT {
            return match response.headers().get(RANGE).and_then(|v| v.to_str().ok()).and_then(parse_range_end) {
                Some(end) => Ok(ChunkOutcome::Continue { next_offset: end + 1 }),
                None => Err(RetryableError::new(
                    RetryableKind::Network,
                    format!("chunk at offset {offset} was not persisted"),
                )
                .into()),
            };
        }
        if status.is_success() {
            let body: UploadResponse = response.json().await?;
            if let Some(upload_status) = body.status.as_ref().and_then(|s| s.upload_status.as_deref()) {
                debug!(video_id = %body.id, upload_status, "upload accepted");
            }
            return Ok(ChunkOutcome::Complete { video_id: body.id });
        }
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Err(classify_response(status, &headers, &body))
    }

    async fn set_thumbnail(&self, credential: &Credential, video_id: &str, image: &Path) -> PipelineResult<()> {
        let bytes = tokio::fs::read(image)
            .await
            .map_err(|err| PipelineError::storage(image, "read", err))?;
        let content_type = match image.extension().and_then(|ext| ext.to_str()) {
            Some("png") => "image/png",
            _ => "image/jpeg",
        };
        let response = self
            .http
            .post(format!("{}/thumbnails/set", self.upload_base))
            .query(&[("videoId", video_id)])
            .header(AUTHORIZATION, credential.bearer())
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Err(classify_response(status, &headers, &body))
    }
}

/// `Range: bytes=0-524287` -> `524287`.
fn parse_range_end(value: &str) -> Option<u64> {
    let (_, end) = value.trim().strip_prefix("bytes=")?.split_once('-')?;
    end.trim().parse().ok()
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Maps a failed platform response onto the pipeline taxonomy.
pub(crate) fn classify_response(status: StatusCode, headers: &HeaderMap, body: &str) -> PipelineError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let message = envelope
        .as_ref()
        .map(|e| e.error.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("platform returned {status}"));

    let error = match envelope.as_ref().and_then(|e| e.error.reason()) {
        Some(reason) => match classify_platform_error(reason, &message) {
            PipelineError::Platform { .. } if status.is_server_error() => {
                RetryableError::new(RetryableKind::Network, message).into()
            }
            classified => classified,
        },
        None if status == StatusCode::UNAUTHORIZED => PipelineError::Credentials {
            message,
            path: None,
        },
        None if status == StatusCode::TOO_MANY_REQUESTS => {
            RetryableError::new(RetryableKind::RateLimit, message).into()
        }
        None if status.is_server_error() => RetryableError::new(RetryableKind::Network, message).into(),
        None => PipelineError::Platform {
            code: status.as_u16().to_string(),
            message,
        },
    };

    match (error, retry_after(headers)) {
        (PipelineError::Retryable(inner), Some(wait)) => PipelineError::Retryable(inner.with_retry_after(wait)),
        (error, _) => error,
    }
}
