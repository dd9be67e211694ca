#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reupload_core::acquire::{Acquired, Downloader, RemoteMetadata};
use reupload_core::auth::{
    Credential, CredentialStore, InteractiveAuthorizer, ReservedPort, TokenRefresher,
    DEFAULT_TOKEN_URI,
};
use reupload_core::config::CHUNK_GRANULARITY;
use reupload_core::error::{
    classify_platform_error, PipelineError, PipelineResult, TransformError,
};
use reupload_core::media::{FrameRate, MediaMux, MediaProbe, MediaTransformer, VideoSpecs};
use reupload_core::pipeline::{Pipeline, RetryPolicy};
use reupload_core::publish::{ChunkOutcome, PlatformClient, Publisher, UploadRequest, UploadSession};
use tempfile::TempDir;

pub const GRANULE: usize = CHUNK_GRANULARITY;

pub fn specs() -> VideoSpecs {
    VideoSpecs {
        width: 1920,
        height: 1080,
        frame_rate: FrameRate::new(30, 1).unwrap(),
        codec: Some("h264".into()),
        pixel_format: Some("yuv420p".into()),
        audio: None,
    }
}

pub fn credential(token: &str, expires_in: chrono::Duration, refreshable: bool) -> Credential {
    Credential {
        access_token: token.to_string(),
        refresh_token: refreshable.then(|| "refresh-token".to_string()),
        expiry: Some(Utc::now() + expires_in),
        token_uri: DEFAULT_TOKEN_URI.to_string(),
        client_id: Some("client".into()),
        client_secret: Some("secret".into()),
        scopes: vec!["https://www.googleapis.com/auth/youtube.upload".into()],
    }
}

pub fn write_token(path: &Path, credential: &Credential) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_vec(credential).unwrap()).unwrap();
}

/// Returns fixed specs; `output_specs` overrides what the concatenated file reports.
#[derive(Default)]
pub struct FakeProbe {
    pub output_specs: Mutex<Option<VideoSpecs>>,
    pub calls: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl MediaProbe for FakeProbe {
    async fn inspect(&self, path: &Path) -> Result<VideoSpecs, TransformError> {
        self.calls.lock().unwrap().push(path.to_path_buf());
        let is_output = path
            .file_name()
            .map(|name| name.to_string_lossy().starts_with("processed_"))
            .unwrap_or(false);
        if is_output {
            if let Some(specs) = self.output_specs.lock().unwrap().clone() {
                return Ok(specs);
            }
        }
        Ok(specs())
    }
}

/// Writes real files so existence checks and uploads see bytes.
#[derive(Default)]
pub struct FakeMux {
    pub skip_output: bool,
    pub filler_specs: Mutex<Vec<VideoSpecs>>,
}

#[async_trait]
impl MediaMux for FakeMux {
    async fn render_filler(
        &self,
        specs: &VideoSpecs,
        _duration: Duration,
        output: &Path,
    ) -> Result<PathBuf, TransformError> {
        self.filler_specs.lock().unwrap().push(specs.clone());
        tokio::fs::write(output, b"filler").await.unwrap();
        Ok(output.to_path_buf())
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<PathBuf, TransformError> {
        if self.skip_output {
            return Ok(output.to_path_buf());
        }
        let mut joined = Vec::new();
        for input in inputs {
            joined.extend(tokio::fs::read(input).await.map_err(|err| {
                TransformError::MuxFailed {
                    output: output.to_path_buf(),
                    message: err.to_string(),
                }
            })?);
        }
        tokio::fs::write(output.with_file_name("concat_list.txt"), b"list")
            .await
            .unwrap();
        tokio::fs::write(output, joined).await.unwrap();
        Ok(output.to_path_buf())
    }
}

/// Acknowledges every chunk in full. `failures` maps a 1-based chunk call number to a
/// platform error code.
#[derive(Default)]
pub struct FakePlatform {
    pub requests: Mutex<Vec<UploadRequest>>,
    pub chunk_offsets: Mutex<Vec<u64>>,
    pub failures: Mutex<HashMap<usize, &'static str>>,
    pub tokens_seen: Mutex<Vec<String>>,
    pub thumbnails: Mutex<Vec<PathBuf>>,
    pub thumbnail_fails: bool,
    pub chunk_delay: Option<Duration>,
    pub chunk_calls: AtomicUsize,
    pub uploads: AtomicUsize,
}

impl FakePlatform {
    pub fn failing_on(chunk_call: usize, code: &'static str) -> Self {
        let platform = Self::default();
        platform.failures.lock().unwrap().insert(chunk_call, code);
        platform
    }

    pub fn chunk_calls(&self) -> usize {
        self.chunk_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn start_upload(
        &self,
        credential: &Credential,
        request: &UploadRequest,
        total_bytes: u64,
    ) -> PipelineResult<UploadSession> {
        self.tokens_seen
            .lock()
            .unwrap()
            .push(credential.access_token.clone());
        self.requests.lock().unwrap().push(request.clone());
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(UploadSession {
            uri: format!("https://upload.example/session/{n}"),
            total_bytes,
        })
    }

    async fn upload_chunk(
        &self,
        credential: &Credential,
        session: &UploadSession,
        offset: u64,
        chunk: Vec<u8>,
    ) -> PipelineResult<ChunkOutcome> {
        if let Some(delay) = self.chunk_delay {
            tokio::time::sleep(delay).await;
        }
        let call = self.chunk_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.tokens_seen
            .lock()
            .unwrap()
            .push(credential.access_token.clone());
        if let Some(code) = self.failures.lock().unwrap().remove(&call) {
            return Err(classify_platform_error(code, ""));
        }
        self.chunk_offsets.lock().unwrap().push(offset);
        let next = offset + chunk.len() as u64;
        if next >= session.total_bytes {
            Ok(ChunkOutcome::Complete {
                video_id: format!("video-{}", self.uploads.load(Ordering::SeqCst)),
            })
        } else {
            Ok(ChunkOutcome::Continue { next_offset: next })
        }
    }

    async fn set_thumbnail(
        &self,
        _credential: &Credential,
        _video_id: &str,
        image: &Path,
    ) -> PipelineResult<()> {
        self.thumbnails.lock().unwrap().push(image.to_path_buf());
        if self.thumbnail_fails {
            return Err(classify_platform_error("invalidRequest", "bad image"));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRefresher {
    pub calls: AtomicUsize,
    pub fail: bool,
    pub delay: Option<Duration>,
}

#[async_trait]
impl TokenRefresher for FakeRefresher {
    async fn refresh(&self, current: &Credential) -> PipelineResult<Credential> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(PipelineError::AuthFlow {
                message: "refresh rejected".into(),
                error_type: Some("invalid_grant".into()),
                description: None,
            });
        }
        let mut refreshed = current.clone();
        refreshed.access_token = format!("refreshed-{n}");
        refreshed.refresh_token = None;
        refreshed.expiry = Some(Utc::now() + chrono::Duration::hours(1));
        Ok(refreshed)
    }
}

/// Fails the first `failures` attempts, then issues a fresh token.
#[derive(Default)]
pub struct FakeAuthorizer {
    pub calls: AtomicUsize,
    pub failures: usize,
    pub ports: Mutex<Vec<u16>>,
}

impl FakeAuthorizer {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InteractiveAuthorizer for FakeAuthorizer {
    async fn authorize(&self, port: ReservedPort) -> PipelineResult<Credential> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.ports.lock().unwrap().push(port.port());
        if n <= self.failures {
            return Err(PipelineError::AuthFlow {
                message: "user closed the consent window".into(),
                error_type: Some("access_denied".into()),
                description: None,
            });
        }
        Ok(credential(
            &format!("interactive-{n}"),
            chrono::Duration::hours(1),
            true,
        ))
    }
}

/// Writes `<id>.mp4` plus a metadata record into the destination directory.
pub struct FakeDownloader {
    pub metadata: RemoteMetadata,
    pub fetched: Mutex<Vec<PathBuf>>,
}

impl FakeDownloader {
    pub fn new(title: &str, description: &str, tags: &[&str]) -> Self {
        Self {
            metadata: RemoteMetadata {
                title: title.into(),
                description: description.into(),
                tags: tags.iter().map(|tag| tag.to_string()).collect(),
                ..RemoteMetadata::default()
            },
            fetched: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn fetch(&self, reference: &str, dest_dir: &Path) -> PipelineResult<Acquired> {
        tokio::fs::create_dir_all(dest_dir).await.unwrap();
        let path = dest_dir.join("abc123.mp4");
        tokio::fs::write(&path, b"remote video bytes").await.unwrap();
        self.fetched.lock().unwrap().push(path.clone());
        let mut metadata = self.metadata.clone();
        metadata.original_reference = reference.to_string();
        Ok(Acquired { path, metadata })
    }
}

pub fn no_wait_policy(attempts: u32) -> RetryPolicy {
    RetryPolicy {
        attempts,
        delay_range: [0, 0],
        sleep_cap: Duration::ZERO,
        jitter: Duration::ZERO,
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub probe: Arc<FakeProbe>,
    pub mux: Arc<FakeMux>,
    pub platform: Arc<FakePlatform>,
    pub downloader: Arc<FakeDownloader>,
    pub refresher: Arc<FakeRefresher>,
    pub authorizer: Arc<FakeAuthorizer>,
    pub credentials: Arc<CredentialStore>,
}

impl Harness {
    pub fn new(platform: FakePlatform) -> Self {
        Self::with_mux(platform, FakeMux::default())
    }

    pub fn with_mux(platform: FakePlatform, mux: FakeMux) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("config/token.json");
        write_token(
            &token_path,
            &credential("valid-token", chrono::Duration::hours(1), true),
        );
        let refresher = Arc::new(FakeRefresher::default());
        let authorizer = Arc::new(FakeAuthorizer::default());
        let credentials = Arc::new(CredentialStore::new(
            token_path,
            refresher.clone(),
            authorizer.clone(),
        ));
        Self {
            dir,
            probe: Arc::new(FakeProbe::default()),
            mux: Arc::new(mux),
            platform: Arc::new(platform),
            downloader: Arc::new(FakeDownloader::new(
                "Remote Title",
                "Remote description",
                &["remote", "tags"],
            )),
            refresher,
            authorizer,
            credentials,
        }
    }

    /// Drops the stored token and swaps in `authorizer` with a bounded attempt count.
    pub fn unauthenticated(mut self, authorizer: FakeAuthorizer, max_attempts: u32) -> Self {
        let token_path = self.dir.path().join("config/token.json");
        std::fs::remove_file(&token_path).unwrap();
        self.authorizer = Arc::new(authorizer);
        self.credentials = Arc::new(
            CredentialStore::new(token_path, self.refresher.clone(), self.authorizer.clone())
                .with_callback_host("127.0.0.1")
                .with_max_interactive_attempts(max_attempts),
        );
        self
    }

    pub fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    pub fn download_dir(&self) -> PathBuf {
        self.dir.path().join("downloads")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.dir.path().join("logs")
    }

    pub fn source(&self, name: &str, bytes: usize) -> PathBuf {
        let path = self.dir.path().join("inputs").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, vec![7u8; bytes]).unwrap();
        path
    }

    pub fn publisher(&self) -> Publisher {
        Publisher::new(self.platform.clone(), self.credentials.clone())
            .with_chunk_size(GRANULE)
            .with_max_concurrent(4)
    }

    pub fn pipeline(&self) -> Pipeline {
        let transformer = MediaTransformer::new(self.probe.clone(), self.mux.clone());
        Pipeline::new(
            self.downloader.clone(),
            Arc::new(transformer),
            Arc::new(self.publisher()),
            self.work_dir(),
            self.download_dir(),
        )
        .with_retry_policy(no_wait_policy(3))
        .with_failure_log(self.logs_dir())
    }
}

/// Files left under `dir`, recursively. A missing directory counts as empty.
pub fn remaining_files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(remaining_files(&path));
        } else {
            found.push(path);
        }
    }
    found
}
