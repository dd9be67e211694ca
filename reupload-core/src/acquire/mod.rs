use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};
use url::Url;

use crate::command::{run_checked, CommandExecutor, SystemCommandExecutor};
use crate::error::{PipelineError, PipelineResult};

const DEFAULT_FORMAT: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "mov", "m4v"];
const THUMBNAIL_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Metadata reported by the source platform, used as defaults for fields the caller left empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RemoteMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub duration_seconds: Option<f64>,
    pub thumbnail: Option<PathBuf>,
    pub original_reference: String,
}

#[derive(Debug, Clone)]
pub struct Acquired {
    pub path: PathBuf,
    pub metadata: RemoteMetadata,
}

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Retrieves `reference` into `dest_dir`. Everything written lands under `dest_dir`.
    async fn fetch(&self, reference: &str, dest_dir: &Path) -> PipelineResult<Acquired>;
}

/// Only absolute http(s) URLs with a host are accepted as remote references.
pub fn validate_reference(reference: &str) -> PipelineResult<Url> {
    let url = Url::parse(reference.trim())
        .map_err(|err| PipelineError::validation("reference", format!("{reference}: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PipelineError::validation(
            "reference",
            format!("unsupported scheme {}", url.scheme()),
        ));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(PipelineError::validation("reference", "missing host"));
    }
    Ok(url)
}

/// Subset of the yt-dlp info document the pipeline consumes.
#[derive(Debug, Deserialize)]
pub struct RemoteInfo {
    pub id: String,
    #[serde(default = "default_ext")]
    pub ext: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default, rename = "_filename")]
    pub filename: Option<String>,
}

fn default_ext() -> String {
    "mp4".to_string()
}

pub struct YtDlpDownloader {
    binary: PathBuf,
    timeout: Duration,
    format: String,
    executor: Arc<dyn CommandExecutor>,
}

impl YtDlpDownloader {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            format: DEFAULT_FORMAT.to_string(),
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    fn args(&self, url: &Url, dest_dir: &Path) -> Vec<String> {
        vec![
            "--dump-json".into(),
            "--no-simulate".into(),
            "--no-playlist".into(),
            "--no-progress".into(),
            "--quiet".into(),
            "--no-warnings".into(),
            "--format".into(),
            self.format.clone(),
            "--merge-output-format".into(),
            "mp4".into(),
            "--write-thumbnail".into(),
            "--output".into(),
            dest_dir.join("%(id)s.%(ext)s").display().to_string(),
            url.to_string(),
        ]
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn fetch(&self, reference: &str, dest_dir: &Path) -> PipelineResult<Acquired> {
        let url = validate_reference(reference)?;
        fs::create_dir_all(dest_dir)
            .await
            .map_err(|err| PipelineError::storage(dest_dir, "create_dir", err))?;
        info!(reference, dest = %dest_dir.display(), "starting download");

        let output = run_checked(
            self.executor.as_ref(),
            &self.binary,
            &self.args(&url, dest_dir),
            self.timeout,
        )
        .await
        .map_err(|err| PipelineError::Download {
            reference: reference.to_string(),
            message: err.to_string(),
        })?;
        let info = parse_info(&output.stdout).map_err(|message| PipelineError::Download {
            reference: reference.to_string(),
            message,
        })?;

        let path = locate_download(&info, dest_dir)
            .await
            .ok_or_else(|| PipelineError::Download {
                reference: reference.to_string(),
                message: format!("downloaded file for {} not found in {}", info.id, dest_dir.display()),
            })?;
        let thumbnail = find_with_stem(dest_dir, &info.id, THUMBNAIL_EXTENSIONS).await;
        debug!(path = %path.display(), thumbnail = ?thumbnail, "download located");
        info!(reference, path = %path.display(), "download complete");

        Ok(Acquired {
            path,
            metadata: RemoteMetadata {
                title: info.title.unwrap_or_default(),
                description: info.description.unwrap_or_default(),
                tags: info.tags.unwrap_or_default(),
                duration_seconds: info.duration,
                thumbnail,
                original_reference: reference.to_string(),
            },
        })
    }
}

/// yt-dlp prints one JSON document per line; the last one describes the downloaded item.
pub fn parse_info(stdout: &[u8]) -> Result<RemoteInfo, String> {
    let text = String::from_utf8_lossy(stdout);
    let line = text
        .lines()
        .rev()
        .find(|line| line.trim_start().starts_with('{'))
        .ok_or_else(|| "yt-dlp produced no metadata".to_string())?;
    serde_json::from_str(line).map_err(|err| format!("invalid yt-dlp metadata: {err}"))
}

async fn locate_download(info: &RemoteInfo, dest_dir: &Path) -> Option<PathBuf> {
    let expected = dest_dir.join(format!("{}.{}", info.id, info.ext));
    if fs::try_exists(&expected).await.unwrap_or(false) {
        return Some(expected);
    }
    if let Some(name) = &info.filename {
        let reported = PathBuf::from(name);
        if fs::try_exists(&reported).await.unwrap_or(false) {
            return Some(reported);
        }
    }
    find_with_stem(dest_dir, &info.id, VIDEO_EXTENSIONS).await
}

async fn find_with_stem(dir: &Path, stem: &str, extensions: &[&str]) -> Option<PathBuf> {
    for ext in extensions {
        let candidate = dir.join(format!("{stem}.{ext}"));
        if fs::try_exists(&candidate).await.unwrap_or(false) {
            return Some(candidate);
        }
    }
    None
}
