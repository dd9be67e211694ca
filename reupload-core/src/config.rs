use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Upload chunks must be multiples of this granularity for resumable sessions.
pub const CHUNK_GRANULARITY: usize = 256 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReuploadConfig {
    pub paths: PathsSection,
    #[serde(default)]
    pub transform: TransformSection,
    #[serde(default)]
    pub upload: UploadSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub batch: BatchSection,
    #[serde(default)]
    pub tools: ToolsSection,
}

impl ReuploadConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.work_dir)
    }

    pub fn download_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.download_dir)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.logs_dir)
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.resolve_path(&self.paths.credentials_path)
    }

    pub fn token_path(&self) -> PathBuf {
        self.resolve_path(&self.paths.token_path)
    }

    pub fn validate(&self) -> Result<()> {
        let chunk = self.upload.chunk_size_bytes;
        if chunk == 0 || chunk % CHUNK_GRANULARITY != 0 {
            return Err(ConfigError::Invalid {
                field: "upload.chunk_size_bytes",
                message: format!("{chunk} is not a positive multiple of {CHUNK_GRANULARITY}"),
            });
        }
        if self.transform.filler_duration_seconds <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "transform.filler_duration_seconds",
                message: "must be greater than zero".into(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                message: "must be greater than zero".into(),
            });
        }
        if self.retry.delay_range_seconds[0] > self.retry.delay_range_seconds[1] {
            return Err(ConfigError::Invalid {
                field: "retry.delay_range_seconds",
                message: "minimum exceeds maximum".into(),
            });
        }
        if self.auth.max_interactive_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "auth.max_interactive_attempts",
                message: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub work_dir: String,
    pub download_dir: String,
    pub logs_dir: String,
    pub credentials_path: String,
    pub token_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransformSection {
    pub filler_duration_seconds: f64,
    pub probe_timeout_seconds: u64,
    pub mux_timeout_seconds: u64,
}

impl Default for TransformSection {
    fn default() -> Self {
        Self {
            filler_duration_seconds: 2.0,
            probe_timeout_seconds: 20,
            mux_timeout_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    pub chunk_size_bytes: usize,
    pub max_concurrent_publishes: usize,
    pub pipeline_timeout_seconds: Option<u64>,
    pub request_timeout_seconds: u64,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            chunk_size_bytes: 5 * 1024 * 1024,
            max_concurrent_publishes: 2,
            pipeline_timeout_seconds: None,
            request_timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub scopes: Vec<String>,
    pub max_interactive_attempts: u32,
    pub callback_host: String,
    pub callback_timeout_seconds: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            scopes: vec![
                "https://www.googleapis.com/auth/youtube.upload".into(),
                "https://www.googleapis.com/auth/youtube".into(),
                "https://www.googleapis.com/auth/youtube.force-ssl".into(),
            ],
            max_interactive_attempts: 3,
            callback_host: "127.0.0.1".into(),
            callback_timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub delay_range_seconds: [u32; 2],
    pub sleep_cap_seconds: u64,
    pub jitter_millis: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_range_seconds: [5, 30],
            sleep_cap_seconds: 120,
            jitter_millis: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchSection {
    pub concurrency: usize,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub yt_dlp: String,
    pub download_timeout_seconds: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".into(),
            ffprobe: "ffprobe".into(),
            yt_dlp: "yt-dlp".into(),
            download_timeout_seconds: 1800,
        }
    }
}

pub fn load_reupload_config<P: AsRef<Path>>(path: P) -> Result<ReuploadConfig> {
    let config: ReuploadConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
