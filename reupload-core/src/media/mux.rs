use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;

use crate::command::{run_checked, CommandExecutor, SystemCommandExecutor};
use crate::error::TransformError;

use super::types::VideoSpecs;

pub const CONCAT_LIST_NAME: &str = "concat_list.txt";

#[async_trait]
pub trait MediaMux: Send + Sync {
    /// Synthesizes a black clip of `duration` whose stream parameters match `specs`.
    async fn render_filler(
        &self,
        specs: &VideoSpecs,
        duration: Duration,
        output: &Path,
    ) -> Result<PathBuf, TransformError>;

    /// Joins `inputs` in order without re-encoding.
    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<PathBuf, TransformError>;
}

pub struct FfmpegMux {
    binary: PathBuf,
    timeout: Duration,
    executor: Arc<dyn CommandExecutor>,
}

impl FfmpegMux {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub(crate) fn filler_args(specs: &VideoSpecs, duration: Duration, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "lavfi".into(),
            "-i".into(),
            format!(
                "color=c=black:s={}:r={}",
                specs.resolution(),
                specs.frame_rate
            ),
        ];
        if let Some(audio) = &specs.audio {
            args.extend([
                "-f".into(),
                "lavfi".into(),
                "-i".into(),
                format!(
                    "anullsrc=r={}:cl={}",
                    audio.sample_rate, audio.channel_layout
                ),
            ]);
        }
        args.extend([
            "-t".into(),
            format!("{:.3}", duration.as_secs_f64()),
            "-c:v".into(),
            video_encoder(specs.codec.as_deref()).into(),
            "-pix_fmt".into(),
            specs
                .pixel_format
                .clone()
                .unwrap_or_else(|| "yuv420p".to_string()),
            "-r".into(),
            specs.frame_rate.to_string(),
        ]);
        if let Some(audio) = &specs.audio {
            args.extend([
                "-c:a".into(),
                audio_encoder(audio.codec.as_deref()).into(),
                "-ar".into(),
                audio.sample_rate.to_string(),
                "-shortest".into(),
            ]);
        }
        args.push(output.display().to_string());
        args
    }

    fn concat_args(list: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            list.display().to_string(),
            "-c".into(),
            "copy".into(),
            output.display().to_string(),
        ]
    }
}

#[async_trait]
impl MediaMux for FfmpegMux {
    async fn render_filler(
        &self,
        specs: &VideoSpecs,
        duration: Duration,
        output: &Path,
    ) -> Result<PathBuf, TransformError> {
        let args = Self::filler_args(specs, duration, output);
        run_checked(self.executor.as_ref(), &self.binary, &args, self.timeout)
            .await
            .map_err(|err| TransformError::FillerFailed {
                path: output.to_path_buf(),
                message: err.to_string(),
            })?;
        Ok(output.to_path_buf())
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<PathBuf, TransformError> {
        let list = output.with_file_name(CONCAT_LIST_NAME);
        let inputs = inputs
            .iter()
            .map(std::path::absolute)
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|err| TransformError::MuxFailed {
                output: output.to_path_buf(),
                message: format!("cannot resolve concat input: {err}"),
            })?;
        fs::write(&list, concat_list(&inputs))
            .await
            .map_err(|err| TransformError::MuxFailed {
                output: output.to_path_buf(),
                message: format!("failed to write {}: {err}", list.display()),
            })?;
        let args = Self::concat_args(&list, output);
        run_checked(self.executor.as_ref(), &self.binary, &args, self.timeout)
            .await
            .map_err(|err| TransformError::MuxFailed {
                output: output.to_path_buf(),
                message: err.to_string(),
            })?;
        Ok(output.to_path_buf())
    }
}

/// Concat demuxer list; single quotes inside paths are closed, escaped and reopened.
/// The demuxer resolves relative entries against the list's directory, so callers pass
/// absolute paths.
fn concat_list(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|path| {
            let escaped = path.display().to_string().replace('\'', r"'\''");
            format!("file '{escaped}'\n")
        })
        .collect()
}

fn video_encoder(codec: Option<&str>) -> &'static str {
    match codec {
        Some("hevc") => "libx265",
        Some("vp9") => "libvpx-vp9",
        Some("vp8") => "libvpx",
        Some("av1") => "libaom-av1",
        Some("mpeg4") => "mpeg4",
        _ => "libx264",
    }
}

fn audio_encoder(codec: Option<&str>) -> &'static str {
    match codec {
        Some("opus") => "libopus",
        Some("vorbis") => "libvorbis",
        Some("mp3") => "libmp3lame",
        _ => "aac",
    }
}
