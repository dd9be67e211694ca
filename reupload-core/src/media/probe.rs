use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::command::{run_checked, CommandExecutor, SystemCommandExecutor};
use crate::error::TransformError;

use super::types::{AudioSpecs, FrameRate, VideoSpecs};

/// Metadata-only inspection of a media file.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn inspect(&self, path: &Path) -> Result<VideoSpecs, TransformError>;
}

pub struct FfprobeProbe {
    binary: PathBuf,
    timeout: Duration,
    executor: Arc<dyn CommandExecutor>,
}

impl FfprobeProbe {
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

    fn args(path: &Path) -> Vec<String> {
        vec![
            "-v".into(),
            "error".into(),
            "-print_format".into(),
            "json".into(),
            "-show_streams".into(),
            path.display().to_string(),
        ]
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn inspect(&self, path: &Path) -> Result<VideoSpecs, TransformError> {
        let output = run_checked(
            self.executor.as_ref(),
            &self.binary,
            &Self::args(path),
            self.timeout,
        )
        .await
        .map_err(|err| TransformError::ProbeFailed {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let parsed: FfprobeOutput =
            serde_json::from_slice(&output.stdout).map_err(|err| TransformError::ProbeFailed {
                path: path.to_path_buf(),
                message: format!("invalid ffprobe payload: {err}"),
            })?;
        specs_from_probe(&parsed).map_err(|message| TransformError::ProbeFailed {
            path: path.to_path_buf(),
            message,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    r_frame_rate: Option<String>,
    #[serde(default)]
    avg_frame_rate: Option<String>,
    #[serde(default)]
    pix_fmt: Option<String>,
    #[serde(default)]
    sample_rate: Option<String>,
    #[serde(default)]
    channel_layout: Option<String>,
    #[serde(default)]
    channels: Option<u32>,
}

pub(crate) fn specs_from_probe(data: &FfprobeOutput) -> Result<VideoSpecs, String> {
    let video = data
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| "no video stream found".to_string())?;
    let width = video
        .width
        .filter(|w| *w > 0)
        .ok_or_else(|| "video stream has no width".to_string())?;
    let height = video
        .height
        .filter(|h| *h > 0)
        .ok_or_else(|| "video stream has no height".to_string())?;
    let frame_rate = video
        .r_frame_rate
        .as_deref()
        .and_then(FrameRate::parse)
        .or_else(|| video.avg_frame_rate.as_deref().and_then(FrameRate::parse))
        .ok_or_else(|| "video stream has no usable frame rate".to_string())?;

    let audio = data
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("audio"))
        .and_then(|stream| {
            let sample_rate = stream.sample_rate.as_deref()?.parse::<u32>().ok()?;
            let channel_layout = stream
                .channel_layout
                .clone()
                .filter(|layout| !layout.is_empty() && layout != "unknown")
                .unwrap_or_else(|| match stream.channels {
                    Some(1) => "mono".to_string(),
                    _ => "stereo".to_string(),
                });
            Some(AudioSpecs {
                codec: stream.codec_name.clone(),
                sample_rate,
                channel_layout,
            })
        });

    Ok(VideoSpecs {
        width,
        height,
        frame_rate,
        codec: video.codec_name.clone(),
        pixel_format: video.pix_fmt.clone(),
        audio,
    })
}
