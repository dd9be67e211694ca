mod mux;
mod probe;
mod types;

pub use mux::{FfmpegMux, MediaMux, CONCAT_LIST_NAME};
pub use probe::{FfprobeProbe, MediaProbe};
pub use types::{AudioSpecs, FrameRate, TransformOutcome, VideoSpecs, WorkPaths};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult, TransformError};

/// Appends a black filler segment to a source video without re-encoding the source.
pub struct MediaTransformer {
    probe: Arc<dyn MediaProbe>,
    mux: Arc<dyn MediaMux>,
    filler_duration: Duration,
}

impl MediaTransformer {
    pub fn new(probe: Arc<dyn MediaProbe>, mux: Arc<dyn MediaMux>) -> Self {
        Self {
            probe,
            mux,
            filler_duration: Duration::from_secs(2),
        }
    }

    pub fn with_filler_duration(mut self, duration: Duration) -> Self {
        self.filler_duration = duration;
        self
    }

    pub fn filler_duration(&self) -> Duration {
        self.filler_duration
    }

    /// Writes every artifact under `work_root`; the caller owns removing it.
    pub async fn transform(&self, work_root: &Path, source: &Path) -> PipelineResult<TransformOutcome> {
        if !fs::try_exists(source).await.unwrap_or(false) {
            return Err(TransformError::InputMissing(source.to_path_buf()).into());
        }
        fs::create_dir_all(work_root)
            .await
            .map_err(|err| PipelineError::storage(work_root, "create_dir", err))?;
        let paths = WorkPaths::new(work_root, source);

        let specs = self.probe.inspect(source).await?;
        debug!(
            source = %source.display(),
            resolution = %specs.resolution(),
            frame_rate = %specs.frame_rate,
            "probed source"
        );

        let filler = self
            .mux
            .render_filler(&specs, self.filler_duration, &paths.filler)
            .await?;
        if !fs::try_exists(&filler).await.unwrap_or(false) {
            return Err(TransformError::FillerFailed {
                path: filler,
                message: "filler clip was not written".into(),
            }
            .into());
        }

        let inputs = vec![source.to_path_buf(), filler.clone()];
        let output = self.mux.concat(&inputs, &paths.output).await?;
        if !fs::try_exists(&output).await.unwrap_or(false) {
            return Err(TransformError::OutputMissing(output).into());
        }

        let produced = self.probe.inspect(&output).await?;
        if !produced.matches_stream_parameters(&specs) {
            return Err(TransformError::MuxFailed {
                output,
                message: format!(
                    "output is {} @ {} but source is {} @ {}",
                    produced.resolution(),
                    produced.frame_rate,
                    specs.resolution(),
                    specs.frame_rate
                ),
            }
            .into());
        }

        info!(
            source = %source.display(),
            output = %output.display(),
            "transform complete"
        );
        Ok(TransformOutcome { output, specs })
    }
}
