use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Rational frame rate as reported by the probe, e.g. `30000/1001`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    pub fn new(numerator: u32, denominator: u32) -> Option<Self> {
        if numerator == 0 || denominator == 0 {
            return None;
        }
        Some(Self {
            numerator,
            denominator,
        })
    }

    /// Parses `num/den` or a plain integer/decimal rate. Zero rates (`0/0`) are rejected.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Some((num, den)) = value.split_once('/') {
            let numerator = num.trim().parse().ok()?;
            let denominator = den.trim().parse().ok()?;
            return Self::new(numerator, denominator);
        }
        if let Ok(whole) = value.parse::<u32>() {
            return Self::new(whole, 1);
        }
        let decimal: f64 = value.parse().ok()?;
        if !decimal.is_finite() || decimal <= 0.0 {
            return None;
        }
        Self::new((decimal * 1000.0).round() as u32, 1000)
    }

    pub fn as_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denominator == 1 {
            write!(f, "{}", self.numerator)
        } else {
            write!(f, "{}/{}", self.numerator, self.denominator)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioSpecs {
    pub codec: Option<String>,
    pub sample_rate: u32,
    pub channel_layout: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoSpecs {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub codec: Option<String>,
    pub pixel_format: Option<String>,
    pub audio: Option<AudioSpecs>,
}

impl VideoSpecs {
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Resolution and frame rate are the parameters a stream-copy concat depends on.
    pub fn matches_stream_parameters(&self, other: &VideoSpecs) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.frame_rate == other.frame_rate
    }
}

/// Item-keyed artifact layout under the work directory.
#[derive(Debug, Clone)]
pub struct WorkPaths {
    pub filler: PathBuf,
    pub output: PathBuf,
}

impl WorkPaths {
    pub fn new(root: &Path, source: &Path) -> Self {
        let extension = source
            .extension()
            .map(|ext| ext.to_string_lossy().to_string())
            .unwrap_or_else(|| "mp4".to_string());
        let stem = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "video".to_string());
        let filler = root.join(format!("filler.{extension}"));
        let output = root.join(format!("processed_{stem}.{extension}"));
        Self { filler, output }
    }
}

#[derive(Debug, Clone)]
pub struct TransformOutcome {
    pub output: PathBuf,
    pub specs: VideoSpecs,
}
