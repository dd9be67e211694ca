use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RetrySection;
use crate::error::{PipelineError, RetryableError};
use crate::metadata::{MetadataOverrides, VideoMetadata};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum InputDescriptor {
    Local(PathBuf),
    Remote(String),
}

impl InputDescriptor {
    pub fn is_remote(&self) -> bool {
        matches!(self, InputDescriptor::Remote(_))
    }
}

impl fmt::Display for InputDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputDescriptor::Local(path) => write!(f, "{}", path.display()),
            InputDescriptor::Remote(reference) => f.write_str(reference),
        }
    }
}

/// One unit of work: where the video comes from plus the caller's metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSpec {
    pub input: InputDescriptor,
    #[serde(default)]
    pub metadata: MetadataOverrides,
}

impl ItemSpec {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            input: InputDescriptor::Local(path.into()),
            metadata: MetadataOverrides::default(),
        }
    }

    pub fn remote(reference: impl Into<String>) -> Self {
        Self {
            input: InputDescriptor::Remote(reference.into()),
            metadata: MetadataOverrides::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: MetadataOverrides) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Acquiring,
    Transforming,
    Publishing,
    Published,
    Failed,
    Cancelled,
}

/// Item-keyed artifact roots. Everything a run writes lives under one of these.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ItemArtifacts {
    pub download_root: Option<PathBuf>,
    pub work_root: Option<PathBuf>,
}

impl ItemArtifacts {
    pub fn roots(&self) -> impl Iterator<Item = &PathBuf> {
        self.download_root.iter().chain(self.work_root.iter())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineItem {
    pub key: String,
    pub input: InputDescriptor,
    pub artifacts: ItemArtifacts,
    pub status: ItemStatus,
}

impl PipelineItem {
    pub fn new(input: InputDescriptor) -> Self {
        Self {
            key: format!("item-{}", Uuid::new_v4().simple()),
            input,
            artifacts: ItemArtifacts::default(),
            status: ItemStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub item_key: String,
    pub input: InputDescriptor,
    pub video_id: String,
    pub metadata: VideoMetadata,
    pub publish_attempts: u32,
    pub thumbnail_set: bool,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_range: [u32; 2],
    pub sleep_cap: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        if self.attempts <= 1 {
            return Duration::from_secs(self.delay_range[0] as u64);
        }
        let min = self.delay_range[0] as f64;
        let max = self.delay_range[1] as f64;
        let ratio = (attempt as f64 / (self.attempts - 1) as f64).min(1.0);
        let seconds = min + (max - min) * ratio;
        Duration::from_secs(seconds.round() as u64)
    }

    /// Attempts allowed for this error: the policy bound, tightened by the error's own
    /// retry ceiling.
    pub fn attempts_for(&self, error: &RetryableError) -> u32 {
        let policy = self.attempts.max(1);
        match error.max_retries {
            Some(retries) => policy.min(retries.saturating_add(1)),
            None => policy,
        }
    }

    pub fn delay_for(&self, error: &RetryableError, attempt: u32) -> Duration {
        let base = self
            .compute_delay(attempt)
            .max(error.retry_after)
            .min(self.sleep_cap);
        if self.jitter.is_zero() {
            return base;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        base + Duration::from_millis(jitter_ms)
    }
}

impl TryFrom<RetrySection> for RetryPolicy {
    type Error = PipelineError;

    fn try_from(section: RetrySection) -> Result<Self, Self::Error> {
        if section.max_attempts == 0 {
            return Err(PipelineError::Configuration(
                "retry.max_attempts must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            attempts: section.max_attempts,
            delay_range: section.delay_range_seconds,
            sleep_cap: Duration::from_secs(section.sleep_cap_seconds),
            jitter: Duration::from_millis(section.jitter_millis),
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_range: [5, 30],
            sleep_cap: Duration::from_secs(120),
            jitter: Duration::from_millis(500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RetryableKind;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            delay_range: [5, 30],
            sleep_cap: Duration::from_secs(120),
            jitter: Duration::ZERO,
        }
    }

    #[test]
    fn delay_is_linear_between_bounds() {
        let policy = policy();
        assert_eq!(policy.compute_delay(0), Duration::from_secs(5));
        assert_eq!(policy.compute_delay(1), Duration::from_secs(18));
        assert_eq!(policy.compute_delay(2), Duration::from_secs(30));
    }

    #[test]
    fn retry_after_raises_delay_up_to_cap() {
        let policy = policy();
        let rate = RetryableError::new(RetryableKind::RateLimit, "slow");
        assert_eq!(policy.delay_for(&rate, 0), Duration::from_secs(60));
        let quota = RetryableError::new(RetryableKind::QuotaExceeded, "quota");
        assert_eq!(policy.delay_for(&quota, 0), Duration::from_secs(120));
    }

    #[test]
    fn error_ceiling_tightens_attempts() {
        let policy = policy();
        let quota = RetryableError::new(RetryableKind::QuotaExceeded, "quota");
        assert_eq!(policy.attempts_for(&quota), 1);
        let network = RetryableError::new(RetryableKind::Network, "reset");
        assert_eq!(policy.attempts_for(&network), 3);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let section = RetrySection {
            max_attempts: 0,
            ..RetrySection::default()
        };
        assert!(RetryPolicy::try_from(section).is_err());
    }

    #[test]
    fn item_keys_are_unique() {
        let a = PipelineItem::new(InputDescriptor::Local("a.mp4".into()));
        let b = PipelineItem::new(InputDescriptor::Local("a.mp4".into()));
        assert_ne!(a.key, b.key);
        assert!(a.key.starts_with("item-"));
    }
}
