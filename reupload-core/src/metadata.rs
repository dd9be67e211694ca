use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::acquire::RemoteMetadata;
use crate::error::{PipelineError, PipelineResult};

/// People & Blogs.
pub const DEFAULT_CATEGORY_ID: &str = "22";
pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_DESCRIPTION_BYTES: usize = 5000;
pub const MAX_TAGS_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    #[default]
    Private,
    Unlisted,
    Public,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privacy::Private => "private",
            Privacy::Unlisted => "unlisted",
            Privacy::Public => "public",
        }
    }
}

/// Caller-supplied metadata. Blank strings and empty tag lists count as "not supplied".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataOverrides {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub publish_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub thumbnail: Option<PathBuf>,
}

/// Metadata handed to Publish. Built once per item and not mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
    pub privacy: Privacy,
    pub made_for_kids: bool,
    pub publish_at: Option<DateTime<Utc>>,
    pub original_reference: Option<String>,
    pub thumbnail: Option<PathBuf>,
}

impl VideoMetadata {
    /// Merges caller overrides with the acquired defaults. Local sources without a title
    /// fall back to the file stem.
    pub fn resolve(
        overrides: &MetadataOverrides,
        remote: Option<&RemoteMetadata>,
        source: &Path,
        now: DateTime<Utc>,
    ) -> PipelineResult<Self> {
        let title = supplied(overrides.title.as_deref())
            .or_else(|| remote.and_then(|r| supplied(Some(&r.title))))
            .or_else(|| {
                source
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().to_string())
            })
            .unwrap_or_default();
        let description = supplied(overrides.description.as_deref())
            .or_else(|| remote.and_then(|r| supplied(Some(&r.description))))
            .unwrap_or_default();
        let mut tags = clean_tags(&overrides.tags);
        if tags.is_empty() {
            if let Some(remote) = remote {
                tags = clean_tags(&remote.tags);
            }
        }
        let thumbnail = overrides
            .thumbnail
            .clone()
            .or_else(|| remote.and_then(|r| r.thumbnail.clone()));

        let metadata = Self {
            title,
            description,
            tags,
            category_id: DEFAULT_CATEGORY_ID.to_string(),
            privacy: Privacy::Private,
            made_for_kids: false,
            publish_at: overrides.publish_time,
            original_reference: remote.map(|r| r.original_reference.clone()),
            thumbnail,
        };
        metadata.validate(now)?;
        Ok(metadata)
    }

    pub fn validate(&self, now: DateTime<Utc>) -> PipelineResult<()> {
        if self.title.trim().is_empty() {
            return Err(PipelineError::validation("title", "must not be empty"));
        }
        if self.title.chars().count() > MAX_TITLE_CHARS {
            return Err(PipelineError::validation(
                "title",
                format!("longer than {MAX_TITLE_CHARS} characters"),
            ));
        }
        if self.description.len() > MAX_DESCRIPTION_BYTES {
            return Err(PipelineError::validation(
                "description",
                format!("longer than {MAX_DESCRIPTION_BYTES} bytes"),
            ));
        }
        for (field, value) in [("title", &self.title), ("description", &self.description)] {
            if value.contains('<') || value.contains('>') {
                return Err(PipelineError::validation(field, "angle brackets are not allowed"));
            }
        }
        let tag_chars: usize = self.tags.iter().map(|tag| tag.chars().count()).sum();
        if tag_chars > MAX_TAGS_CHARS {
            return Err(PipelineError::validation(
                "tags",
                format!("combined length exceeds {MAX_TAGS_CHARS} characters"),
            ));
        }
        if let Some(publish_at) = self.publish_at {
            if publish_at <= now {
                return Err(PipelineError::validation(
                    "publish_time",
                    format!("{} is not in the future", publish_at.to_rfc3339()),
                ));
            }
        }
        Ok(())
    }

    pub fn is_scheduled(&self) -> bool {
        self.publish_at.is_some()
    }
}

fn supplied(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn clean_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn remote() -> RemoteMetadata {
        RemoteMetadata {
            title: "Remote title".into(),
            description: "Remote description".into(),
            tags: vec!["remote".into(), " ".into()],
            original_reference: "https://youtu.be/abc".into(),
            ..RemoteMetadata::default()
        }
    }

    #[test]
    fn remote_defaults_fill_unsupplied_fields() {
        let overrides = MetadataOverrides {
            title: Some("   ".into()),
            description: Some("Mine".into()),
            ..MetadataOverrides::default()
        };
        let metadata =
            VideoMetadata::resolve(&overrides, Some(&remote()), Path::new("/dl/abc.mp4"), Utc::now())
                .unwrap();
        assert_eq!(metadata.title, "Remote title");
        assert_eq!(metadata.description, "Mine");
        assert_eq!(metadata.tags, vec!["remote"]);
        assert_eq!(metadata.privacy, Privacy::Private);
        assert_eq!(metadata.category_id, "22");
        assert_eq!(metadata.original_reference.as_deref(), Some("https://youtu.be/abc"));
    }

    #[test]
    fn local_title_defaults_to_file_stem() {
        let metadata = VideoMetadata::resolve(
            &MetadataOverrides::default(),
            None,
            Path::new("/videos/holiday_2024.mp4"),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(metadata.title, "holiday_2024");
        assert!(metadata.tags.is_empty());
        assert!(!metadata.is_scheduled());
    }

    #[test]
    fn past_publish_time_is_rejected() {
        let now = Utc::now();
        let overrides = MetadataOverrides {
            publish_time: Some(now - Duration::hours(1)),
            ..MetadataOverrides::default()
        };
        let err = VideoMetadata::resolve(&overrides, None, Path::new("a.mp4"), now).unwrap_err();
        assert!(matches!(err, PipelineError::Validation { ref field, .. } if field == "publish_time"));
    }

    #[test]
    fn overlong_title_is_rejected() {
        let overrides = MetadataOverrides {
            title: Some("x".repeat(101)),
            ..MetadataOverrides::default()
        };
        assert!(VideoMetadata::resolve(&overrides, None, Path::new("a.mp4"), Utc::now()).is_err());
    }
}
