use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::metadata::{Privacy, VideoMetadata};

/// Insert body for the resumable upload session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadRequest {
    pub snippet: Snippet,
    pub status: UploadStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatus {
    pub privacy_status: Privacy,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_publish_at"
    )]
    pub publish_at: Option<DateTime<Utc>>,
    pub self_declared_made_for_kids: bool,
}

fn serialize_publish_at<S: Serializer>(
    value: &Option<DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(at) => serializer.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        None => serializer.serialize_none(),
    }
}

impl UploadRequest {
    /// Uploads always start private; a publish time turns that into a scheduled release.
    pub fn from_metadata(metadata: &VideoMetadata) -> Self {
        Self {
            snippet: Snippet {
                title: metadata.title.clone(),
                description: metadata.description.clone(),
                tags: metadata.tags.clone(),
                category_id: metadata.category_id.clone(),
            },
            status: UploadStatus {
                privacy_status: Privacy::Private,
                publish_at: metadata.publish_at,
                self_declared_made_for_kids: metadata.made_for_kids,
            },
        }
    }

    pub fn parts(&self) -> &'static str {
        "snippet,status"
    }
}

/// An open resumable session on the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub uri: String,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Continue { next_offset: u64 },
    Complete { video_id: String },
}

/// Upload state that survives a failed attempt so the next one resumes.
#[derive(Debug, Clone, Default)]
pub struct UploadProgress {
    pub session: Option<UploadSession>,
    pub offset: u64,
    pub chunks_sent: u32,
}

impl UploadProgress {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub video_id: String,
    pub bytes_uploaded: u64,
    pub chunks: u32,
    pub thumbnail_set: bool,
}

#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    pub id: String,
    #[serde(default)]
    pub status: Option<UploadResponseStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponseStatus {
    #[serde(default)]
    pub upload_status: Option<String>,
    #[serde(default)]
    pub privacy_status: Option<String>,
}

/// `{"error": {"code": 403, "message": "...", "errors": [{"reason": "quotaExceeded"}]}}`
#[derive(Debug, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl ErrorBody {
    pub fn reason(&self) -> Option<&str> {
        self.errors
            .iter()
            .map(|detail| detail.reason.as_str())
            .find(|reason| !reason.is_empty())
    }
}
