use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("invalid config value {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// `error_type` of the failure the credential store returns once every interactive
/// attempt has failed.
pub const AUTH_ATTEMPTS_EXHAUSTED: &str = "interactive_attempts_exhausted";

/// Transient failure families. Each carries a suggested wait before reattempting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryableKind {
    QuotaExceeded,
    RateLimit,
    Network,
}

impl RetryableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryableKind::QuotaExceeded => "quota exceeded",
            RetryableKind::RateLimit => "rate limit",
            RetryableKind::Network => "network",
        }
    }

    pub fn default_retry_after(&self) -> Duration {
        match self {
            RetryableKind::QuotaExceeded => Duration::from_secs(3600),
            RetryableKind::RateLimit => Duration::from_secs(60),
            RetryableKind::Network => Duration::from_secs(5),
        }
    }

    /// Daily quota does not come back within a pipeline run, so quota errors carry a
    /// zero retry ceiling and surface immediately.
    pub fn default_max_retries(&self) -> Option<u32> {
        match self {
            RetryableKind::QuotaExceeded => Some(0),
            RetryableKind::RateLimit | RetryableKind::Network => None,
        }
    }
}

impl fmt::Display for RetryableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message} (retry after {}s)", .retry_after.as_secs())]
pub struct RetryableError {
    pub kind: RetryableKind,
    pub message: String,
    pub retry_after: Duration,
    pub max_retries: Option<u32>,
}

impl RetryableError {
    pub fn new(kind: RetryableKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: kind.default_retry_after(),
            max_retries: kind.default_max_retries(),
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("input video not found: {0}")]
    InputMissing(PathBuf),
    #[error("failed to probe {path}: {message}")]
    ProbeFailed { path: PathBuf, message: String },
    #[error("failed to render filler clip {path}: {message}")]
    FillerFailed { path: PathBuf, message: String },
    #[error("failed to concatenate into {output}: {message}")]
    MuxFailed { output: PathBuf, message: String },
    #[error("concatenation finished but {0} was not created")]
    OutputMissing(PathBuf),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("credentials error: {message}")]
    Credentials {
        message: String,
        path: Option<PathBuf>,
    },
    #[error("authorization flow failed: {message}")]
    AuthFlow {
        message: String,
        error_type: Option<String>,
        description: Option<String>,
    },
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },
    #[error("{resource_type} not found: {resource_id}")]
    ResourceNotFound {
        resource_type: String,
        resource_id: String,
    },
    #[error("storage {operation} failed at {path}: {source}")]
    Storage {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },
    #[error("download of {reference} failed: {message}")]
    Download { reference: String, message: String },
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error(transparent)]
    Retryable(#[from] RetryableError),
    #[error("platform error {code}: {message}")]
    Platform { code: String, message: String },
    #[error("pipeline cancelled: {0}")]
    Cancelled(String),
}

impl PipelineError {
    pub fn storage(path: impl AsRef<Path>, operation: &'static str, source: io::Error) -> Self {
        PipelineError::Storage {
            path: path.as_ref().to_path_buf(),
            operation,
            source,
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        PipelineError::ResourceNotFound {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }

    pub fn as_retryable(&self) -> Option<&RetryableError> {
        match self {
            PipelineError::Retryable(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.as_retryable().is_some()
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.as_retryable().map(|inner| inner.retry_after)
    }

    /// True for failures the credential store can recover from by refreshing or
    /// re-acquiring the token.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::Credentials { .. } | PipelineError::AuthFlow { .. }
        )
    }

    /// True when the credential store already ran out of interactive attempts, so
    /// asking it for a token again would only repeat the consent prompts.
    pub fn is_auth_exhausted(&self) -> bool {
        matches!(
            self,
            PipelineError::AuthFlow { error_type: Some(kind), .. } if kind == AUTH_ATTEMPTS_EXHAUSTED
        )
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "configuration",
            PipelineError::Credentials { .. } => "credentials",
            PipelineError::AuthFlow { .. } => "auth_flow",
            PipelineError::Validation { .. } => "validation",
            PipelineError::ResourceNotFound { .. } => "resource_not_found",
            PipelineError::Storage { .. } => "storage",
            PipelineError::Download { .. } => "download",
            PipelineError::Transform(_) => "transform",
            PipelineError::Publish(_) => "publish",
            PipelineError::Retryable(_) => "retryable",
            PipelineError::Platform { .. } => "platform",
            PipelineError::Cancelled(_) => "cancelled",
        }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(error: ConfigError) -> Self {
        PipelineError::Configuration(error.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(error: serde_json::Error) -> Self {
        PipelineError::Publish(format!("malformed platform payload: {error}"))
    }
}

/// Transport failures are retryable; builder and decode failures are not.
impl From<reqwest::Error> for PipelineError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_builder() {
            return PipelineError::Configuration(format!("invalid HTTP request: {error}"));
        }
        if error.is_decode() {
            return PipelineError::Publish(format!("malformed platform response: {error}"));
        }
        PipelineError::Retryable(RetryableError::new(
            RetryableKind::Network,
            error.to_string(),
        ))
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Clone, Copy)]
enum PlatformErrorClass {
    Quota,
    RateLimit,
    Network,
    AuthFlow,
    Credentials,
    Configuration,
    NotFound,
    Validation,
}

const PLATFORM_ERROR_CODES: &[(&str, PlatformErrorClass, &str)] = &[
    ("quotaExceeded", PlatformErrorClass::Quota, "API quota exceeded"),
    ("rateLimitExceeded", PlatformErrorClass::RateLimit, "Rate limit exceeded"),
    ("userRateLimitExceeded", PlatformErrorClass::RateLimit, "Rate limit exceeded"),
    ("backendError", PlatformErrorClass::Network, "Platform backend error"),
    ("authError", PlatformErrorClass::AuthFlow, "Authentication failed"),
    ("invalidCredentials", PlatformErrorClass::Credentials, "Invalid credentials"),
    ("accessNotConfigured", PlatformErrorClass::Configuration, "Platform API not enabled"),
    ("notFound", PlatformErrorClass::NotFound, "Resource not found"),
    ("invalidRequest", PlatformErrorClass::Validation, "Invalid request"),
];

/// Maps a platform-reported error code onto the pipeline taxonomy. Unknown codes fall
/// back to [`PipelineError::Platform`].
pub fn classify_platform_error(code: &str, message: &str) -> PipelineError {
    let Some((_, class, default_message)) = PLATFORM_ERROR_CODES
        .iter()
        .find(|(candidate, _, _)| *candidate == code)
    else {
        let message = if message.trim().is_empty() {
            "Unknown error".to_string()
        } else {
            message.to_string()
        };
        return PipelineError::Platform {
            code: code.to_string(),
            message,
        };
    };
    let message = if message.trim().is_empty() {
        default_message.to_string()
    } else {
        message.to_string()
    };
    match class {
        PlatformErrorClass::Quota => {
            RetryableError::new(RetryableKind::QuotaExceeded, message).into()
        }
        PlatformErrorClass::RateLimit => {
            RetryableError::new(RetryableKind::RateLimit, message).into()
        }
        PlatformErrorClass::Network => RetryableError::new(RetryableKind::Network, message).into(),
        PlatformErrorClass::AuthFlow => PipelineError::AuthFlow {
            message,
            error_type: Some(code.to_string()),
            description: None,
        },
        PlatformErrorClass::Credentials => PipelineError::Credentials {
            message,
            path: None,
        },
        PlatformErrorClass::Configuration => PipelineError::Configuration(message),
        PlatformErrorClass::NotFound => PipelineError::ResourceNotFound {
            resource_type: "platform resource".into(),
            resource_id: message,
        },
        PlatformErrorClass::Validation => PipelineError::Validation {
            field: "request".into(),
            message,
        },
    }
}
