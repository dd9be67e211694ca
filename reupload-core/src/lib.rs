pub mod acquire;
pub mod auth;
pub mod batch;
pub mod command;
pub mod config;
pub mod error;
pub mod media;
pub mod metadata;
pub mod pipeline;
pub mod publish;

pub use acquire::{validate_reference, Acquired, Downloader, RemoteInfo, RemoteMetadata, YtDlpDownloader};
pub use auth::{
    load_client_secrets, ClientSecrets, Credential, CredentialState, CredentialStore,
    InteractiveAuthorizer, OAuthClient, ReservedPort, TokenRefresher,
};
pub use batch::{
    batch_template, parse_batch_csv, parse_publish_time, BatchCoordinator, BatchError, BatchJob,
    CsvRowError, ItemRunner, JobStatus, JobStore,
};
pub use command::{CommandExecutor, CommandFailure, SystemCommandExecutor};
pub use config::{load_reupload_config, ReuploadConfig};
pub use error::{
    classify_platform_error, ConfigError, PipelineError, PipelineResult, Result, RetryableError,
    RetryableKind, TransformError,
};
pub use media::{FfmpegMux, FfprobeProbe, MediaMux, MediaProbe, MediaTransformer, VideoSpecs};
pub use metadata::{MetadataOverrides, Privacy, VideoMetadata};
pub use pipeline::{InputDescriptor, ItemSpec, Pipeline, PipelineReport, RetryPolicy};
pub use publish::{PlatformClient, PublishOutcome, Publisher, UploadProgress, YouTubeClient};
