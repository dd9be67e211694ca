use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use reupload_core::auth::{load_client_secrets, CredentialStore, OAuthClient};
use reupload_core::batch::{
    batch_template, parse_batch_csv, parse_publish_time, BatchCoordinator, BatchJob, CsvRowError,
    JobStore,
};
use reupload_core::media::{FfmpegMux, FfprobeProbe, MediaTransformer};
use reupload_core::pipeline::{ItemSpec, Pipeline, PipelineReport, RetryPolicy};
use reupload_core::publish::{Publisher, YouTubeClient};
use reupload_core::{load_reupload_config, MetadataOverrides, ReuploadConfig, YtDlpDownloader};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] reupload_core::ConfigError),
    #[error("{0}")]
    Pipeline(#[from] reupload_core::PipelineError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid batch file:\n{}", render_row_errors(.0))]
    Manifest(Vec<CsvRowError>),
    #[error("invalid --publish-time {0:?}: expected an ISO-8601 timestamp")]
    PublishTime(String),
}

fn render_row_errors(errors: &[CsvRowError]) -> String {
    errors
        .iter()
        .map(|err| format!("  {err}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Re-upload videos with an appended filler clip", long_about = None)]
pub struct Cli {
    /// Path to reupload.toml
    #[arg(long, default_value = "configs/reupload.toml")]
    pub config: PathBuf,
    /// Overrides paths.work_dir
    #[arg(long)]
    pub work_dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transform and publish a video from the local filesystem
    ProcessLocal(ProcessLocalArgs),
    /// Download, transform and publish a video by URL
    ProcessRemote(ProcessRemoteArgs),
    /// Run every row of a batch CSV
    Batch(BatchArgs),
    /// Print the batch CSV template
    Template(TemplateArgs),
    /// Validate the stored credential, authorizing interactively if needed
    Auth,
}

#[derive(Args, Debug)]
pub struct ProcessLocalArgs {
    pub file: PathBuf,
    #[command(flatten)]
    pub metadata: MetadataArgs,
}

#[derive(Args, Debug)]
pub struct ProcessRemoteArgs {
    pub reference: String,
    #[command(flatten)]
    pub metadata: MetadataArgs,
}

#[derive(Args, Debug, Default)]
pub struct MetadataArgs {
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    /// Comma-separated tags
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,
    /// Scheduled release time (ISO-8601, naive values are UTC)
    #[arg(long)]
    pub publish_time: Option<String>,
    /// Image to use as the custom thumbnail
    #[arg(long)]
    pub thumbnail: Option<PathBuf>,
}

impl MetadataArgs {
    fn overrides(&self) -> Result<MetadataOverrides> {
        let publish_time = self
            .publish_time
            .as_deref()
            .map(|raw| parse_publish_time(raw).ok_or_else(|| AppError::PublishTime(raw.to_string())))
            .transpose()?;
        Ok(MetadataOverrides {
            title: self.title.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            publish_time,
            thumbnail: self.thumbnail.clone(),
        })
    }
}

#[derive(Args, Debug)]
pub struct BatchArgs {
    pub csv: PathBuf,
    /// Overrides batch.concurrency
    #[arg(long)]
    pub concurrency: Option<usize>,
}

#[derive(Args, Debug)]
pub struct TemplateArgs {
    /// Write the template to a file instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
}

pub async fn run(cli: Cli) -> Result<()> {
    if let Commands::Template(args) = &cli.command {
        return write_template(args, cli.format);
    }

    let context = AppContext::new(&cli)?;
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    match &cli.command {
        Commands::ProcessLocal(args) => {
            let spec = ItemSpec::local(&args.file).with_metadata(args.metadata.overrides()?);
            let report = context.pipeline.run_with_cancel(&spec, cancel).await?;
            render(&report, cli.format)?;
        }
        Commands::ProcessRemote(args) => {
            let spec =
                ItemSpec::remote(args.reference.clone()).with_metadata(args.metadata.overrides()?);
            let report = context.pipeline.run_with_cancel(&spec, cancel).await?;
            render(&report, cli.format)?;
        }
        Commands::Batch(args) => {
            let job = context.run_batch(args, cancel).await?;
            render(&job, cli.format)?;
        }
        Commands::Auth => {
            let status = context.auth_status().await?;
            render(&status, cli.format)?;
        }
        Commands::Template(_) => {}
    }

    Ok(())
}

fn write_template(args: &TemplateArgs, format: OutputFormat) -> Result<()> {
    match &args.output {
        Some(path) => {
            fs::write(path, batch_template())?;
            let written = TemplateWritten {
                path: path.clone(),
            };
            render(&written, format)
        }
        None => {
            print!("{}", batch_template());
            Ok(())
        }
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

struct AppContext {
    config: ReuploadConfig,
    credentials: Arc<CredentialStore>,
    pipeline: Arc<Pipeline>,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config = load_reupload_config(&cli.config)?;
        let work_dir = cli.work_dir.clone().unwrap_or_else(|| config.work_dir());

        // Resumable upload sessions answer 308 with a Range header, which must not be followed.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(config.upload.request_timeout_seconds))
            .build()?;

        let secrets = load_client_secrets(&config.credentials_path())?;
        let oauth = Arc::new(
            OAuthClient::new(http.clone(), secrets, config.auth.scopes.clone())
                .with_callback_timeout(Duration::from_secs(config.auth.callback_timeout_seconds)),
        );
        let credentials = Arc::new(
            CredentialStore::new(config.token_path(), oauth.clone(), oauth)
                .with_callback_host(config.auth.callback_host.clone())
                .with_max_interactive_attempts(config.auth.max_interactive_attempts),
        );

        let publisher = Publisher::new(Arc::new(YouTubeClient::new(http)), credentials.clone())
            .with_chunk_size(config.upload.chunk_size_bytes)
            .with_max_concurrent(config.upload.max_concurrent_publishes);

        let tools = &config.tools;
        let probe = FfprobeProbe::new(
            &tools.ffprobe,
            Duration::from_secs(config.transform.probe_timeout_seconds),
        );
        let mux = FfmpegMux::new(
            &tools.ffmpeg,
            Duration::from_secs(config.transform.mux_timeout_seconds),
        );
        let transformer = MediaTransformer::new(Arc::new(probe), Arc::new(mux))
            .with_filler_duration(Duration::from_secs_f64(
                config.transform.filler_duration_seconds,
            ));
        let downloader = YtDlpDownloader::new(
            &tools.yt_dlp,
            Duration::from_secs(tools.download_timeout_seconds),
        );

        let pipeline = Pipeline::new(
            Arc::new(downloader),
            Arc::new(transformer),
            Arc::new(publisher),
            work_dir,
            config.download_dir(),
        )
        .with_retry_policy(RetryPolicy::try_from(config.retry.clone())?)
        .with_timeout(config.upload.pipeline_timeout_seconds.map(Duration::from_secs))
        .with_failure_log(config.logs_dir());

        Ok(Self {
            config,
            credentials,
            pipeline: Arc::new(pipeline),
        })
    }

    async fn run_batch(&self, args: &BatchArgs, cancel: CancellationToken) -> Result<BatchJob> {
        let file = fs::File::open(&args.csv)?;
        let items = parse_batch_csv(file).map_err(AppError::Manifest)?;
        let concurrency = args.concurrency.unwrap_or(self.config.batch.concurrency);
        info!(csv = %args.csv.display(), items = items.len(), concurrency, "running batch");

        let coordinator = BatchCoordinator::new(self.pipeline.clone(), JobStore::new())
            .with_concurrency(concurrency)
            .with_cancellation(cancel);
        let job = coordinator.run(items).await.map_err(reupload_core::PipelineError::from)?;
        Ok(job)
    }

    async fn auth_status(&self) -> Result<AuthStatus> {
        let credential = self.credentials.ensure_valid().await?;
        Ok(AuthStatus {
            state: self.credentials.state().await.to_string(),
            token_path: self.credentials.token_path().to_path_buf(),
            expires_at: credential.expiry,
            refreshable: credential.can_refresh(),
            scopes: credential.scopes.clone(),
        })
    }
}

#[derive(Debug, Serialize)]
struct AuthStatus {
    state: String,
    token_path: PathBuf,
    expires_at: Option<DateTime<Utc>>,
    refreshable: bool,
    scopes: Vec<String>,
}

#[derive(Debug, Serialize)]
struct TemplateWritten {
    path: PathBuf,
}

impl DisplayFallback for PipelineReport {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("Published {} as {}", self.input, self.video_id),
            format!("  title: {}", self.metadata.title),
        ];
        match self.metadata.publish_at {
            Some(at) => lines.push(format!("  scheduled: {}", at.to_rfc3339())),
            None => lines.push(format!("  privacy: {}", self.metadata.privacy.as_str())),
        }
        if self.publish_attempts > 1 {
            lines.push(format!("  attempts: {}", self.publish_attempts));
        }
        if self.metadata.thumbnail.is_some() {
            let state = if self.thumbnail_set { "set" } else { "skipped" };
            lines.push(format!("  thumbnail: {state}"));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for BatchJob {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Batch {} {}: {}/{} published, {} failed",
            self.job_id,
            if self.is_terminal() { "completed" } else { "processing" },
            self.processed_videos,
            self.total_videos,
            self.failed_videos
        )];
        for video_id in &self.video_ids {
            lines.push(format!("  + {video_id}"));
        }
        for error in &self.errors {
            lines.push(format!("  ! {error}"));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for AuthStatus {
    fn display(&self) -> String {
        let expiry = self
            .expires_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "Credential {} ({})\n  expires: {}\n  refreshable: {}",
            self.state,
            self.token_path.display(),
            expiry,
            self.refreshable
        )
    }
}

impl DisplayFallback for TemplateWritten {
    fn display(&self) -> String {
        format!("Template written to {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reupload_core::batch::JobStatus;

    #[test]
    fn parses_process_local_with_tags() {
        let cli = Cli::try_parse_from([
            "reuploadctl",
            "--format",
            "json",
            "process-local",
            "clip.mp4",
            "--title",
            "Clip",
            "--tags",
            "a,b,c",
            "--publish-time",
            "2030-01-01T10:00:00",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        let Commands::ProcessLocal(args) = cli.command else {
            panic!("expected process-local");
        };
        assert_eq!(args.file, PathBuf::from("clip.mp4"));
        let overrides = args.metadata.overrides().unwrap();
        assert_eq!(overrides.tags, vec!["a", "b", "c"]);
        assert!(overrides.publish_time.is_some());
    }

    #[test]
    fn bad_publish_time_is_rejected() {
        let args = MetadataArgs {
            publish_time: Some("next tuesday".into()),
            ..MetadataArgs::default()
        };
        assert!(matches!(args.overrides(), Err(AppError::PublishTime(_))));
    }

    #[test]
    fn config_defaults_to_repo_path() {
        let cli = Cli::try_parse_from(["reuploadctl", "auth"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("configs/reupload.toml"));
        assert!(cli.work_dir.is_none());
    }

    #[test]
    fn template_writes_file_without_config() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("batch.csv");
        write_template(
            &TemplateArgs {
                output: Some(output.clone()),
            },
            OutputFormat::Text,
        )
        .unwrap();
        let written = fs::read_to_string(output).unwrap();
        assert!(written.starts_with("input_path,title,description,tags,publish_time,is_youtube_url"));
    }

    #[test]
    fn manifest_errors_list_every_line() {
        let csv = "input_path,title\n,missing\n";
        let errors = parse_batch_csv(csv.as_bytes()).unwrap_err();
        let message = AppError::Manifest(errors).to_string();
        assert!(message.contains("line 2: input_path"), "{message}");
    }

    #[test]
    fn batch_display_lists_errors() {
        let job = BatchJob {
            job_id: "batch_1".into(),
            status: JobStatus::Completed,
            total_videos: 2,
            processed_videos: 1,
            failed_videos: 1,
            errors: vec!["Error processing b.mp4 (item 2): boom".into()],
            video_ids: vec!["vid1".into()],
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
        };
        let text = job.display();
        assert!(text.contains("1/2 published, 1 failed"));
        assert!(text.contains("(item 2): boom"));
    }
}
