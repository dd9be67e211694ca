use std::path::Path;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Seam over external binaries (ffmpeg, ffprobe, yt-dlp) so tests can record calls.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Output> {
        Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
    }
}

#[derive(Debug, Error)]
pub enum CommandFailure {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} timed out after {limit:?}")]
    Timeout { program: String, limit: Duration },
    #[error("{program} exited with status {status:?}: {stderr}")]
    Exit {
        program: String,
        status: Option<i32>,
        stderr: String,
    },
}

/// Runs `program` to completion, turning spawn errors, timeouts and non-zero exits into
/// a [`CommandFailure`].
pub async fn run_checked(
    executor: &dyn CommandExecutor,
    program: &Path,
    args: &[String],
    limit: Duration,
) -> Result<Output, CommandFailure> {
    let name = program.display().to_string();
    debug!(program = %name, args = ?args, "running external command");
    let output = match timeout(limit, executor.run(program, args)).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(CommandFailure::Spawn {
                program: name,
                source,
            })
        }
        Err(_) => {
            return Err(CommandFailure::Timeout {
                program: name,
                limit,
            })
        }
    };
    if !output.status.success() {
        return Err(CommandFailure::Exit {
            program: name,
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}
