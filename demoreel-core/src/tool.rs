use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("command failed ({command}): {stderr}")]
    CommandFailure {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("analysis did not finish within {0:?}")]
    Timeout(Duration),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ToolResult<T> = Result<T, ToolError>;

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Runs a command to completion, capturing its output.
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output>;
    /// Spawns a command and lets it run detached.
    async fn spawn(&self, command: &mut Command) -> std::io::Result<()>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
        command.output().await
    }

    async fn spawn(&self, command: &mut Command) -> std::io::Result<()> {
        command.spawn().map(|_| ())
    }
}

/// The seam the orchestrator drives the external demo tool through.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Runs the analysis pass over a replay and waits for it to finish.
    async fn analyze(&self, demo: &Path) -> ToolResult<()>;
    /// Launches the in-engine highlight playback for one player.
    /// Success means only that the process was spawned.
    async fn launch_highlights(&self, demo: &Path, subject_id: &str) -> ToolResult<()>;
}

/// Invokes the demo-manager CLI (`<program> <entrypoint> analyze|highlights ...`)
/// inside its project directory.
pub struct HighlightTool {
    working_dir: PathBuf,
    program: String,
    entrypoint: String,
    analysis_timeout: Duration,
    executor: Arc<dyn CommandExecutor>,
}

impl HighlightTool {
    pub fn new(
        working_dir: impl Into<PathBuf>,
        program: impl Into<String>,
        entrypoint: impl Into<String>,
        analysis_timeout: Duration,
        executor: Option<Arc<dyn CommandExecutor>>,
    ) -> Self {
        Self {
            working_dir: working_dir.into(),
            program: program.into(),
            entrypoint: entrypoint.into(),
            analysis_timeout,
            executor: executor.unwrap_or_else(|| Arc::new(SystemCommandExecutor)),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(&self.program);
        command.arg(&self.entrypoint);
        for arg in args {
            command.arg(arg);
        }
        command.current_dir(&self.working_dir);
        command
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("{} {} {}", self.program, self.entrypoint, args.join(" "))
    }
}

#[async_trait]
impl ToolRunner for HighlightTool {
    async fn analyze(&self, demo: &Path) -> ToolResult<()> {
        let demo = demo.to_string_lossy();
        let args = ["analyze", demo.as_ref()];
        info!(command = %self.describe(&args), "running demo analysis");
        let mut command = self.command(&args);
        let output = tokio::time::timeout(self.analysis_timeout, self.executor.run(&mut command))
            .await
            .map_err(|_| ToolError::Timeout(self.analysis_timeout))??;
        if !output.status.success() {
            return Err(ToolError::CommandFailure {
                command: self.describe(&args),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        debug!("analysis finished");
        Ok(())
    }

    async fn launch_highlights(&self, demo: &Path, subject_id: &str) -> ToolResult<()> {
        let demo = demo.to_string_lossy();
        let args = ["highlights", demo.as_ref(), subject_id];
        info!(command = %self.describe(&args), "launching highlight playback");
        let mut command = self.command(&args);
        self.executor.spawn(&mut command).await?;
        Ok(())
    }
}
