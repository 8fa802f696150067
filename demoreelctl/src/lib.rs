use std::io;
use std::path::{Path, PathBuf};

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use demoreel_core::{
    extract_share_code, load_demoreel_config, DemoreelConfig, Job, JobQueue, JobResult,
    Orchestrator, PublishMode, ResultsStore, ShareCodeResolver, StatusBoard,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] demoreel_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("results error: {0}")]
    Results(#[from] demoreel_core::ResultsError),
    #[error("resolution error: {0}")]
    Fetch(#[from] demoreel_core::FetchError),
    #[error("worker setup failed: {0}")]
    Setup(#[from] demoreel_core::SetupError),
    #[error("invalid subject identifier {0:?}: expected 17 digits")]
    InvalidSubject(String),
    #[error("no share code found in {0:?}")]
    NoShareCode(String),
    #[error("job finished with status {0}")]
    JobFailed(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Demoreel capture worker control interface", long_about = None)]
pub struct Cli {
    /// Path to demoreel.toml
    #[arg(long, default_value = "configs/demoreel.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs the capture worker until interrupted
    Run(RunArgs),
    /// Processes a single job end-to-end and exits
    Capture(CaptureArgs),
    /// Resolves a share code to its download URL
    Resolve(ResolveArgs),
    /// Shows the persisted job history
    Results(ResultsArgs),
    /// Generates shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON file with jobs to enqueue at startup
    #[arg(long)]
    pub jobs_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Share code, free text containing one, or a direct .dem.bz2 URL
    pub demo: String,
    /// 17-digit platform id of the subject player
    pub subject: String,
    /// Attribution label recorded with the result
    #[arg(long, default_value = "cli")]
    pub submitted_by: String,
    /// Upload the finished clip to the hosting service
    #[arg(long, conflicts_with = "save")]
    pub upload: bool,
    /// Keep the finished clip on disk instead of uploading
    #[arg(long, conflicts_with = "upload")]
    pub save: bool,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Share code or free text containing one
    pub share_code: String,
}

#[derive(Args, Debug)]
pub struct ResultsArgs {
    /// Number of most recent entries to show
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    pub shell: clap_complete::Shell,
}

/// One entry of a `--jobs-file` seed list.
#[derive(Debug, Deserialize)]
pub struct JobSpec {
    pub demo: String,
    pub subject: String,
    #[serde(default = "default_submitter")]
    pub submitted_by: String,
    #[serde(default)]
    pub upload: Option<bool>,
}

fn default_submitter() -> String {
    "jobs-file".to_string()
}

impl JobSpec {
    pub fn into_job(self, config: &DemoreelConfig) -> Result<Job> {
        if !Job::validate_subject(&self.subject) {
            return Err(AppError::InvalidSubject(self.subject));
        }
        let mode = match self.upload {
            Some(true) => PublishMode::UploadToHost,
            Some(false) => PublishMode::SaveLocally,
            None => default_mode(config),
        };
        Ok(Job::new(self.demo, self.subject, mode, self.submitted_by))
    }
}

fn default_mode(config: &DemoreelConfig) -> PublishMode {
    if config.publish.upload_by_default {
        PublishMode::UploadToHost
    } else {
        PublishMode::SaveLocally
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    init_tracing();
    match &cli.command {
        Commands::Run(args) => run_worker(&cli, args).await,
        Commands::Capture(args) => capture_one(&cli, args).await,
        Commands::Resolve(args) => {
            let output = resolve_share_code(&cli, args).await?;
            render(&output, cli.format)
        }
        Commands::Results(args) => {
            let history = load_history(&cli, args)?;
            render(&history, cli.format)
        }
        Commands::Completions(args) => {
            let mut command = Cli::command();
            clap_complete::generate(args.shell, &mut command, "demoreelctl", &mut io::stdout());
            Ok(())
        }
    }
}

async fn run_worker(cli: &Cli, args: &RunArgs) -> Result<()> {
    let config = load_demoreel_config(&cli.config)?;
    let queue = JobQueue::new();
    let status = StatusBoard::new();
    let results = results_store(&config)?;
    let loaded = results.initialize()?;
    info!(loaded, "results history loaded");

    if let Some(jobs_file) = &args.jobs_file {
        for job in load_jobs_file(jobs_file, &config)? {
            queue.enqueue(job);
        }
    }

    let orchestrator = Orchestrator::from_config(&config, queue, status, results)?;
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                cancel.cancel();
            }
        }
    });
    orchestrator.run(cancel).await;
    Ok(())
}

async fn capture_one(cli: &Cli, args: &CaptureArgs) -> Result<()> {
    if !Job::validate_subject(&args.subject) {
        return Err(AppError::InvalidSubject(args.subject.clone()));
    }
    let config = load_demoreel_config(&cli.config)?;
    let mode = if args.save {
        PublishMode::SaveLocally
    } else if args.upload {
        PublishMode::UploadToHost
    } else {
        default_mode(&config)
    };
    let job = Job::new(&args.demo, &args.subject, mode, &args.submitted_by);

    let results = results_store(&config)?;
    results.initialize()?;
    let orchestrator = Orchestrator::from_config(
        &config,
        JobQueue::new(),
        StatusBoard::new(),
        results,
    )?;
    orchestrator
        .process_job(&job, &CancellationToken::new())
        .await;

    let history = orchestrator.results().recent();
    let result = history.last().ok_or_else(|| {
        AppError::JobFailed("no result was recorded".to_string())
    })?;
    render(result, cli.format)?;
    if !result.task_status.is_success() {
        return Err(AppError::JobFailed(result.task_status.to_string()));
    }
    Ok(())
}

async fn resolve_share_code(cli: &Cli, args: &ResolveArgs) -> Result<ResolveOutput> {
    let config = load_demoreel_config(&cli.config)?;
    let share_code = extract_share_code(&args.share_code)
        .ok_or_else(|| AppError::NoShareCode(args.share_code.clone()))?;
    let resolver = ShareCodeResolver::new(
        config.resolver.endpoints.clone(),
        config.resolver.request_timeout(),
    )?;
    let download_url = resolver.resolve(&share_code).await?;
    Ok(ResolveOutput {
        share_code,
        download_url,
    })
}

fn load_history(cli: &Cli, args: &ResultsArgs) -> Result<Vec<JobResult>> {
    let config = load_demoreel_config(&cli.config)?;
    let results = results_store(&config)?;
    results.initialize()?;
    let mut history = results.recent();
    if history.len() > args.limit {
        history.drain(..history.len() - args.limit);
    }
    Ok(history)
}

fn results_store(config: &DemoreelConfig) -> Result<ResultsStore> {
    Ok(ResultsStore::builder()
        .path(config.resolve_path(&config.paths.results_file))
        .capacity(config.results.capacity)
        .build()?)
}

pub fn load_jobs_file(path: &Path, config: &DemoreelConfig) -> Result<Vec<Job>> {
    let raw = std::fs::read_to_string(path)?;
    let specs: Vec<JobSpec> = serde_json::from_str(&raw)?;
    specs.into_iter().map(|spec| spec.into_job(config)).collect()
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[derive(Debug, Serialize)]
pub struct ResolveOutput {
    pub share_code: String,
    pub download_url: String,
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

impl DisplayFallback for ResolveOutput {
    fn display(&self) -> String {
        format!("{} -> {}", self.share_code, self.download_url)
    }
}

impl DisplayFallback for JobResult {
    fn display(&self) -> String {
        let outcome = self
            .outcome_url_or_path
            .as_deref()
            .or(self.failure_cause.as_deref())
            .unwrap_or("-");
        format!(
            "{} {} {} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.subject_identifier,
            self.task_status,
            outcome
        )
    }
}

impl DisplayFallback for Vec<JobResult> {
    fn display(&self) -> String {
        if self.is_empty() {
            return "no results recorded yet".to_string();
        }
        self.iter()
            .map(|result| result.display())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
