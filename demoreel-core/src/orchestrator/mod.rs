mod outcome;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::artifact;
use crate::config::DemoreelConfig;
use crate::fetch::{is_demo_url, DemoFetcher, DemoSource, FetchError, ShareCodeResolver};
use crate::game::{GameMonitor, SystemGameMonitor, WaitOutcome};
use crate::job::{Job, JobPhase, JobResult};
use crate::publish::{PublishError, Publisher, YouTubePublisher};
use crate::queue::JobQueue;
use crate::recorder::{ObsConnector, RecorderConnector, RecorderSession};
use crate::results::ResultsStore;
use crate::status::StatusBoard;
use crate::subject::{NameResolver, NoNameResolver, SteamProfileResolver};
use crate::tool::{HighlightTool, ToolRunner};

pub use outcome::{Disposition, JobOutcome, StageFailure};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("fetcher setup failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("publisher setup failed: {0}")]
    Publish(#[from] PublishError),
}

/// The collaborator seams the orchestrator drives. Everything behind them
/// is an external system: a third-party CLI, the game client, the capture
/// application, the hosting service.
pub struct Adapters {
    pub demos: Arc<dyn DemoSource>,
    pub tool: Arc<dyn ToolRunner>,
    pub game: Arc<dyn GameMonitor>,
    pub recorder: Arc<dyn RecorderConnector>,
    pub publisher: Arc<dyn Publisher>,
    pub names: Arc<dyn NameResolver>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub recording_dir: PathBuf,
    pub recording_extension: String,
    pub ready_timeout: Duration,
    /// Game-engine load time between the process appearing and playback
    /// actually rendering; deliberately fixed, not probed.
    pub launch_settle: Duration,
    pub finish_timeout: Duration,
    /// Grace period for the recorder to finish writing the file after
    /// stop-record.
    pub stop_flush: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &DemoreelConfig) -> Self {
        Self {
            recording_dir: PathBuf::from(&config.capture.recording_dir),
            recording_extension: config.capture.extension.clone(),
            ready_timeout: config.playback.ready_timeout(),
            launch_settle: config.playback.launch_settle(),
            finish_timeout: config.playback.finish_timeout(),
            stop_flush: config.capture.stop_flush(),
        }
    }
}

/// The single consumer of the job queue.
///
/// Processes one job end-to-end at a time: the recorder session and the
/// recording directory are shared resources, so there is deliberately no
/// parallelism among jobs. Every dequeued job produces exactly one durable
/// result, and the status board only returns to Idle after that result is
/// written.
pub struct Orchestrator {
    queue: JobQueue,
    status: StatusBoard,
    results: ResultsStore,
    adapters: Adapters,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        queue: JobQueue,
        status: StatusBoard,
        results: ResultsStore,
        adapters: Adapters,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            queue,
            status,
            results,
            adapters,
            settings,
        }
    }

    /// Wires up the real collaborators from configuration.
    pub fn from_config(
        config: &DemoreelConfig,
        queue: JobQueue,
        status: StatusBoard,
        results: ResultsStore,
    ) -> Result<Self, SetupError> {
        let resolver = ShareCodeResolver::new(
            config.resolver.endpoints.clone(),
            config.resolver.request_timeout(),
        )?;
        let demos = DemoFetcher::new(
            resolver,
            &config.paths.demo_dir,
            config.resolver.request_timeout(),
        )?;
        let tool = HighlightTool::new(
            &config.tool.dir,
            &config.tool.program,
            &config.tool.entrypoint,
            config.tool.analysis_timeout(),
            None,
        );
        let game = SystemGameMonitor::new(
            &config.playback.process_name,
            config.playback.poll_interval(),
        );
        let recorder = ObsConnector::new(
            &config.recorder.host,
            config.recorder.port,
            config.recorder.password.clone(),
            config.recorder.connect_timeout(),
        );
        let publisher = YouTubePublisher::new(
            &config.publish.token_file,
            &config.publish.privacy,
            &config.publish.category_id,
            config.publish.request_timeout(),
        )?;
        let names: Arc<dyn NameResolver> =
            match SteamProfileResolver::new(config.resolver.request_timeout()) {
                Some(resolver) => Arc::new(resolver),
                None => Arc::new(NoNameResolver),
            };
        let adapters = Adapters {
            demos: Arc::new(demos),
            tool: Arc::new(tool),
            game: Arc::new(game),
            recorder: Arc::new(recorder),
            publisher: Arc::new(publisher),
            names,
        };
        let settings = OrchestratorSettings::from_config(config);
        Ok(Self::new(queue, status, results, adapters, settings))
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    pub fn results(&self) -> &ResultsStore {
        &self.results
    }

    /// Consumes jobs until the token is cancelled. Never returns early on
    /// job failure: each job's error stops at its own result record.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("orchestration worker started");
        loop {
            let job = tokio::select! {
                _ = cancel.cancelled() => break,
                job = self.queue.dequeue() => job,
            };
            self.process_job(&job, &cancel).await;
        }
        info!("orchestration worker stopped");
    }

    /// Runs one job through the whole state machine: capture, unconditional
    /// cleanup, artifact disposal, and the terminal result append.
    pub async fn process_job(&self, job: &Job, cancel: &CancellationToken) {
        info!(
            job_id = %job.job_id,
            subject = %job.subject_identifier,
            target = %job.target_reference,
            mode = %job.publish_mode,
            "job accepted"
        );
        let mut session: Option<Box<dyn RecorderSession>> = None;

        let captured = self.capture_stage(job, &mut session, cancel).await;

        // Cleanup phase. Runs whatever happened above: stop the recorder if
        // it is ours, drop the control channel, and always knock down the
        // game process as a backstop against hangs.
        self.finalize_recorder(job, &mut session).await;
        self.adapters.game.force_terminate().await;

        let outcome = match captured {
            Ok(()) => self.dispose_artifact(job).await,
            Err(failure) => Err(failure),
        };

        let result = self.terminal_result(job, outcome);
        if let Err(append_error) = self.results.append(result) {
            error!(job_id = %job.job_id, error = %append_error, "failed to persist job result");
        }
        self.status.idle();
    }

    /// Stages up to and including the wait for playback to finish. Any
    /// error here aborts this job only.
    async fn capture_stage(
        &self,
        job: &Job,
        session_slot: &mut Option<Box<dyn RecorderSession>>,
        cancel: &CancellationToken,
    ) -> Result<(), StageFailure> {
        let subject = job.subject_identifier.as_str();
        if cancel.is_cancelled() {
            return Err(StageFailure::Cancelled);
        }

        let detail = if is_demo_url(&job.target_reference) {
            "Direct demo URL detected, downloading..."
        } else {
            "Resolving share code and downloading..."
        };
        self.status.update(JobPhase::Downloading, detail, subject);
        let demo_path = self.adapters.demos.fetch(&job.target_reference).await?;

        if cancel.is_cancelled() {
            return Err(StageFailure::Cancelled);
        }
        self.status
            .update(JobPhase::Analyzing, "Analyzing demo...", subject);
        self.adapters
            .tool
            .analyze(&demo_path)
            .await
            .map_err(|err| StageFailure::Analysis(err.to_string()))?;

        if cancel.is_cancelled() {
            return Err(StageFailure::Cancelled);
        }
        self.status.update(
            JobPhase::ConnectingRecorder,
            "Connecting to recorder...",
            subject,
        );
        let session = self
            .adapters
            .recorder
            .connect()
            .await
            .map_err(|err| StageFailure::Recorder(err.to_string()))?;
        *session_slot = Some(session);

        self.status.update(
            JobPhase::Recording,
            "Launching highlight playback...",
            subject,
        );
        self.adapters
            .tool
            .launch_highlights(&demo_path, subject)
            .await
            .map_err(|err| StageFailure::Launch(err.to_string()))?;

        self.status.update(
            JobPhase::Recording,
            "Waiting for the game to appear...",
            subject,
        );
        match self
            .adapters
            .game
            .wait_for_launch(self.settings.ready_timeout, cancel)
            .await
        {
            WaitOutcome::Satisfied => {}
            WaitOutcome::TimedOut => {
                return Err(StageFailure::ReadyTimeout(self.settings.ready_timeout))
            }
            WaitOutcome::Cancelled => return Err(StageFailure::Cancelled),
        }

        info!(delay = ?self.settings.launch_settle, "game appeared, letting the engine settle");
        tokio::select! {
            _ = cancel.cancelled() => return Err(StageFailure::Cancelled),
            _ = sleep(self.settings.launch_settle) => {}
        }

        self.status
            .update(JobPhase::Recording, "Starting recorder...", subject);
        let session = session_slot
            .as_mut()
            .ok_or_else(|| StageFailure::Recorder("recorder session vanished".into()))?;
        let started_new = session
            .start_record()
            .await
            .map_err(|err| StageFailure::Recorder(err.to_string()))?;
        if !started_new {
            info!("adopted an in-progress recording");
        }

        self.status.update(
            JobPhase::Recording,
            "Waiting for highlights to finish...",
            subject,
        );
        match self
            .adapters
            .game
            .wait_for_exit(self.settings.finish_timeout, cancel)
            .await
        {
            WaitOutcome::Satisfied => Ok(()),
            WaitOutcome::TimedOut => {
                Err(StageFailure::PlaybackTimeout(self.settings.finish_timeout))
            }
            WaitOutcome::Cancelled => Err(StageFailure::Cancelled),
        }
    }

    /// Best-effort recorder teardown. Failures here are logged and never
    /// escalate: they must not keep the job from finalizing.
    async fn finalize_recorder(&self, job: &Job, session_slot: &mut Option<Box<dyn RecorderSession>>) {
        let Some(session) = session_slot.as_mut() else {
            return;
        };
        if session.is_recording() {
            self.status.update(
                JobPhase::Finalizing,
                "Stopping recorder...",
                job.subject_identifier.as_str(),
            );
            match session.stop_record().await {
                Ok(()) => {
                    info!(delay = ?self.settings.stop_flush, "waiting for the recorder to flush the file");
                    sleep(self.settings.stop_flush).await;
                }
                Err(error) => warn!(%error, "failed to stop recorder"),
            }
        }
        if session.is_connected() {
            session.disconnect().await;
        }
    }

    /// Locates the newest recording and disposes of it per the job's
    /// publish mode.
    async fn dispose_artifact(&self, job: &Job) -> JobOutcome {
        let subject = job.subject_identifier.as_str();
        self.status.update(
            JobPhase::Finalizing,
            "Locating the latest recording...",
            subject,
        );
        let artifact_path = artifact::locate_latest(
            &self.settings.recording_dir,
            &self.settings.recording_extension,
        )
        .map_err(|err| StageFailure::ArtifactMissing(err.to_string()))?;
        info!(artifact = %artifact_path.display(), "recording located");

        let resolved_name = self.adapters.names.display_name(subject).await;

        match job.publish_mode {
            crate::job::PublishMode::UploadToHost => {
                let file_name = artifact_path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default();
                self.status.update(
                    JobPhase::Publishing,
                    format!("Uploading {file_name}..."),
                    subject,
                );
                let title = video_title(subject, resolved_name.as_deref());
                let url = self
                    .adapters
                    .publisher
                    .publish(&artifact_path, &title)
                    .await
                    .map_err(|err| StageFailure::Publish(err.to_string()))?;
                Ok(Disposition::Uploaded {
                    url,
                    artifact: artifact_path,
                    resolved_name,
                })
            }
            crate::job::PublishMode::SaveLocally => {
                self.status
                    .update(JobPhase::Finalizing, "Renaming recording...", subject);
                let renamed = artifact::rename_with_metadata(
                    &artifact_path,
                    subject,
                    resolved_name.as_deref(),
                    Utc::now(),
                )
                .map_err(|err| StageFailure::Save(err.to_string()))?;
                Ok(Disposition::Saved {
                    path: renamed,
                    resolved_name,
                })
            }
        }
    }

    /// The single exhaustive match at the terminal-state boundary: every
    /// way out of the state machine becomes one result record here.
    fn terminal_result(&self, job: &Job, outcome: JobOutcome) -> JobResult {
        let base = |job: &Job| JobResult {
            timestamp: Utc::now(),
            subject_identifier: job.subject_identifier.clone(),
            target_reference: job.target_reference.clone(),
            outcome_url_or_path: None,
            task_status: crate::job::TaskStatus::ProcessingFailed,
            final_artifact_path: None,
            publish_mode: job.publish_mode,
            submitted_by: job.submitted_by.clone(),
            resolved_subject_name: None,
            failure_cause: None,
        };
        match outcome {
            Ok(Disposition::Uploaded {
                url,
                artifact,
                resolved_name,
            }) => {
                self.status.update(
                    JobPhase::Finished,
                    "Upload complete.",
                    job.subject_identifier.as_str(),
                );
                JobResult {
                    outcome_url_or_path: Some(url),
                    task_status: crate::job::TaskStatus::Uploaded,
                    final_artifact_path: Some(artifact),
                    resolved_subject_name: resolved_name,
                    ..base(job)
                }
            }
            Ok(Disposition::Saved {
                path,
                resolved_name,
            }) => {
                self.status.update(
                    JobPhase::Finished,
                    "Recording saved.",
                    job.subject_identifier.as_str(),
                );
                JobResult {
                    outcome_url_or_path: Some(path.to_string_lossy().to_string()),
                    task_status: crate::job::TaskStatus::SavedLocally,
                    final_artifact_path: Some(path),
                    resolved_subject_name: resolved_name,
                    ..base(job)
                }
            }
            Err(failure) => {
                error!(
                    job_id = %job.job_id,
                    subject = %job.subject_identifier,
                    error = %failure,
                    "job failed"
                );
                self.status.update(
                    JobPhase::Error,
                    format!("Workflow failed: {failure}"),
                    job.subject_identifier.as_str(),
                );
                JobResult {
                    task_status: failure.task_status(),
                    failure_cause: Some(failure.to_string()),
                    ..base(job)
                }
            }
        }
    }
}

fn video_title(subject_id: &str, resolved_name: Option<&str>) -> String {
    match resolved_name {
        Some(name) => format!("Suspected Cheater: {name} ({subject_id}) - Highlights"),
        None => format!("Suspected Cheater: {subject_id} - Highlights"),
    }
}
