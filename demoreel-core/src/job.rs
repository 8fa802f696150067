use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Disposal of a finished capture: hand the file to the hosting service or
/// keep it on disk under a readable name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    UploadToHost,
    SaveLocally,
}

impl PublishMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishMode::UploadToHost => "upload_to_host",
            PublishMode::SaveLocally => "save_locally",
        }
    }
}

impl std::fmt::Display for PublishMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of work as submitted by a producer. Immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    /// A match share code, free text containing one, or a direct `.dem.bz2`
    /// download URL.
    pub target_reference: String,
    pub subject_identifier: String,
    pub publish_mode: PublishMode,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        target_reference: impl Into<String>,
        subject_identifier: impl Into<String>,
        publish_mode: PublishMode,
        submitted_by: impl Into<String>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            target_reference: target_reference.into(),
            subject_identifier: subject_identifier.into(),
            publish_mode,
            submitted_by: submitted_by.into(),
            submitted_at: Utc::now(),
        }
    }

    /// The 17-digit platform id rule applied at the query-parameter entry
    /// point. The pipeline itself does not validate further.
    pub fn validate_subject(candidate: &str) -> bool {
        candidate.len() == 17 && candidate.bytes().all(|b| b.is_ascii_digit())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Idle,
    Downloading,
    Analyzing,
    ConnectingRecorder,
    Recording,
    Finalizing,
    Publishing,
    Finished,
    Error,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Idle => "idle",
            JobPhase::Downloading => "downloading",
            JobPhase::Analyzing => "analyzing",
            JobPhase::ConnectingRecorder => "connecting_recorder",
            JobPhase::Recording => "recording",
            JobPhase::Finalizing => "finalizing",
            JobPhase::Publishing => "publishing",
            JobPhase::Finished => "finished",
            JobPhase::Error => "error",
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The process-wide "what is the worker doing right now" snapshot.
/// Last-write-wins; only the latest value is observable.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub phase: JobPhase,
    pub detail: String,
    pub subject: String,
}

impl JobStatus {
    pub fn idle() -> Self {
        Self {
            phase: JobPhase::Idle,
            detail: "Waiting for a new job to be submitted.".to_string(),
            subject: String::new(),
        }
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::idle()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Uploaded,
    SavedLocally,
    UploadFailed,
    SaveFailed,
    ProcessingFailed,
    DemoExpired,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Uploaded => "uploaded",
            TaskStatus::SavedLocally => "saved_locally",
            TaskStatus::UploadFailed => "upload_failed",
            TaskStatus::SaveFailed => "save_failed",
            TaskStatus::ProcessingFailed => "processing_failed",
            TaskStatus::DemoExpired => "demo_expired",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Uploaded | TaskStatus::SavedLocally)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable record of one completed job. Exactly one is appended per
/// dequeued job, whatever stage it reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub timestamp: DateTime<Utc>,
    pub subject_identifier: String,
    pub target_reference: String,
    pub outcome_url_or_path: Option<String>,
    pub task_status: TaskStatus,
    #[serde(default)]
    pub final_artifact_path: Option<PathBuf>,
    pub publish_mode: PublishMode,
    pub submitted_by: String,
    #[serde(default)]
    pub resolved_subject_name: Option<String>,
    #[serde(default)]
    pub failure_cause: Option<String>,
}
