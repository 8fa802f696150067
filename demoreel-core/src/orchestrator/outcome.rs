use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::fetch::FetchError;
use crate::job::TaskStatus;

/// Why a job left the state machine early. One variant per failure point;
/// the terminal match in the orchestrator folds these into the job's
/// single durable result.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error("invalid target reference: {0}")]
    InvalidInput(String),
    #[error("source replay expired: {0}")]
    Expired(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("demo analysis failed: {0}")]
    Analysis(String),
    #[error("recorder unavailable: {0}")]
    Recorder(String),
    #[error("highlight launch failed: {0}")]
    Launch(String),
    #[error("game process did not appear within {0:?}")]
    ReadyTimeout(Duration),
    #[error("playback did not finish within {0:?}")]
    PlaybackTimeout(Duration),
    #[error("no recording produced: {0}")]
    ArtifactMissing(String),
    #[error("upload failed: {0}")]
    Publish(String),
    #[error("local save failed: {0}")]
    Save(String),
    #[error("job cancelled")]
    Cancelled,
}

impl StageFailure {
    pub fn task_status(&self) -> TaskStatus {
        match self {
            StageFailure::Expired(_) => TaskStatus::DemoExpired,
            StageFailure::Publish(_) => TaskStatus::UploadFailed,
            StageFailure::Save(_) => TaskStatus::SaveFailed,
            StageFailure::InvalidInput(_)
            | StageFailure::Download(_)
            | StageFailure::Analysis(_)
            | StageFailure::Recorder(_)
            | StageFailure::Launch(_)
            | StageFailure::ReadyTimeout(_)
            | StageFailure::PlaybackTimeout(_)
            | StageFailure::ArtifactMissing(_)
            | StageFailure::Cancelled => TaskStatus::ProcessingFailed,
        }
    }
}

impl From<FetchError> for StageFailure {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::InvalidReference(reference) => StageFailure::InvalidInput(reference),
            FetchError::Expired(reason) => StageFailure::Expired(reason),
            other => StageFailure::Download(other.to_string()),
        }
    }
}

/// How a successful job disposed of its artifact.
#[derive(Debug)]
pub enum Disposition {
    Uploaded {
        url: String,
        artifact: PathBuf,
        resolved_name: Option<String>,
    },
    Saved {
        path: PathBuf,
        resolved_name: Option<String>,
    },
}

pub type JobOutcome = Result<Disposition, StageFailure>;
