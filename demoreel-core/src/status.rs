use std::sync::{Arc, Mutex};

use tracing::info;

use crate::job::{JobPhase, JobStatus};

/// Cloneable handle over the single current [`JobStatus`] value.
///
/// Written only by the orchestrator; everyone else takes read-only
/// snapshots. Intermediate phases can be missed by a poller, but Idle is
/// only ever published after the finished job's result has been appended.
#[derive(Clone, Default)]
pub struct StatusBoard {
    current: Arc<Mutex<JobStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(
        &self,
        phase: JobPhase,
        detail: impl Into<String>,
        subject: impl Into<String>,
    ) {
        let detail = detail.into();
        let subject = subject.into();
        info!(phase = %phase, subject = %subject, "{detail}");
        let mut current = self.current.lock().unwrap();
        *current = JobStatus {
            phase,
            detail,
            subject,
        };
    }

    pub fn idle(&self) {
        self.update(JobPhase::Idle, "Waiting for a new job to be submitted.", "");
    }

    pub fn snapshot(&self) -> JobStatus {
        self.current.lock().unwrap().clone()
    }
}
