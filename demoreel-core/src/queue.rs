use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::info;

use crate::job::Job;

/// Unbounded, strict-FIFO, multi-producer/single-consumer job queue.
///
/// Producers call [`enqueue`](JobQueue::enqueue), which never blocks and
/// never rejects. The single orchestrator worker parks in
/// [`dequeue`](JobQueue::dequeue) until a job is available. A job is gone
/// from the queue the moment the consumer accepts it; if the process dies
/// mid-job that job is lost from queue and history alike.
#[derive(Clone, Default)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

#[derive(Default)]
struct QueueInner {
    pending: Mutex<VecDeque<Job>>,
    available: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, job: Job) {
        {
            let mut pending = self.inner.pending.lock().unwrap();
            pending.push_back(job.clone());
        }
        info!(
            job_id = %job.job_id,
            subject = %job.subject_identifier,
            submitted_by = %job.submitted_by,
            "job enqueued"
        );
        self.inner.available.notify_one();
    }

    /// Removes and returns the oldest pending job, waiting if none exists.
    /// Intended for the single orchestrator consumer.
    pub async fn dequeue(&self) -> Job {
        loop {
            if let Some(job) = self.inner.pending.lock().unwrap().pop_front() {
                return job;
            }
            self.inner.available.notified().await;
        }
    }

    /// Ordered snapshot of the backlog for the status interface.
    pub fn pending(&self) -> Vec<Job> {
        self.inner.pending.lock().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
