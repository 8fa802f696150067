use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::System;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a bounded wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Satisfied,
    TimedOut,
    Cancelled,
}

/// Polls a condition until it holds, the timeout elapses, or the token is
/// cancelled. The poll interval is a tunable, not a hidden constant.
pub async fn wait_until<F>(
    mut condition: F,
    timeout: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> WaitOutcome
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return WaitOutcome::Satisfied;
        }
        if Instant::now() >= deadline {
            return WaitOutcome::TimedOut;
        }
        tokio::select! {
            _ = cancel.cancelled() => return WaitOutcome::Cancelled,
            _ = sleep(poll_interval) => {}
        }
    }
}

/// Observes and controls the external game process by name.
#[async_trait]
pub trait GameMonitor: Send + Sync {
    async fn wait_for_launch(&self, timeout: Duration, cancel: &CancellationToken) -> WaitOutcome;
    async fn wait_for_exit(&self, timeout: Duration, cancel: &CancellationToken) -> WaitOutcome;
    /// Backstop against hangs: kills every matching process, whether or not
    /// playback ever started.
    async fn force_terminate(&self);
}

pub struct SystemGameMonitor {
    process_name: String,
    poll_interval: Duration,
    system: Mutex<System>,
}

impl SystemGameMonitor {
    pub fn new(process_name: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            process_name: process_name.into(),
            poll_interval,
            system: Mutex::new(System::new()),
        }
    }

    fn is_running(&self) -> bool {
        let mut system = self.system.lock().unwrap();
        system.refresh_processes();
        let running = system.processes_by_name(&self.process_name).next().is_some();
        running
    }
}

#[async_trait]
impl GameMonitor for SystemGameMonitor {
    async fn wait_for_launch(&self, timeout: Duration, cancel: &CancellationToken) -> WaitOutcome {
        debug!(process = %self.process_name, "waiting for game process to appear");
        let outcome = wait_until(|| self.is_running(), timeout, self.poll_interval, cancel).await;
        if outcome == WaitOutcome::Satisfied {
            info!(process = %self.process_name, "game process found");
        }
        outcome
    }

    async fn wait_for_exit(&self, timeout: Duration, cancel: &CancellationToken) -> WaitOutcome {
        debug!(process = %self.process_name, "waiting for game process to close");
        let outcome = wait_until(|| !self.is_running(), timeout, self.poll_interval, cancel).await;
        if outcome == WaitOutcome::Satisfied {
            info!(process = %self.process_name, "game process has closed");
        }
        outcome
    }

    async fn force_terminate(&self) {
        let mut system = self.system.lock().unwrap();
        system.refresh_processes();
        let mut killed = 0usize;
        for process in system.processes_by_name(&self.process_name) {
            if process.kill() {
                killed += 1;
            }
        }
        if killed > 0 {
            warn!(process = %self.process_name, count = killed, "force-terminated game process");
        } else {
            debug!(process = %self.process_name, "no game process to terminate");
        }
    }
}
