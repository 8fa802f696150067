use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use demoreel_core::fetch::{DemoFetcher, DemoSource, FetchError, FetchResult, ShareCodeResolver};
use demoreel_core::game::{GameMonitor, WaitOutcome};
use demoreel_core::job::{Job, JobPhase, PublishMode, TaskStatus};
use demoreel_core::publish::{PublishError, PublishResult, Publisher};
use demoreel_core::recorder::{RecorderConnector, RecorderError, RecorderResult, RecorderSession};
use demoreel_core::subject::NameResolver;
use demoreel_core::tool::{ToolError, ToolResult, ToolRunner};
use demoreel_core::{
    Adapters, JobQueue, Orchestrator, OrchestratorSettings, ResultsStore, StatusBoard,
};

const SUBJECT: &str = "76561198872751464";
const SHARE_CODE: &str = "CSGO-aaaaa-bbbbb-ccccc-ddddd-eeeee";

#[derive(Clone, Default, Debug)]
struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    fn push(&self, event: &str) {
        self.0.lock().unwrap().push(event.to_string());
    }

    fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn contains(&self, event: &str) -> bool {
        self.0.lock().unwrap().iter().any(|e| e == event)
    }
}

enum DemoBehavior {
    Serve(PathBuf),
    Expired,
    Unavailable,
}

struct FakeDemos {
    behavior: DemoBehavior,
    log: EventLog,
}

#[async_trait]
impl DemoSource for FakeDemos {
    async fn fetch(&self, _target_reference: &str) -> FetchResult<PathBuf> {
        self.log.push("fetch");
        match &self.behavior {
            DemoBehavior::Serve(path) => Ok(path.clone()),
            DemoBehavior::Expired => Err(FetchError::Expired("the replay is gone".into())),
            DemoBehavior::Unavailable => {
                Err(FetchError::Unavailable("no endpoint answered".into()))
            }
        }
    }
}

struct FakeTool {
    analyze_ok: bool,
    log: EventLog,
}

#[async_trait]
impl ToolRunner for FakeTool {
    async fn analyze(&self, _demo: &std::path::Path) -> ToolResult<()> {
        self.log.push("analyze");
        if self.analyze_ok {
            Ok(())
        } else {
            Err(ToolError::CommandFailure {
                command: "node out/cli.js analyze demo.dem".into(),
                status: Some(1),
                stderr: "analysis exploded".into(),
            })
        }
    }

    async fn launch_highlights(
        &self,
        _demo: &std::path::Path,
        _subject_id: &str,
    ) -> ToolResult<()> {
        self.log.push("launch");
        Ok(())
    }
}

struct FakeGame {
    ready: WaitOutcome,
    finish: WaitOutcome,
    log: EventLog,
    results: ResultsStore,
    results_len_at_terminate: Arc<Mutex<Vec<usize>>>,
}

#[async_trait]
impl GameMonitor for FakeGame {
    async fn wait_for_launch(
        &self,
        _timeout: Duration,
        _cancel: &CancellationToken,
    ) -> WaitOutcome {
        self.log.push("wait_ready");
        self.ready
    }

    async fn wait_for_exit(&self, _timeout: Duration, _cancel: &CancellationToken) -> WaitOutcome {
        self.log.push("wait_finish");
        self.finish
    }

    async fn force_terminate(&self) {
        self.log.push("terminate");
        self.results_len_at_terminate
            .lock()
            .unwrap()
            .push(self.results.len());
    }
}

#[derive(Debug)]
struct FakeSession {
    connected: bool,
    recording: bool,
    already_active: bool,
    log: EventLog,
}

#[async_trait]
impl RecorderSession for FakeSession {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    async fn start_record(&mut self) -> RecorderResult<bool> {
        self.recording = true;
        if self.already_active {
            self.log.push("start:adopt");
            Ok(false)
        } else {
            self.log.push("start");
            Ok(true)
        }
    }

    async fn stop_record(&mut self) -> RecorderResult<()> {
        self.log.push("stop");
        self.recording = false;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.log.push("disconnect");
        self.connected = false;
    }
}

struct FakeConnector {
    connect_ok: bool,
    already_active: bool,
    log: EventLog,
}

#[async_trait]
impl RecorderConnector for FakeConnector {
    async fn connect(&self) -> RecorderResult<Box<dyn RecorderSession>> {
        self.log.push("connect");
        if !self.connect_ok {
            return Err(RecorderError::Connect("connection refused".into()));
        }
        Ok(Box::new(FakeSession {
            connected: true,
            recording: false,
            already_active: self.already_active,
            log: self.log.clone(),
        }))
    }
}

struct FakePublisher {
    url: Option<String>,
    calls: Arc<AtomicUsize>,
    log: EventLog,
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish(&self, _artifact: &std::path::Path, _title: &str) -> PublishResult<String> {
        self.log.push("publish");
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.url
            .clone()
            .ok_or_else(|| PublishError::Upload("hosting service said no".into()))
    }
}

struct StaticNames(Option<String>);

#[async_trait]
impl NameResolver for StaticNames {
    async fn display_name(&self, _subject_id: &str) -> Option<String> {
        self.0.clone()
    }
}

struct Scenario {
    demo: DemoBehavior,
    analyze_ok: bool,
    connect_ok: bool,
    already_active: bool,
    ready: WaitOutcome,
    finish: WaitOutcome,
    publish_url: Option<String>,
    display_name: Option<String>,
    with_recording: bool,
}

impl Scenario {
    fn good(demo_path: PathBuf) -> Self {
        Self {
            demo: DemoBehavior::Serve(demo_path),
            analyze_ok: true,
            connect_ok: true,
            already_active: false,
            ready: WaitOutcome::Satisfied,
            finish: WaitOutcome::Satisfied,
            publish_url: Some("https://www.youtube.com/watch?v=abc123".into()),
            display_name: None,
            with_recording: true,
        }
    }
}

struct Harness {
    orchestrator: Orchestrator,
    results: ResultsStore,
    status: StatusBoard,
    log: EventLog,
    publish_calls: Arc<AtomicUsize>,
    results_len_at_terminate: Arc<Mutex<Vec<usize>>>,
    recording_dir: PathBuf,
    _tmp: TempDir,
}

fn build(scenario: Scenario) -> Harness {
    let tmp = TempDir::new().unwrap();
    let recording_dir = tmp.path().join("recordings");
    std::fs::create_dir_all(&recording_dir).unwrap();
    if scenario.with_recording {
        std::fs::write(recording_dir.join("capture_0001.mp4"), "RECORDING").unwrap();
    }

    let queue = JobQueue::new();
    let status = StatusBoard::new();
    let results = ResultsStore::builder()
        .path(tmp.path().join("results.json"))
        .capacity(50)
        .build()
        .unwrap();
    let log = EventLog::default();
    let publish_calls = Arc::new(AtomicUsize::new(0));
    let results_len_at_terminate = Arc::new(Mutex::new(Vec::new()));

    let adapters = Adapters {
        demos: Arc::new(FakeDemos {
            behavior: scenario.demo,
            log: log.clone(),
        }),
        tool: Arc::new(FakeTool {
            analyze_ok: scenario.analyze_ok,
            log: log.clone(),
        }),
        game: Arc::new(FakeGame {
            ready: scenario.ready,
            finish: scenario.finish,
            log: log.clone(),
            results: results.clone(),
            results_len_at_terminate: results_len_at_terminate.clone(),
        }),
        recorder: Arc::new(FakeConnector {
            connect_ok: scenario.connect_ok,
            already_active: scenario.already_active,
            log: log.clone(),
        }),
        publisher: Arc::new(FakePublisher {
            url: scenario.publish_url,
            calls: publish_calls.clone(),
            log: log.clone(),
        }),
        names: Arc::new(StaticNames(scenario.display_name)),
    };
    let settings = OrchestratorSettings {
        recording_dir: recording_dir.clone(),
        recording_extension: "mp4".to_string(),
        ready_timeout: Duration::from_secs(60),
        launch_settle: Duration::ZERO,
        finish_timeout: Duration::from_secs(1800),
        stop_flush: Duration::ZERO,
    };
    let orchestrator = Orchestrator::new(
        queue,
        status.clone(),
        results.clone(),
        adapters,
        settings,
    );
    Harness {
        orchestrator,
        results,
        status,
        log,
        publish_calls,
        results_len_at_terminate,
        recording_dir,
        _tmp: tmp,
    }
}

/// Rebuilds a harness with a different demo source, keeping the shared
/// stores and fakes.
fn build_with_demos(harness: Harness, demos: Arc<dyn DemoSource>) -> Harness {
    let settings = OrchestratorSettings {
        recording_dir: harness.recording_dir.clone(),
        recording_extension: "mp4".to_string(),
        ready_timeout: Duration::from_secs(60),
        launch_settle: Duration::ZERO,
        finish_timeout: Duration::from_secs(1800),
        stop_flush: Duration::ZERO,
    };
    let adapters = Adapters {
        demos,
        tool: Arc::new(FakeTool {
            analyze_ok: true,
            log: harness.log.clone(),
        }),
        game: Arc::new(FakeGame {
            ready: WaitOutcome::Satisfied,
            finish: WaitOutcome::Satisfied,
            log: harness.log.clone(),
            results: harness.results.clone(),
            results_len_at_terminate: harness.results_len_at_terminate.clone(),
        }),
        recorder: Arc::new(FakeConnector {
            connect_ok: true,
            already_active: false,
            log: harness.log.clone(),
        }),
        publisher: Arc::new(FakePublisher {
            url: None,
            calls: harness.publish_calls.clone(),
            log: harness.log.clone(),
        }),
        names: Arc::new(StaticNames(None)),
    };
    let orchestrator = Orchestrator::new(
        JobQueue::new(),
        harness.status.clone(),
        harness.results.clone(),
        adapters,
        settings,
    );
    Harness {
        orchestrator,
        ..harness
    }
}

fn upload_job() -> Job {
    Job::new(SHARE_CODE, SUBJECT, PublishMode::UploadToHost, "tester")
}

fn demo_path(harness_tmp: &TempDir) -> PathBuf {
    let path = harness_tmp.path().join("match.dem");
    std::fs::write(&path, "DEMO").unwrap();
    path
}

#[tokio::test]
async fn successful_upload_walks_every_stage_in_order() {
    let tmp = TempDir::new().unwrap();
    let harness = build(Scenario::good(demo_path(&tmp)));
    let cancel = CancellationToken::new();

    harness.orchestrator.process_job(&upload_job(), &cancel).await;

    assert_eq!(
        harness.log.events(),
        vec![
            "fetch",
            "analyze",
            "connect",
            "launch",
            "wait_ready",
            "start",
            "wait_finish",
            "stop",
            "disconnect",
            "terminate",
            "publish",
        ]
    );
    let history = harness.results.recent();
    assert_eq!(history.len(), 1);
    let result = &history[0];
    assert_eq!(result.task_status, TaskStatus::Uploaded);
    assert_eq!(
        result.outcome_url_or_path.as_deref(),
        Some("https://www.youtube.com/watch?v=abc123")
    );
    assert!(result.failure_cause.is_none());
    assert_eq!(harness.status.snapshot().phase, JobPhase::Idle);
    // Cleanup ran before the result was appended.
    assert_eq!(*harness.results_len_at_terminate.lock().unwrap(), vec![0]);
}

#[tokio::test]
async fn save_locally_renames_instead_of_uploading() {
    let tmp = TempDir::new().unwrap();
    let mut scenario = Scenario::good(demo_path(&tmp));
    scenario.display_name = Some("Sm0ke King".into());
    let harness = build(scenario);
    let job = Job::new(SHARE_CODE, SUBJECT, PublishMode::SaveLocally, "tester");

    harness
        .orchestrator
        .process_job(&job, &CancellationToken::new())
        .await;

    assert_eq!(harness.publish_calls.load(Ordering::SeqCst), 0);
    let history = harness.results.recent();
    assert_eq!(history.len(), 1);
    let result = &history[0];
    assert_eq!(result.task_status, TaskStatus::SavedLocally);
    assert_eq!(result.resolved_subject_name.as_deref(), Some("Sm0ke King"));
    let saved = result.final_artifact_path.clone().unwrap();
    assert!(saved.exists());
    let name = saved.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.contains(SUBJECT));
    assert!(name.contains("Sm0ke_King"));
    assert!(!harness.recording_dir.join("capture_0001.mp4").exists());
}

#[tokio::test]
async fn failed_analysis_still_terminates_the_game() {
    let tmp = TempDir::new().unwrap();
    let mut scenario = Scenario::good(demo_path(&tmp));
    scenario.analyze_ok = false;
    let harness = build(scenario);

    harness
        .orchestrator
        .process_job(&upload_job(), &CancellationToken::new())
        .await;

    assert!(harness.log.contains("terminate"));
    assert!(!harness.log.contains("connect"));
    assert_eq!(harness.publish_calls.load(Ordering::SeqCst), 0);
    let history = harness.results.recent();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].task_status, TaskStatus::ProcessingFailed);
    assert!(history[0]
        .failure_cause
        .as_deref()
        .unwrap()
        .contains("analysis"));
    assert_eq!(*harness.results_len_at_terminate.lock().unwrap(), vec![0]);
}

#[tokio::test]
async fn unreachable_recorder_fails_the_job_but_cleanup_runs() {
    let tmp = TempDir::new().unwrap();
    let mut scenario = Scenario::good(demo_path(&tmp));
    scenario.connect_ok = false;
    let harness = build(scenario);

    harness
        .orchestrator
        .process_job(&upload_job(), &CancellationToken::new())
        .await;

    assert!(harness.log.contains("terminate"));
    assert_eq!(harness.publish_calls.load(Ordering::SeqCst), 0);
    let history = harness.results.recent();
    assert_eq!(history[0].task_status, TaskStatus::ProcessingFailed);
}

#[tokio::test]
async fn expired_source_is_reported_distinctly() {
    let harness = build(Scenario {
        demo: DemoBehavior::Expired,
        ..Scenario::good(PathBuf::new())
    });

    harness
        .orchestrator
        .process_job(&upload_job(), &CancellationToken::new())
        .await;

    let history = harness.results.recent();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].task_status, TaskStatus::DemoExpired);
    assert!(history[0].outcome_url_or_path.is_none());
    assert!(harness.log.contains("terminate"));
}

#[tokio::test]
async fn game_never_appearing_fails_the_job() {
    let tmp = TempDir::new().unwrap();
    let mut scenario = Scenario::good(demo_path(&tmp));
    scenario.ready = WaitOutcome::TimedOut;
    let harness = build(scenario);

    harness
        .orchestrator
        .process_job(&upload_job(), &CancellationToken::new())
        .await;

    let history = harness.results.recent();
    assert_eq!(history[0].task_status, TaskStatus::ProcessingFailed);
    assert!(history[0]
        .failure_cause
        .as_deref()
        .unwrap()
        .contains("did not appear"));
    assert!(harness.log.contains("terminate"));
    assert_eq!(harness.publish_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn playback_timeout_still_stops_recorder_and_terminates() {
    let tmp = TempDir::new().unwrap();
    let mut scenario = Scenario::good(demo_path(&tmp));
    scenario.finish = WaitOutcome::TimedOut;
    let harness = build(scenario);

    harness
        .orchestrator
        .process_job(&upload_job(), &CancellationToken::new())
        .await;

    assert!(harness.log.contains("stop"));
    assert!(harness.log.contains("disconnect"));
    assert!(harness.log.contains("terminate"));
    let history = harness.results.recent();
    assert_eq!(history[0].task_status, TaskStatus::ProcessingFailed);
    assert_eq!(*harness.results_len_at_terminate.lock().unwrap(), vec![0]);
}

#[tokio::test]
async fn empty_output_directory_means_artifact_missing() {
    let tmp = TempDir::new().unwrap();
    let mut scenario = Scenario::good(demo_path(&tmp));
    scenario.with_recording = false;
    let harness = build(scenario);

    harness
        .orchestrator
        .process_job(&upload_job(), &CancellationToken::new())
        .await;

    assert_eq!(harness.publish_calls.load(Ordering::SeqCst), 0);
    let history = harness.results.recent();
    assert_eq!(history[0].task_status, TaskStatus::ProcessingFailed);
    assert!(history[0]
        .failure_cause
        .as_deref()
        .unwrap()
        .contains("no recording produced"));
}

#[tokio::test]
async fn already_active_recording_is_adopted_and_still_stopped() {
    let tmp = TempDir::new().unwrap();
    let mut scenario = Scenario::good(demo_path(&tmp));
    scenario.already_active = true;
    let harness = build(scenario);

    harness
        .orchestrator
        .process_job(&upload_job(), &CancellationToken::new())
        .await;

    assert!(harness.log.contains("start:adopt"));
    assert!(!harness.log.contains("start"));
    assert!(harness.log.contains("stop"));
    let history = harness.results.recent();
    assert_eq!(history[0].task_status, TaskStatus::Uploaded);
}

#[tokio::test]
async fn publish_failure_marks_upload_failed_and_keeps_the_artifact() {
    let tmp = TempDir::new().unwrap();
    let mut scenario = Scenario::good(demo_path(&tmp));
    scenario.publish_url = None;
    let harness = build(scenario);

    harness
        .orchestrator
        .process_job(&upload_job(), &CancellationToken::new())
        .await;

    let history = harness.results.recent();
    assert_eq!(history[0].task_status, TaskStatus::UploadFailed);
    assert!(harness.recording_dir.join("capture_0001.mp4").exists());
}

#[tokio::test]
async fn share_code_with_unreachable_resolver_fails_processing() {
    let tmp = TempDir::new().unwrap();
    let harness = build(Scenario::good(demo_path(&tmp)));
    // The real fetcher pointed at a dead resolution service.
    let resolver = ShareCodeResolver::new(
        vec!["http://127.0.0.1:9/decode".to_string()],
        Duration::from_secs(1),
    )
    .unwrap();
    let fetcher =
        DemoFetcher::new(resolver, tmp.path().join("demos"), Duration::from_secs(1)).unwrap();
    let harness = build_with_demos(harness, Arc::new(fetcher));

    harness
        .orchestrator
        .process_job(&upload_job(), &CancellationToken::new())
        .await;

    let history = harness.results.recent();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].task_status, TaskStatus::ProcessingFailed);
    assert!(history[0].outcome_url_or_path.is_none());
}

#[tokio::test]
async fn cancellation_fails_the_job_cleanly() {
    let tmp = TempDir::new().unwrap();
    let harness = build(Scenario::good(demo_path(&tmp)));
    let cancel = CancellationToken::new();
    cancel.cancel();

    harness.orchestrator.process_job(&upload_job(), &cancel).await;

    assert!(harness.log.contains("terminate"));
    let history = harness.results.recent();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].task_status, TaskStatus::ProcessingFailed);
    assert_eq!(history[0].failure_cause.as_deref(), Some("job cancelled"));
    assert_eq!(harness.status.snapshot().phase, JobPhase::Idle);
}

#[tokio::test]
async fn every_dequeued_job_gets_exactly_one_result() {
    let tmp = TempDir::new().unwrap();
    let mut scenario = Scenario::good(demo_path(&tmp));
    scenario.analyze_ok = false;
    let harness = build(scenario);
    let cancel = CancellationToken::new();

    harness.orchestrator.process_job(&upload_job(), &cancel).await;
    harness.orchestrator.process_job(&upload_job(), &cancel).await;

    assert_eq!(harness.results.recent().len(), 2);
    assert_eq!(harness.status.snapshot().phase, JobPhase::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_loop_drains_the_queue_and_stops_on_cancel() {
    let tmp = TempDir::new().unwrap();
    let harness = build(Scenario::good(demo_path(&tmp)));
    let cancel = CancellationToken::new();

    harness.orchestrator.queue().enqueue(upload_job());
    harness.orchestrator.queue().enqueue(upload_job());

    let orchestrator = Arc::new(harness.orchestrator);
    let worker = {
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { orchestrator.run(cancel).await })
    };

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while harness.results.len() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "worker never finished");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cancel.cancel();
    worker.await.unwrap();

    assert_eq!(harness.results.len(), 2);
    assert!(orchestrator.queue().is_empty());
}
