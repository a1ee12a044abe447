//! Job tracking tests against a scripted in-process backend.
//!
//! The backend replays a fixed list of poll answers (the last one repeats),
//! so every test is deterministic and needs no network.
//!
//! Run with:
//!   cargo test --test tracking

use async_trait::async_trait;
use edgequake_docjob::{
    convert, BackendConfig, BackendKind, BackendRegistry, CancelOutcome, ConversionBackend,
    ConversionRequest, ConversionResult, FailureKind, FileSource, JobController, JobError,
    JobHandle, JobState, JobStatus, OutputFormat, Progress, StatusListener, TrackerConfig,
};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

#[derive(Clone)]
enum Step {
    Status(JobStatus),
    Transport,
    NotFound,
    /// Answer `processing` only after the given delay.
    Stall(Duration),
}

struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    streaming: bool,
    cancellable: bool,
    accept_cancel: bool,
    cancelled: AtomicBool,
    status_calls: AtomicUsize,
    stream_url_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
}

impl ScriptedBackend {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            streaming: false,
            cancellable: false,
            accept_cancel: false,
            cancelled: AtomicBool::new(false),
            status_calls: AtomicUsize::new(0),
            stream_url_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        }
    }

    fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    fn cancellable(mut self, accept: bool) -> Self {
        self.cancellable = true;
        self.accept_cancel = accept;
        self
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock();
        if steps.len() > 1 {
            steps.pop_front().unwrap()
        } else {
            steps
                .front()
                .cloned()
                .unwrap_or(Step::Status(JobStatus::pending()))
        }
    }
}

#[async_trait]
impl ConversionBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn supported_formats(&self) -> &[OutputFormat] {
        &[OutputFormat::Html, OutputFormat::Markdown]
    }

    async fn submit_job(&self, _request: &ConversionRequest) -> Result<JobHandle, JobError> {
        Ok(JobHandle::new("scripted", "job-1"))
    }

    async fn get_job_status(&self, _handle: &JobHandle) -> Result<JobStatus, JobError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.cancelled.load(Ordering::SeqCst) {
            // The backend finishes the job anyway; the client must not care.
            return Ok(JobStatus::completed(result("late")));
        }
        match self.next_step() {
            Step::Status(s) => Ok(s),
            Step::Transport => Err(JobError::Transport {
                backend: "scripted".into(),
                detail: "connection reset by peer".into(),
            }),
            Step::NotFound => Err(JobError::NotFound {
                backend: "scripted".into(),
                job_id: "job-1".into(),
            }),
            Step::Stall(delay) => {
                tokio::time::sleep(delay).await;
                Ok(JobStatus::processing(None))
            }
        }
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    fn supports_cancellation(&self) -> bool {
        self.cancellable
    }

    fn stream_url(&self, _handle: &JobHandle) -> Option<reqwest::Url> {
        self.stream_url_calls.fetch_add(1, Ordering::SeqCst);
        None
    }

    async fn cancel_job(&self, _handle: &JobHandle) -> Result<bool, JobError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if self.accept_cancel {
            self.cancelled.store(true, Ordering::SeqCst);
        }
        Ok(self.accept_cancel)
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<JobStatus>>);

impl Recorder {
    fn states(&self) -> Vec<JobState> {
        self.0.lock().iter().map(JobStatus::state).collect()
    }
}

impl StatusListener for Recorder {
    fn on_status(&self, status: &JobStatus) {
        self.0.lock().push(status.clone());
    }
}

fn result(content: &str) -> ConversionResult {
    ConversionResult {
        content: content.into(),
        ..Default::default()
    }
}

fn progress(current: i64, total: i64) -> Option<Progress> {
    Some(Progress::new("Recognizing text", current, total).unwrap())
}

fn fast_config() -> TrackerConfig {
    TrackerConfig::builder()
        .poll_interval(Duration::from_millis(10))
        .max_backoff(Duration::from_millis(40))
        .request_timeout(Duration::from_secs(1))
        .max_transport_retries(2)
        .build()
        .unwrap()
}

fn request() -> ConversionRequest {
    ConversionRequest::builder(FileSource::FileId("file-1".into()))
        .build()
        .unwrap()
}

fn registry(backend: Arc<ScriptedBackend>) -> Arc<BackendRegistry> {
    Arc::new(BackendRegistry::new().register(BackendKind::Worker, backend))
}

fn controller(backend: Arc<ScriptedBackend>, recorder: Arc<Recorder>) -> JobController {
    JobController::new(registry(backend), BackendKind::Worker, fast_config(), recorder)
}

async fn wait_terminal(c: &JobController) -> JobStatus {
    tokio::time::timeout(Duration::from_secs(5), c.wait_terminal())
        .await
        .expect("job did not reach a terminal status in time")
        .expect("controller stopped tracking")
}

// ── Delivery ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_snapshots_are_delivered_once() {
    let processing = JobStatus::processing(None);
    let backend = Arc::new(ScriptedBackend::new(vec![
        Step::Status(processing.clone()),
        Step::Status(processing.clone()),
        Step::Status(processing),
        Step::Status(JobStatus::completed(result("<p>done</p>"))),
    ]));
    let recorder = Arc::new(Recorder::default());
    let mut c = controller(backend.clone(), recorder.clone());

    c.start(&request()).await.unwrap();
    let status = wait_terminal(&c).await;

    assert_eq!(status.result().unwrap().content, "<p>done</p>");
    assert_eq!(recorder.states(), [JobState::Processing, JobState::Completed]);
    assert!(backend.status_calls.load(Ordering::SeqCst) >= 4);
    c.dispose();
}

#[tokio::test]
async fn progress_changes_are_each_delivered() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        Step::Status(JobStatus::processing(progress(1, 3))),
        Step::Status(JobStatus::processing(progress(1, 3))),
        Step::Status(JobStatus::processing(progress(2, 3))),
        Step::Status(JobStatus::completed(result("x"))),
    ]));
    let recorder = Arc::new(Recorder::default());
    let mut c = controller(backend, recorder.clone());

    c.start(&request()).await.unwrap();
    wait_terminal(&c).await;

    let counters: Vec<_> = recorder
        .0
        .lock()
        .iter()
        .filter_map(|s| s.progress().map(Progress::current))
        .collect();
    assert_eq!(counters, [1, 2]);
}

#[tokio::test]
async fn delivered_states_never_move_backwards() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        Step::Status(JobStatus::pending()),
        Step::Status(JobStatus::processing(progress(1, 3))),
        Step::Status(JobStatus::html_ready("<p>draft</p>", progress(2, 3))),
        // A lagging replica answers with an older snapshot.
        Step::Status(JobStatus::processing(progress(2, 3))),
        Step::Status(JobStatus::pending()),
        Step::Status(JobStatus::completed(result("<p>final</p>"))),
    ]));
    let recorder = Arc::new(Recorder::default());
    let mut c = controller(backend, recorder.clone());

    c.start(&request()).await.unwrap();
    wait_terminal(&c).await;

    let ranks: Vec<u8> = recorder.states().iter().map(|s| s.rank()).collect();
    assert!(ranks.windows(2).all(|w| w[0] <= w[1]), "ranks: {ranks:?}");
    assert_eq!(
        recorder.states(),
        [
            JobState::Pending,
            JobState::Processing,
            JobState::HtmlReady,
            JobState::Completed
        ]
    );
}

#[tokio::test]
async fn html_ready_exposes_partial_content_before_completion() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        Step::Status(JobStatus::html_ready("<p>draft</p>", None)),
        Step::Status(JobStatus::completed(result("<p>final</p>"))),
    ]));
    let recorder = Arc::new(Recorder::default());
    let mut c = controller(backend, recorder.clone());

    c.start(&request()).await.unwrap();
    wait_terminal(&c).await;

    let seen = recorder.0.lock();
    assert_eq!(seen[0].html_content(), Some("<p>draft</p>"));
    assert_eq!(seen[1].result().unwrap().content, "<p>final</p>");
}

#[tokio::test]
async fn status_stream_ends_after_the_terminal_status() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        Step::Status(JobStatus::processing(progress(1, 2))),
        Step::Status(JobStatus::processing(progress(2, 2))),
        Step::Status(JobStatus::completed(result("x"))),
    ]));
    let mut c = controller(backend, Arc::new(Recorder::default()));
    c.start(&request()).await.unwrap();

    let collected = tokio::time::timeout(
        Duration::from_secs(5),
        c.status_stream().collect::<Vec<_>>(),
    )
    .await
    .expect("status stream did not end");

    assert!(!collected[0].is_terminal());
    assert_eq!(collected.last().map(JobStatus::state), Some(JobState::Completed));
    assert_eq!(collected.iter().filter(|s| s.is_terminal()).count(), 1);

    // A stream opened after the end yields the terminal status and stops.
    let late = c.status_stream().collect::<Vec<_>>().await;
    assert_eq!(late.len(), 1);
    assert!(late[0].is_terminal());
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_handle_fails_with_not_found() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        Step::Status(JobStatus::processing(None)),
        Step::NotFound,
    ]));
    let mut c = controller(backend, Arc::new(Recorder::default()));

    c.start(&request()).await.unwrap();
    let status = wait_terminal(&c).await;

    let failure = status.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::NotFound);
    assert!(failure.reason.contains("job-1"), "reason: {}", failure.reason);
}

#[tokio::test]
async fn transient_failures_within_budget_are_absorbed() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        Step::Transport,
        Step::Transport,
        Step::Status(JobStatus::processing(None)),
        Step::Transport,
        Step::Transport,
        Step::Status(JobStatus::completed(result("ok"))),
    ]));
    let recorder = Arc::new(Recorder::default());
    let mut c = controller(backend, recorder.clone());

    c.start(&request()).await.unwrap();
    let status = wait_terminal(&c).await;

    assert_eq!(status.state(), JobState::Completed);
    assert_eq!(recorder.states(), [JobState::Processing, JobState::Completed]);
}

#[tokio::test]
async fn timed_out_poll_is_retried_not_fatal() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        Step::Stall(Duration::from_secs(5)),
        Step::Status(JobStatus::completed(result("ok"))),
    ]));
    let recorder = Arc::new(Recorder::default());
    let config = TrackerConfig::builder()
        .poll_interval(Duration::from_millis(10))
        .max_backoff(Duration::from_millis(40))
        .request_timeout(Duration::from_millis(100))
        .max_transport_retries(2)
        .build()
        .unwrap();
    let mut c = JobController::new(
        registry(backend.clone()),
        BackendKind::Worker,
        config,
        recorder.clone(),
    );

    c.start(&request()).await.unwrap();
    let status = tokio::time::timeout(Duration::from_secs(2), c.wait_terminal())
        .await
        .expect("a stalled poll was not abandoned at the request timeout")
        .unwrap();

    assert_eq!(status.result().unwrap().content, "ok");
    assert_eq!(backend.status_calls.load(Ordering::SeqCst), 2);
    assert_eq!(recorder.states(), [JobState::Completed]);
}

#[tokio::test]
async fn exhausted_retry_budget_fails_with_connection() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        Step::Status(JobStatus::processing(None)),
        Step::Transport,
    ]));
    let recorder = Arc::new(Recorder::default());
    let mut c = controller(backend.clone(), recorder.clone());

    c.start(&request()).await.unwrap();
    let status = wait_terminal(&c).await;

    let failure = status.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Connection);
    assert!(failure.reason.contains("connection reset"), "reason: {}", failure.reason);
    // One successful poll plus max_transport_retries + 1 failures.
    assert_eq!(backend.status_calls.load(Ordering::SeqCst), 4);
    assert_eq!(recorder.states(), [JobState::Processing, JobState::Failed]);
}

#[tokio::test]
async fn backend_failure_keeps_its_reason() {
    let backend = Arc::new(ScriptedBackend::new(vec![Step::Status(JobStatus::failed(
        FailureKind::Backend,
        "Conversion failed: out of memory",
    ))]));
    let mut c = controller(backend, Arc::new(Recorder::default()));

    c.start(&request()).await.unwrap();
    let status = wait_terminal(&c).await;

    assert_eq!(status.error(), Some("Conversion failed: out of memory"));
    assert!(!status.is_cancelled());
}

#[tokio::test]
async fn unsupported_format_is_rejected_before_a_handle_exists() {
    let config = BackendConfig::new(BackendKind::Modal, "http://127.0.0.1:9");
    let registry = Arc::new(BackendRegistry::from_configs(&[config]).unwrap());
    let mut c = JobController::new(
        registry,
        BackendKind::Modal,
        fast_config(),
        Arc::new(Recorder::default()),
    );
    let request = ConversionRequest::builder(FileSource::Url("https://h/a.pdf".into()))
        .format(OutputFormat::Json)
        .build()
        .unwrap();

    let err = c.start(&request).await.unwrap_err();
    assert!(matches!(err, JobError::Submission { .. }), "got: {err:?}");
    assert!(c.handle().is_none());
    assert!(c.status().is_none());
}

#[tokio::test]
async fn unregistered_backend_kind_is_an_error() {
    let backend = Arc::new(ScriptedBackend::new(vec![]));
    let mut c = JobController::new(
        registry(backend),
        BackendKind::Runpod,
        fast_config(),
        Arc::new(Recorder::default()),
    );
    assert!(matches!(
        c.start(&request()).await,
        Err(JobError::UnknownBackend { .. })
    ));
}

// ── Channel selection ────────────────────────────────────────────────────────

#[tokio::test]
async fn polling_backend_is_never_asked_for_a_stream() {
    let backend = Arc::new(ScriptedBackend::new(vec![Step::Status(JobStatus::completed(
        result("x"),
    ))]));
    let mut c = controller(backend.clone(), Arc::new(Recorder::default()));

    c.start(&request()).await.unwrap();
    wait_terminal(&c).await;

    assert_eq!(backend.stream_url_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn streaming_can_be_turned_off() {
    let backend = Arc::new(
        ScriptedBackend::new(vec![Step::Status(JobStatus::completed(result("x")))]).streaming(),
    );
    let config = TrackerConfig::builder()
        .poll_interval(Duration::from_millis(10))
        .prefer_streaming(false)
        .build()
        .unwrap();
    let mut c = JobController::new(
        registry(backend.clone()),
        BackendKind::Worker,
        config,
        Arc::new(Recorder::default()),
    );

    c.start(&request()).await.unwrap();
    wait_terminal(&c).await;

    assert_eq!(backend.stream_url_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_stream_url_falls_back_to_polling() {
    let backend = Arc::new(
        ScriptedBackend::new(vec![
            Step::Status(JobStatus::processing(None)),
            Step::Status(JobStatus::completed(result("polled"))),
        ])
        .streaming(),
    );
    let mut c = controller(backend.clone(), Arc::new(Recorder::default()));

    c.start(&request()).await.unwrap();
    let status = wait_terminal(&c).await;

    assert_eq!(backend.stream_url_calls.load(Ordering::SeqCst), 1);
    assert_eq!(status.result().unwrap().content, "polled");
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn accepted_cancel_wins_over_later_backend_updates() {
    let backend = Arc::new(
        ScriptedBackend::new(vec![Step::Status(JobStatus::processing(progress(1, 9)))])
            .cancellable(true),
    );
    let recorder = Arc::new(Recorder::default());
    let mut c = controller(backend.clone(), recorder.clone());
    c.start(&request()).await.unwrap();

    let mut updates = c.status_stream();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(s) = updates.next().await {
            if s.state() == JobState::Processing {
                break;
            }
        }
    })
    .await
    .expect("job never reported processing");

    assert_eq!(c.cancel().await, CancelOutcome::Cancelled);
    assert!(c.status().unwrap().is_cancelled());
    assert_eq!(c.status().unwrap().error(), Some("Cancelled by user"));

    // The backend now answers `completed`; the local view must not change.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(c.status().unwrap().is_cancelled());
    let seen = recorder.states();
    assert_eq!(seen.last(), Some(&JobState::Failed));
    assert!(!seen.contains(&JobState::Completed));
    assert!(wait_terminal(&c).await.is_cancelled());
    c.dispose();
}

#[tokio::test]
async fn cancel_after_terminal_is_not_cancellable() {
    let backend = Arc::new(
        ScriptedBackend::new(vec![Step::Status(JobStatus::completed(result("x")))])
            .cancellable(true),
    );
    let mut c = controller(backend.clone(), Arc::new(Recorder::default()));

    c.start(&request()).await.unwrap();
    let before = wait_terminal(&c).await;

    assert_eq!(c.cancel().await, CancelOutcome::NotCancellable);
    assert_eq!(c.status(), Some(before));
    assert_eq!(backend.cancel_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancel_on_backend_without_support_is_a_noop() {
    let backend = Arc::new(ScriptedBackend::new(vec![Step::Status(JobStatus::processing(
        None,
    ))]));
    let mut c = controller(backend.clone(), Arc::new(Recorder::default()));

    c.start(&request()).await.unwrap();
    assert_eq!(c.cancel().await, CancelOutcome::NotCancellable);
    assert_eq!(backend.cancel_calls.load(Ordering::SeqCst), 0);
    assert!(!c.status().unwrap().is_terminal());
    c.dispose();
}

#[tokio::test]
async fn declined_cancel_keeps_tracking() {
    let backend = Arc::new(
        ScriptedBackend::new(vec![
            Step::Status(JobStatus::processing(None)),
            Step::Status(JobStatus::processing(None)),
            Step::Status(JobStatus::completed(result("finished"))),
        ])
        .cancellable(false),
    );
    let mut c = controller(backend.clone(), Arc::new(Recorder::default()));

    c.start(&request()).await.unwrap();
    let outcome = c.cancel().await;
    assert!(matches!(outcome, CancelOutcome::Rejected(_)), "got: {outcome:?}");
    assert!(!outcome.accepted());

    let status = wait_terminal(&c).await;
    assert_eq!(status.result().unwrap().content, "finished");
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn dispose_is_idempotent_and_final() {
    let backend = Arc::new(ScriptedBackend::new(vec![Step::Status(JobStatus::processing(
        None,
    ))]));
    let recorder = Arc::new(Recorder::default());
    let mut c = controller(backend.clone(), recorder.clone());

    c.start(&request()).await.unwrap();
    c.dispose();
    c.dispose();

    assert!(c.is_disposed());
    assert!(c.handle().is_none());
    assert!(c.wait_terminal().await.is_none());
    assert!(matches!(c.start(&request()).await, Err(JobError::Disposed)));

    // No callbacks after dispose.
    let seen = recorder.0.lock().len();
    let polls = backend.status_calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(recorder.0.lock().len(), seen);
    assert!(backend.status_calls.load(Ordering::SeqCst) <= polls + 1);
}

#[tokio::test]
async fn a_controller_runs_one_job() {
    let backend = Arc::new(ScriptedBackend::new(vec![Step::Status(JobStatus::processing(
        None,
    ))]));
    let mut c = controller(backend, Arc::new(Recorder::default()));

    c.start(&request()).await.unwrap();
    assert!(matches!(
        c.start(&request()).await,
        Err(JobError::AlreadyStarted)
    ));
    c.dispose();
}

#[tokio::test]
async fn one_shot_convert_returns_the_result_or_the_failure() {
    let ok = Arc::new(ScriptedBackend::new(vec![
        Step::Status(JobStatus::processing(None)),
        Step::Status(JobStatus::completed(result("<h1>Report</h1>"))),
    ]));
    let converted = convert(registry(ok), BackendKind::Worker, &request(), &fast_config())
        .await
        .unwrap();
    assert_eq!(converted.content, "<h1>Report</h1>");

    let gone = Arc::new(ScriptedBackend::new(vec![Step::NotFound]));
    let err = convert(registry(gone), BackendKind::Worker, &request(), &fast_config())
        .await
        .unwrap_err();
    assert!(
        matches!(err, JobError::JobFailed { kind: FailureKind::NotFound, .. }),
        "got: {err:?}"
    );
}
