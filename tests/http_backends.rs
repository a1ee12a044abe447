//! Adapter and channel tests against mock HTTP backends (wiremock).
//!
//! Each test starts its own mock server that speaks one provider's wire
//! contract: the worker's REST + event-stream API, Modal's run/status
//! endpoints or Runpod's serverless API.
//!
//! Run with:
//!   cargo test --test http_backends

use edgequake_docjob::{
    convert_to_dir, open_channel, BackendConfig, BackendKind, BackendRegistry, CancelOutcome,
    ConversionBackend, ConversionRequest, FailureKind, FileSource, JobController, JobError,
    JobHandle, JobState, JobStatus, OutputFormat, StatusListener, TrackerConfig, WorkerBackend,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Test helpers ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder(Mutex<Vec<JobStatus>>);

impl Recorder {
    fn states(&self) -> Vec<JobState> {
        self.0.lock().iter().map(JobStatus::state).collect()
    }

    fn last(&self) -> JobStatus {
        self.0.lock().last().cloned().expect("no status delivered")
    }
}

impl StatusListener for Recorder {
    fn on_status(&self, status: &JobStatus) {
        self.0.lock().push(status.clone());
    }
}

fn config(streaming: bool) -> TrackerConfig {
    TrackerConfig::builder()
        .poll_interval(Duration::from_millis(10))
        .max_backoff(Duration::from_millis(50))
        .connect_timeout(Duration::from_secs(2))
        .request_timeout(Duration::from_secs(2))
        .prefer_streaming(streaming)
        .build()
        .unwrap()
}

fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream")
}

fn worker(server: &MockServer) -> Arc<dyn ConversionBackend> {
    Arc::new(WorkerBackend::new(&BackendConfig::new(BackendKind::Worker, server.uri())).unwrap())
}

fn controller(configs: &[BackendConfig], kind: BackendKind, streaming: bool) -> (JobController, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let registry = Arc::new(BackendRegistry::from_configs(configs).unwrap());
    let c = JobController::new(registry, kind, config(streaming), recorder.clone());
    (c, recorder)
}

async fn wait_terminal(c: &JobController) -> JobStatus {
    tokio::time::timeout(Duration::from_secs(5), c.wait_terminal())
        .await
        .expect("job did not reach a terminal status in time")
        .expect("controller stopped tracking")
}

fn file_id_request() -> ConversionRequest {
    ConversionRequest::builder(FileSource::FileId("f-1".into()))
        .build()
        .unwrap()
}

async fn mount_worker_submit(server: &MockServer, job_id: &str) {
    Mock::given(method("POST"))
        .and(path("/convert/f-1"))
        .and(query_param("output_format", "html"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "job_id": job_id })))
        .mount(server)
        .await;
}

// ── Worker: event stream ─────────────────────────────────────────────────────

#[tokio::test]
async fn stream_delivers_progress_partial_html_and_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs/j1/stream"))
        .and(header("accept", "text/event-stream"))
        .respond_with(sse(concat!(
            ": keep-alive\n\n",
            "event: progress\ndata: {\"stage\":\"Recognizing text\",\"current\":1,\"total\":3}\n\n",
            "event: ping\ndata: {}\n\n",
            "event: html_ready\ndata: {\"content\":\"<p>draft</p>\"}\n\n",
            "event: progress\ndata: {\"stage\":\"Extracting tables\",\"current\":2,\"total\":3}\n\n",
            "event: completed\ndata: {\"content\":\"<p>final</p>\",\"metadata\":{\"pages\":3}}\n\n",
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jobs/j1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let channel = open_channel(worker(&server), &config(true));
    assert_eq!(channel.strategy(), "stream");
    let mut subscription = channel.subscribe(JobHandle::new("worker", "j1"), recorder.clone());

    tokio::time::timeout(Duration::from_secs(5), subscription.closed())
        .await
        .expect("stream task did not finish");
    assert!(!subscription.is_active());

    assert_eq!(
        recorder.states(),
        [
            JobState::Processing,
            JobState::HtmlReady,
            JobState::HtmlReady,
            JobState::Completed
        ]
    );
    let seen = recorder.0.lock();
    assert_eq!(seen[0].progress().unwrap().current(), 1);
    assert_eq!(seen[2].progress().unwrap().stage(), "Extracting tables");
    assert_eq!(seen[2].html_content(), Some("<p>draft</p>"));
    let done = &seen[3];
    assert_eq!(done.result().unwrap().content, "<p>final</p>");
    assert_eq!(done.result().unwrap().metadata["pages"], 3);
    assert_eq!(done.html_content(), Some("<p>draft</p>"));
}

#[tokio::test]
async fn stream_closing_early_fails_with_connection() {
    let server = MockServer::start().await;
    mount_worker_submit(&server, "j1").await;
    Mock::given(method("GET"))
        .and(path("/jobs/j1/stream"))
        .respond_with(sse(
            "event: progress\ndata: {\"stage\":\"Layout\",\"current\":1,\"total\":4}\n\n",
        ))
        .mount(&server)
        .await;

    let (mut c, recorder) = controller(
        &[BackendConfig::new(BackendKind::Worker, server.uri())],
        BackendKind::Worker,
        true,
    );
    c.start(&file_id_request()).await.unwrap();
    let status = wait_terminal(&c).await;

    let failure = status.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Connection);
    assert!(failure.reason.contains("closed"), "reason: {}", failure.reason);
    assert_eq!(recorder.states(), [JobState::Processing, JobState::Failed]);
}

#[tokio::test]
async fn stream_error_event_for_unknown_job_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs/gone/stream"))
        .respond_with(sse("event: error\ndata: {\"error\":\"Job not found\"}\n\n"))
        .mount(&server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let mut subscription = open_channel(worker(&server), &config(true))
        .subscribe(JobHandle::new("worker", "gone"), recorder.clone());
    tokio::time::timeout(Duration::from_secs(5), subscription.closed())
        .await
        .unwrap();

    assert_eq!(recorder.last().failure().unwrap().kind, FailureKind::NotFound);
}

#[tokio::test]
async fn rejected_stream_falls_back_to_polling() {
    let server = MockServer::start().await;
    mount_worker_submit(&server, "j1").await;
    Mock::given(method("GET"))
        .and(path("/jobs/j1/stream"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jobs/j1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "job_id": "j1",
            "status": "completed",
            "result": { "content": "<p>polled</p>" }
        })))
        .mount(&server)
        .await;

    let (mut c, _) = controller(
        &[BackendConfig::new(BackendKind::Worker, server.uri())],
        BackendKind::Worker,
        true,
    );
    c.start(&file_id_request()).await.unwrap();
    let status = wait_terminal(&c).await;

    assert_eq!(status.result().unwrap().content, "<p>polled</p>");
}

#[tokio::test]
async fn slow_stream_connect_falls_back_to_polling() {
    let server = MockServer::start().await;
    mount_worker_submit(&server, "j1").await;
    Mock::given(method("GET"))
        .and(path("/jobs/j1/stream"))
        .respond_with(
            sse("event: completed\ndata: {\"content\":\"too late\"}\n\n")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jobs/j1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "job_id": "j1",
            "status": "completed",
            "result": { "content": "<p>polled</p>" }
        })))
        .mount(&server)
        .await;

    let tracker = TrackerConfig::builder()
        .poll_interval(Duration::from_millis(10))
        .max_backoff(Duration::from_millis(50))
        .connect_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let registry = Arc::new(
        BackendRegistry::from_configs(&[BackendConfig::new(BackendKind::Worker, server.uri())])
            .unwrap(),
    );
    let mut c = JobController::new(
        registry,
        BackendKind::Worker,
        tracker,
        Arc::new(Recorder::default()),
    );
    c.start(&file_id_request()).await.unwrap();
    let status = tokio::time::timeout(Duration::from_secs(2), c.wait_terminal())
        .await
        .expect("polling fallback did not finish before the stream answered")
        .unwrap();

    assert_eq!(status.result().unwrap().content, "<p>polled</p>");
}

#[tokio::test]
async fn oversized_completed_event_is_read_from_the_status_endpoint() {
    let server = MockServer::start().await;
    let body = format!(
        "event: progress\ndata: {{\"stage\":\"Layout\",\"current\":1,\"total\":2}}\n\n\
         event: completed\ndata: {{\"content\":\"{}\"}}\n\n",
        "x".repeat(16 * 1024)
    );
    Mock::given(method("GET"))
        .and(path("/jobs/j1/stream"))
        .respond_with(sse(&body))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jobs/j1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "job_id": "j1",
            "status": "completed",
            "result": { "content": "<p>from status</p>" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tracker = TrackerConfig::builder()
        .poll_interval(Duration::from_millis(10))
        .max_backoff(Duration::from_millis(50))
        .max_event_size(1024)
        .build()
        .unwrap();
    let recorder = Arc::new(Recorder::default());
    let mut subscription = open_channel(worker(&server), &tracker)
        .subscribe(JobHandle::new("worker", "j1"), recorder.clone());
    tokio::time::timeout(Duration::from_secs(5), subscription.closed())
        .await
        .expect("stream task did not finish");

    assert_eq!(recorder.states(), [JobState::Processing, JobState::Completed]);
    assert_eq!(recorder.last().result().unwrap().content, "<p>from status</p>");
}

#[tokio::test]
async fn unsubscribing_stops_delivery() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs/slow/stream"))
        .respond_with(
            sse("event: completed\ndata: {\"content\":\"late\"}\n\n")
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let mut subscription = open_channel(worker(&server), &config(true))
        .subscribe(JobHandle::new("worker", "slow"), recorder.clone());
    subscription.unsubscribe();
    subscription.unsubscribe();
    tokio::time::timeout(Duration::from_secs(2), subscription.closed())
        .await
        .unwrap();

    assert!(!subscription.is_active());
    assert!(recorder.0.lock().is_empty());
}

// ── Worker: submission and polling ───────────────────────────────────────────

#[tokio::test]
async fn worker_rejection_is_a_submission_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/convert/f-1"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({ "detail": "page_range out of bounds" })),
        )
        .mount(&server)
        .await;

    let (mut c, recorder) = controller(
        &[BackendConfig::new(BackendKind::Worker, server.uri())],
        BackendKind::Worker,
        false,
    );
    let err = c.start(&file_id_request()).await.unwrap_err();

    match err {
        JobError::Submission { backend, reason } => {
            assert_eq!(backend, "worker");
            assert_eq!(reason, "page_range out of bounds");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(c.handle().is_none());
    assert!(recorder.0.lock().is_empty());
}

#[tokio::test]
async fn inline_document_is_uploaded_before_conversion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "file_id": "up-7" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/convert/up-7"))
        .and(query_param("output_format", "markdown"))
        .and(query_param("use_llm", "true"))
        .and(query_param("page_range", "1-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "job_id": "j9" })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = WorkerBackend::new(&BackendConfig::new(BackendKind::Worker, server.uri())).unwrap();
    let request = ConversionRequest::builder(FileSource::Inline {
        bytes: b"%PDF-1.7 scan".to_vec(),
        filename: "scan.pdf".into(),
        mime_type: Some("application/pdf".into()),
    })
    .format(OutputFormat::Markdown)
    .use_llm(true)
    .page_range("1-2")
    .build()
    .unwrap();

    let handle = backend.submit_job(&request).await.unwrap();
    assert_eq!(handle.id(), "j9");

    let requests = server.received_requests().await.unwrap();
    let upload = String::from_utf8_lossy(&requests[0].body);
    assert!(upload.contains("filename=\"scan.pdf\""), "body: {upload}");
    assert!(upload.contains("%PDF-1.7 scan"));
}

#[tokio::test]
async fn remote_document_is_fetched_by_the_worker() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/fetch-url"))
        .and(query_param("url", "https://docs.example.com/a.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "file_id": "f-1" })))
        .expect(1)
        .mount(&server)
        .await;
    mount_worker_submit(&server, "j1").await;

    let backend = WorkerBackend::new(&BackendConfig::new(BackendKind::Worker, server.uri())).unwrap();
    let request = ConversionRequest::builder(FileSource::Url("https://docs.example.com/a.pdf".into()))
        .build()
        .unwrap();
    assert_eq!(backend.submit_job(&request).await.unwrap().id(), "j1");
}

#[tokio::test]
async fn expired_worker_job_is_not_found() {
    let server = MockServer::start().await;
    mount_worker_submit(&server, "j1").await;
    Mock::given(method("GET"))
        .and(path("/jobs/j1"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "detail": "Job not found" })))
        .mount(&server)
        .await;

    let (mut c, _) = controller(
        &[BackendConfig::new(BackendKind::Worker, server.uri())],
        BackendKind::Worker,
        false,
    );
    c.start(&file_id_request()).await.unwrap();

    assert_eq!(
        wait_terminal(&c).await.failure().unwrap().kind,
        FailureKind::NotFound
    );
}

#[tokio::test]
async fn worker_cancel_is_adopted_locally() {
    let server = MockServer::start().await;
    mount_worker_submit(&server, "j1").await;
    Mock::given(method("GET"))
        .and(path("/jobs/j1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "processing",
            "progress": { "stage": "OCR", "current": 1, "total": 10 }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cancel/j1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "cancelled": true })))
        .expect(1)
        .mount(&server)
        .await;

    let (mut c, recorder) = controller(
        &[BackendConfig::new(BackendKind::Worker, server.uri())],
        BackendKind::Worker,
        false,
    );
    c.start(&file_id_request()).await.unwrap();

    assert_eq!(c.cancel().await, CancelOutcome::Cancelled);
    let status = wait_terminal(&c).await;
    assert!(status.is_cancelled());
    assert_eq!(status.error(), Some("Cancelled by user"));
    assert!(recorder.last().is_cancelled());
    c.dispose();
}

#[tokio::test]
async fn completed_job_is_saved_to_disk() {
    let server = MockServer::start().await;
    mount_worker_submit(&server, "j1").await;
    Mock::given(method("GET"))
        .and(path("/jobs/j1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "result": {
                "content": "<h1>Q3</h1>",
                "metadata": { "page_count": 1 },
                "formats": { "html": "<h1>Q3</h1>", "markdown": "# Q3" },
                "images": { "fig1.png": "iVBORw0KGgo=" }
            }
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(
        BackendRegistry::from_configs(&[BackendConfig::new(BackendKind::Worker, server.uri())])
            .unwrap(),
    );
    let saved = convert_to_dir(
        registry,
        BackendKind::Worker,
        &file_id_request(),
        &config(false),
        dir.path(),
    )
    .await
    .unwrap();

    assert_eq!(std::fs::read_to_string(dir.path().join("document.md")).unwrap(), "# Q3");
    assert!(dir.path().join("metadata.json").exists());
    assert_eq!(saved.images, [dir.path().join("images/fig1.png")]);
}

// ── Modal ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn modal_expired_call_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/run"))
        .and(body_partial_json(json!({ "file_url": "https://h/a.pdf" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "call_id": "fc-1" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/status/fc-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "status": "FAILED", "error": "expired" })),
        )
        .mount(&server)
        .await;

    let (mut c, _) = controller(
        &[BackendConfig::new(BackendKind::Modal, server.uri())],
        BackendKind::Modal,
        true,
    );
    let request = ConversionRequest::builder(FileSource::Url("https://h/a.pdf".into()))
        .build()
        .unwrap();
    c.start(&request).await.unwrap();

    assert!(!c.capabilities().unwrap().streaming);
    let status = wait_terminal(&c).await;
    assert_eq!(status.failure().unwrap().kind, FailureKind::NotFound);
    // Modal cannot cancel; the outcome says so and nothing changes.
    assert_eq!(c.cancel().await, CancelOutcome::NotCancellable);
}

#[tokio::test]
async fn modal_handler_error_inside_output_is_a_backend_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/run"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "fc-2" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/status/fc-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "COMPLETED",
            "output": { "error": "PDF is encrypted" }
        })))
        .mount(&server)
        .await;

    let (mut c, _) = controller(
        &[BackendConfig::new(BackendKind::Modal, server.uri())],
        BackendKind::Modal,
        false,
    );
    let request = ConversionRequest::builder(FileSource::Url("https://h/a.pdf".into()))
        .build()
        .unwrap();
    c.start(&request).await.unwrap();

    let status = wait_terminal(&c).await;
    assert_eq!(status.failure().unwrap().kind, FailureKind::Backend);
    assert!(status.error().unwrap().contains("encrypted"));
}

// ── Runpod ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn runpod_authenticates_and_cancels() {
    let server = MockServer::start().await;
    let base = format!("{}/v2/endpoint-1", server.uri());
    Mock::given(method("POST"))
        .and(path("/v2/endpoint-1/run"))
        .and(header("authorization", "Bearer rp-secret"))
        .and(body_partial_json(json!({
            "input": { "file_url": "https://h/a.pdf", "output_format": "markdown" }
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "id": "rp-1", "status": "IN_QUEUE" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/endpoint-1/status/rp-1"))
        .and(header("authorization", "Bearer rp-secret"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "id": "rp-1", "status": "IN_PROGRESS" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/endpoint-1/cancel/rp-1"))
        .and(header("authorization", "Bearer rp-secret"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "id": "rp-1", "status": "CANCELLED" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (mut c, _) = controller(
        &[BackendConfig::new(BackendKind::Runpod, base).with_api_key("rp-secret")],
        BackendKind::Runpod,
        true,
    );
    let request = ConversionRequest::builder(FileSource::Url("https://h/a.pdf".into()))
        .format(OutputFormat::Markdown)
        .build()
        .unwrap();
    c.start(&request).await.unwrap();

    assert_eq!(c.cancel().await, CancelOutcome::Cancelled);
    assert!(wait_terminal(&c).await.is_cancelled());
    c.dispose();
}

#[tokio::test]
async fn runpod_refuses_inline_documents() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (mut c, _) = controller(
        &[BackendConfig::new(BackendKind::Runpod, server.uri()).with_api_key("k")],
        BackendKind::Runpod,
        false,
    );
    let request = ConversionRequest::builder(FileSource::Inline {
        bytes: b"%PDF".to_vec(),
        filename: "a.pdf".into(),
        mime_type: None,
    })
    .build()
    .unwrap();

    assert!(matches!(
        c.start(&request).await,
        Err(JobError::Submission { .. })
    ));
}
