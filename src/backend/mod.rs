//! Backend adapters: one per conversion provider, one shared contract.
//!
//! Each adapter translates the generic [`ConversionBackend`] calls into a
//! provider's HTTP API. Callers never special-case a provider by name; they
//! pick an adapter through the [`registry::BackendRegistry`] and query its
//! [`Capabilities`].
//!
//! | Adapter | Streaming | Cancellation |
//! |---------|-----------|--------------|
//! | [`worker::WorkerBackend`] | ✓ | ✓ |
//! | [`modal::ModalBackend`]   | — | — |
//! | [`runpod::RunpodBackend`] | — | ✓ |

pub mod http;
pub mod modal;
pub mod registry;
pub mod runpod;
pub mod worker;

use crate::error::JobError;
use crate::request::{ConversionRequest, OutputFormat};
use crate::status::JobStatus;
use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use std::fmt;

// ── Job handle ───────────────────────────────────────────────────────────

/// Opaque job identifier returned by a backend.
///
/// Only meaningful to the backend instance that issued it; the backend name
/// travels with the id for logging.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct JobHandle {
    backend: &'static str,
    id: String,
}

impl JobHandle {
    pub fn new(backend: &'static str, id: impl Into<String>) -> Self {
        Self {
            backend,
            id: id.into(),
        }
    }

    /// Name of the backend that issued the handle.
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Provider-side job id.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend, self.id)
    }
}

// ── Capabilities ─────────────────────────────────────────────────────────

/// Static capability flags of one adapter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub streaming: bool,
    pub cancellation: bool,
}

impl Capabilities {
    /// Query both flags once.
    pub fn of(backend: &dyn ConversionBackend) -> Self {
        Self {
            streaming: backend.supports_streaming(),
            cancellation: backend.supports_cancellation(),
        }
    }
}

// ── Adapter trait ────────────────────────────────────────────────────────

/// Contract every conversion provider adapter implements.
///
/// Adapters are shared behind `Arc` across controllers and channel tasks, so
/// they must be `Send + Sync` and hold no per-job state.
#[async_trait]
pub trait ConversionBackend: Send + Sync {
    /// Short, lowercase identifier (e.g. `"worker"`).
    fn name(&self) -> &'static str;

    /// Output formats this provider can produce.
    fn supported_formats(&self) -> &[OutputFormat];

    /// Send the request to the provider; processing starts on success.
    ///
    /// # Errors
    /// * [`JobError::Submission`]: the provider (or local validation)
    ///   rejected the request, e.g. an unsupported format.
    /// * [`JobError::Transport`] / [`JobError::Timeout`]: network failure.
    async fn submit_job(&self, request: &ConversionRequest) -> Result<JobHandle, JobError>;

    /// Point-in-time snapshot of the job. Side-effect free; safe to repeat.
    ///
    /// # Errors
    /// * [`JobError::NotFound`]: the provider does not know the handle.
    /// * transient errors ([`JobError::is_transient`]) otherwise.
    async fn get_job_status(&self, handle: &JobHandle) -> Result<JobStatus, JobError>;

    /// Whether [`stream_url`](Self::stream_url) yields a live event stream.
    fn supports_streaming(&self) -> bool;

    /// Whether [`cancel_job`](Self::cancel_job) can do anything.
    fn supports_cancellation(&self) -> bool;

    /// Event-stream endpoint for the job. Only called when
    /// [`supports_streaming`](Self::supports_streaming) is true.
    fn stream_url(&self, handle: &JobHandle) -> Option<Url> {
        let _ = handle;
        None
    }

    /// Ask the provider to stop the job. Best effort: `Ok(true)` means the
    /// request was accepted, not that the job stopped.
    async fn cancel_job(&self, handle: &JobHandle) -> Result<bool, JobError> {
        let _ = handle;
        Ok(false)
    }
}

/// Reject requests asking for formats the backend cannot produce.
pub(crate) fn check_formats(
    backend: &dyn ConversionBackend,
    request: &ConversionRequest,
) -> Result<(), JobError> {
    let supported = backend.supported_formats();
    let unsupported: Vec<String> = request
        .formats()
        .iter()
        .filter(|f| !supported.contains(f))
        .map(|f| f.to_string())
        .collect();
    if unsupported.is_empty() {
        return Ok(());
    }
    Err(JobError::Submission {
        backend: backend.name().to_string(),
        reason: format!(
            "unsupported output format(s): {} (supported: {})",
            unsupported.join(", "),
            supported
                .iter()
                .map(|f| f.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    })
}
