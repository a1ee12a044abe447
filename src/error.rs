//! Error types for the edgequake-docjob library.
//!
//! Errors are split by *when* they can happen:
//!
//! * **Submission phase**: [`JobError`] is returned directly from
//!   [`crate::controller::JobController::start`] (and from the adapter's
//!   `submit_job`). The caller learns synchronously that no job exists.
//!
//! * **Tracking phase**: once a job handle exists, nothing is thrown at the
//!   caller any more. Transport problems, expired handles and backend
//!   failures are folded into a terminal `failed`
//!   [`crate::status::JobStatus`] so callers have exactly one failure path
//!   to handle: status inspection.
//!
//! Cancellation is never an error: a refused cancellation is reported as a
//! [`crate::controller::CancelOutcome`] value.

use crate::status::FailureKind;
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the edgequake-docjob library.
#[derive(Debug, Error)]
pub enum JobError {
    // ── Submission errors ─────────────────────────────────────────────────
    /// The backend rejected the request before processing began.
    ///
    /// Not retryable without changing the request.
    #[error("Backend '{backend}' rejected the conversion request: {reason}")]
    Submission { backend: String, reason: String },

    // ── Transport errors ──────────────────────────────────────────────────
    /// Network-level failure talking to the backend.
    #[error("Transport error talking to '{backend}': {detail}\nCheck that the backend is reachable.")]
    Transport { backend: String, detail: String },

    /// A single request to the backend exceeded its timeout.
    #[error("Request to '{backend}' timed out after {secs}s")]
    Timeout { backend: String, secs: u64 },

    /// The backend answered, but with a payload we could not decode.
    #[error("Unexpected response from '{backend}': {detail}")]
    Protocol { backend: String, detail: String },

    /// The backend does not know this job (never existed or expired).
    #[error("Job '{job_id}' was not found on backend '{backend}'")]
    NotFound { backend: String, job_id: String },

    // ── Validation errors ─────────────────────────────────────────────────
    /// The conversion request itself is malformed.
    #[error("Invalid conversion request: {0}")]
    InvalidRequest(String),

    /// A status payload violates the status model invariants.
    #[error("Invalid job status: {0}")]
    InvalidStatus(String),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No adapter is registered for the requested backend kind.
    #[error("No backend registered for '{kind}'.\nConfigure it before starting a job.")]
    UnknownBackend { kind: String },

    // ── Controller misuse ─────────────────────────────────────────────────
    /// `start` was called on a controller that already owns a job.
    #[error("This controller already started a job; create a new controller per job")]
    AlreadyStarted,

    /// The controller was disposed.
    #[error("This controller has been disposed")]
    Disposed,

    // ── Outcome errors ────────────────────────────────────────────────────
    /// The job reached the terminal `failed` state.
    ///
    /// Only returned by the one-shot [`crate::convert::convert`] helper;
    /// the controller reports failures through the status instead.
    #[error("Conversion failed ({kind}): {reason}")]
    JobFailed { kind: FailureKind, reason: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not write a result file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Whether the failure is worth retrying on the next poll cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            JobError::Transport { .. } | JobError::Timeout { .. } | JobError::Protocol { .. }
        )
    }

    /// Whether the backend reported the job handle as unknown.
    pub fn is_not_found(&self) -> bool {
        matches!(self, JobError::NotFound { .. })
    }
}
