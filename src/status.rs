//! Job status model shared by every backend adapter and progress channel.
//!
//! ```text
//! pending ──▶ processing ──▶ html_ready ──▶ completed
//!    │             │              │
//!    └─────────────┴──────────────┴──────▶ failed
//! ```
//!
//! `html_ready` is optional: backends without partial delivery go straight
//! from `processing` to `completed`. Transitions never move backwards; the
//! rank returned by [`JobState::rank`] is what progress channels compare.
//!
//! Validation happens at construction time, so a [`JobStatus`] that exists
//! is always well-formed: results only appear on `completed`, failures only
//! on `failed`, and progress counters are never negative or past their total.
//! Out-of-range progress counters are **rejected**, not clamped.

use crate::error::JobError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ── State machine ────────────────────────────────────────────────────────

/// Position of a job in the conversion state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted by the backend, not started yet.
    Pending,
    /// Being converted.
    Processing,
    /// HTML is usable; richer formats are still being produced.
    HtmlReady,
    /// Terminal: every requested format is available.
    Completed,
    /// Terminal: the job will not produce a result.
    Failed,
}

impl JobState {
    /// Ordering used to reject backwards transitions.
    ///
    /// Both terminal states share the highest rank.
    pub fn rank(self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Processing => 1,
            JobState::HtmlReady => 2,
            JobState::Completed | JobState::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    ///
    /// Staying in the same non-terminal state is legal (progress updates).
    pub fn can_advance_to(self, next: JobState) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }

    /// Wire name, as used by the worker API.
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::HtmlReady => "html_ready",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "html_ready" => Ok(JobState::HtmlReady),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(JobError::InvalidStatus(format!("unknown job state '{other}'"))),
        }
    }
}

// ── Progress ─────────────────────────────────────────────────────────────

/// Stage-level progress reported by a backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    stage: String,
    current: u64,
    total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_secs: Option<f64>,
}

impl Progress {
    /// Validate and build a progress value.
    ///
    /// Counters arrive as signed integers from the wire; negative values and
    /// `current > total` are rejected with [`JobError::InvalidStatus`].
    pub fn new(stage: impl Into<String>, current: i64, total: i64) -> Result<Self, JobError> {
        let stage = stage.into();
        if current < 0 || total < 0 {
            return Err(JobError::InvalidStatus(format!(
                "progress counters must not be negative (stage '{stage}': {current}/{total})"
            )));
        }
        if current > total {
            return Err(JobError::InvalidStatus(format!(
                "progress current {current} exceeds total {total} (stage '{stage}')"
            )));
        }
        Ok(Self {
            stage,
            current: current as u64,
            total: total as u64,
            elapsed_secs: None,
        })
    }

    /// Attach the backend-reported elapsed time for the stage.
    pub fn with_elapsed(mut self, secs: f64) -> Self {
        if secs.is_finite() && secs >= 0.0 {
            self.elapsed_secs = Some(secs);
        }
        self
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn elapsed_secs(&self) -> Option<f64> {
        self.elapsed_secs
    }

    /// Completion ratio in `0.0..=1.0`; `None` when the total is unknown (0).
    pub fn fraction(&self) -> Option<f64> {
        (self.total > 0).then(|| self.current as f64 / self.total as f64)
    }

    /// Same stage and counters; elapsed time is ignored.
    fn same_counters(&self, other: &Progress) -> bool {
        self.stage == other.stage && self.current == other.current && self.total == other.total
    }
}

// ── Results ──────────────────────────────────────────────────────────────

/// Every output format a backend produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputFormats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<serde_json::Value>,
}

/// Final result of a completed job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    /// Primary content in the first requested format (HTML by default).
    pub content: String,
    /// Backend-extracted document metadata (page count, processor, …).
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub formats: OutputFormats,
    /// Image name → URL or base64 payload, for progressive loading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<BTreeMap<String, String>>,
}

// ── Failures ─────────────────────────────────────────────────────────────

/// Why a job ended in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The backend reported the failure.
    Backend,
    /// The backend no longer knows the job handle.
    NotFound,
    /// The client lost contact with the backend.
    Connection,
    /// The user cancelled the job.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Backend => "backend",
            FailureKind::NotFound => "not found",
            FailureKind::Connection => "connection",
            FailureKind::Cancelled => "cancelled",
        })
    }
}

/// Reason attached to a failed job. Always human-readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub reason: String,
}

/// Reason string used for user cancellation.
pub const CANCELLED_BY_USER: &str = "Cancelled by user";

// ── JobStatus ────────────────────────────────────────────────────────────

/// Point-in-time projection of a backend job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<Progress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    html_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<ConversionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<Failure>,
    #[serde(skip)]
    html_announced: bool,
}

impl JobStatus {
    /// Build a status, enforcing the payload/state invariants.
    pub fn new(
        state: JobState,
        progress: Option<Progress>,
        html_content: Option<String>,
        result: Option<ConversionResult>,
        failure: Option<Failure>,
    ) -> Result<Self, JobError> {
        if result.is_some() && state != JobState::Completed {
            return Err(JobError::InvalidStatus(format!(
                "a result payload is only allowed on completed jobs, not '{state}'"
            )));
        }
        if state == JobState::Completed && result.is_none() {
            return Err(JobError::InvalidStatus(
                "a completed job must carry a result".into(),
            ));
        }
        match (state, &failure) {
            (JobState::Failed, None) => {
                return Err(JobError::InvalidStatus(
                    "a failed job must carry a reason".into(),
                ))
            }
            (JobState::Failed, Some(f)) if f.reason.trim().is_empty() => {
                return Err(JobError::InvalidStatus(
                    "a failed job must carry a non-empty reason".into(),
                ))
            }
            (s, Some(_)) if s != JobState::Failed => {
                return Err(JobError::InvalidStatus(format!(
                    "an error is only allowed on failed jobs, not '{s}'"
                )))
            }
            _ => {}
        }
        if state == JobState::HtmlReady && html_content.is_none() {
            return Err(JobError::InvalidStatus(
                "html_ready requires the partial HTML content".into(),
            ));
        }
        Ok(Self {
            state,
            progress,
            html_content,
            result,
            failure,
            html_announced: false,
        })
    }

    pub fn pending() -> Self {
        Self::bare(JobState::Pending)
    }

    pub fn processing(progress: Option<Progress>) -> Self {
        Self {
            progress,
            ..Self::bare(JobState::Processing)
        }
    }

    pub fn html_ready(content: impl Into<String>, progress: Option<Progress>) -> Self {
        Self {
            progress,
            html_content: Some(content.into()),
            ..Self::bare(JobState::HtmlReady)
        }
    }

    pub fn completed(result: ConversionResult) -> Self {
        Self {
            result: Some(result),
            ..Self::bare(JobState::Completed)
        }
    }

    /// A failed status. An empty reason is replaced by a generic one so the
    /// "always human-readable" guarantee holds.
    pub fn failed(kind: FailureKind, reason: impl Into<String>) -> Self {
        let mut reason = reason.into();
        if reason.trim().is_empty() {
            reason = "Unknown error".to_string();
        }
        Self {
            failure: Some(Failure { kind, reason }),
            ..Self::bare(JobState::Failed)
        }
    }

    /// The local status a controller adopts after an accepted cancellation.
    pub fn cancelled() -> Self {
        Self::failed(FailureKind::Cancelled, CANCELLED_BY_USER)
    }

    fn bare(state: JobState) -> Self {
        Self {
            state,
            progress: None,
            html_content: None,
            result: None,
            failure: None,
            html_announced: false,
        }
    }

    /// Mark an `html_ready` status that follows another `html_ready`
    /// observation of the same job.
    pub(crate) fn following(mut self, previous: Option<&JobStatus>) -> Self {
        self.html_announced = self.state == JobState::HtmlReady
            && previous.is_some_and(|p| p.state == JobState::HtmlReady);
        self
    }

    /// Keep the partial HTML of an earlier observation on a completed status.
    pub(crate) fn carrying_html(mut self, html: Option<&str>) -> Self {
        if self.html_content.is_none() && self.state == JobState::Completed {
            self.html_content = html.map(str::to_string);
        }
        self
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn progress(&self) -> Option<&Progress> {
        self.progress.as_ref()
    }

    pub fn html_content(&self) -> Option<&str> {
        self.html_content.as_deref()
    }

    pub fn result(&self) -> Option<&ConversionResult> {
        self.result.as_ref()
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// Human-readable failure reason, if the job failed.
    pub fn error(&self) -> Option<&str> {
        self.failure.as_ref().map(|f| f.reason.as_str())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// An `html_ready` update whose HTML was already delivered by an earlier
    /// status; only the progress moved.
    pub fn repeats_html(&self) -> bool {
        self.html_announced
    }

    /// Distinguishes a user cancellation from a backend failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.failure,
            Some(Failure {
                kind: FailureKind::Cancelled,
                ..
            })
        )
    }

    /// Whether `other` carries the same information for notification
    /// purposes: state, progress counters, and presence of partial/final
    /// payloads. Used by the polling channel to drop redundant updates.
    pub fn same_observation(&self, other: &JobStatus) -> bool {
        let progress_same = match (&self.progress, &other.progress) {
            (None, None) => true,
            (Some(a), Some(b)) => a.same_counters(b),
            _ => false,
        };
        self.state == other.state
            && progress_same
            && self.html_content.is_some() == other.html_content.is_some()
            && self.result.is_some() == other.result.is_some()
            && self.failure == other.failure
    }
}
