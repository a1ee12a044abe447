//! Status-listener trait for job progress events.
//!
//! Hand an [`Arc<dyn StatusListener>`] to a
//! [`crate::controller::JobController`] (or directly to a
//! [`crate::channel::ProgressChannel`]) to receive every status transition
//! of a job, whichever transport delivered it.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a broadcast channel, a websocket, a progress
//! bar or a database row without this crate knowing how the host application
//! communicates. Callers that prefer a `Stream` use
//! [`crate::controller::JobController::status_stream`] instead.
//!
//! # Example
//!
//! ```rust
//! use edgequake_docjob::{JobStatus, Progress, StatusListener};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingListener {
//!     updates: AtomicUsize,
//! }
//!
//! impl StatusListener for CountingListener {
//!     fn on_progress(&self, _status: &JobStatus, progress: &Progress) {
//!         self.updates.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}: {}/{}", progress.stage(), progress.current(), progress.total());
//!     }
//! }
//! ```

use crate::status::{ConversionResult, Failure, JobState, JobStatus, Progress};
use std::sync::Arc;

/// Receives the ordered status transitions of one job.
///
/// Implementations must be `Send + Sync`: updates are delivered from the
/// progress channel's background task. Delivery is sequential for a given
/// job (two hooks are never invoked concurrently for the same job), but
/// hooks must not block for long and must not call back into the
/// controller that owns the job.
///
/// Every method has a default implementation. Override [`on_status`] to see
/// raw statuses, or the typed hooks it dispatches to.
///
/// [`on_status`]: StatusListener::on_status
pub trait StatusListener: Send + Sync {
    /// Called for every delivered status. The default dispatches on state.
    fn on_status(&self, status: &JobStatus) {
        match status.state() {
            JobState::Pending => self.on_pending(status),
            JobState::Processing => match status.progress() {
                Some(progress) => self.on_progress(status, progress),
                None => self.on_processing(status),
            },
            JobState::HtmlReady if status.repeats_html() => {
                if let Some(progress) = status.progress() {
                    self.on_progress(status, progress);
                }
            }
            JobState::HtmlReady => {
                if let Some(html) = status.html_content() {
                    self.on_html_ready(status, html);
                }
            }
            JobState::Completed => {
                if let Some(result) = status.result() {
                    self.on_completed(status, result);
                }
            }
            JobState::Failed => {
                if let Some(failure) = status.failure() {
                    self.on_failed(status, failure);
                }
            }
        }
    }

    /// The backend accepted the job but has not started it.
    fn on_pending(&self, status: &JobStatus) {
        let _ = status;
    }

    /// Processing started, without stage information.
    fn on_processing(&self, status: &JobStatus) {
        let _ = status;
    }

    /// A processing update carrying stage counters.
    fn on_progress(&self, status: &JobStatus, progress: &Progress) {
        let _ = (status, progress);
    }

    /// Partial HTML is usable; other formats are still in flight.
    ///
    /// Called once per job. Later `html_ready` updates that only move the
    /// progress go to [`on_progress`](StatusListener::on_progress).
    fn on_html_ready(&self, status: &JobStatus, html: &str) {
        let _ = (status, html);
    }

    /// Terminal success.
    fn on_completed(&self, status: &JobStatus, result: &ConversionResult) {
        let _ = (status, result);
    }

    /// Terminal failure. Check [`Failure::kind`] to tell a user
    /// cancellation from a backend error.
    fn on_failed(&self, status: &JobStatus, failure: &Failure) {
        let _ = (status, failure);
    }
}

/// A no-op listener for callers that only inspect the final status.
pub struct NoopStatusListener;

impl StatusListener for NoopStatusListener {}

/// Convenience alias for a shared listener.
pub type SharedListener = Arc<dyn StatusListener>;
