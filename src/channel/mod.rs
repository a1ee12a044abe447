//! Progress channels: deliver a job's status transitions to a listener.
//!
//! Two strategies share one contract, [`ProgressChannel`]:
//!
//! | Strategy | Used when | Transport |
//! |----------|-----------|-----------|
//! | [`stream::StreamingChannel`] | backend streams and streaming is preferred | long-lived event stream |
//! | [`poll::PollingChannel`] | otherwise | repeated `get_job_status` |
//!
//! Whichever strategy runs, the listener sees identically shaped
//! [`JobStatus`] values in non-decreasing state order, with at most one
//! terminal status, which is last. Errors during tracking never escape the
//! channel: they become a terminal `failed` status.
//!
//! ## Lifecycle
//!
//! [`ProgressChannel::subscribe`] spawns one tokio task per job and returns a
//! [`Subscription`]. The task ends on its own after delivering a terminal
//! status; [`Subscription::unsubscribe`] (or dropping the subscription) ends
//! it early and releases the connection.

pub mod guard;
pub mod poll;
pub mod stream;

use crate::backend::{ConversionBackend, JobHandle};
use crate::config::TrackerConfig;
use crate::progress::SharedListener;
use crate::status::JobStatus;
use guard::TransitionGuard;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Delivers the status transitions of one job to a listener.
pub trait ProgressChannel: Send + Sync {
    /// Start tracking `handle`. Must be called inside a tokio runtime.
    fn subscribe(&self, handle: JobHandle, listener: SharedListener) -> Subscription;

    /// Strategy name for logs (`"stream"` or `"poll"`).
    fn strategy(&self) -> &'static str;
}

/// Pick the strategy for `backend`.
///
/// Streaming is used only when the adapter supports it and the config
/// prefers it, so polling-only adapters never have `stream_url` called.
pub fn open_channel(
    backend: Arc<dyn ConversionBackend>,
    config: &TrackerConfig,
) -> Arc<dyn ProgressChannel> {
    if backend.supports_streaming() && config.prefer_streaming {
        Arc::new(stream::StreamingChannel::new(backend, config.clone()))
    } else {
        Arc::new(poll::PollingChannel::new(backend, config.clone()))
    }
}

// ── Subscription ─────────────────────────────────────────────────────────

/// Handle on a running channel task.
///
/// Dropping the subscription unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(token: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            token,
            task: Some(task),
        }
    }

    /// Stop delivering updates and release the transport. Idempotent.
    pub fn unsubscribe(&self) {
        if !self.token.is_cancelled() {
            debug!("channel: unsubscribed");
            self.token.cancel();
        }
    }

    /// Whether the transport is still running.
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled() && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Wait until the channel task has exited and its connection is closed.
    pub async fn closed(&mut self) {
        if let Some(task) = self.task.take() {
            // A panicking listener ends the task too; nothing left to release.
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

// ── Delivery gate ────────────────────────────────────────────────────────

/// Guard + listener owned by one channel task.
pub(crate) struct StatusGate {
    guard: TransitionGuard,
    listener: SharedListener,
    token: CancellationToken,
}

impl StatusGate {
    pub(crate) fn new(listener: SharedListener, token: CancellationToken) -> Self {
        Self {
            guard: TransitionGuard::new(),
            listener,
            token,
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Last status handed to the listener.
    pub(crate) fn last(&self) -> Option<&JobStatus> {
        self.guard.last()
    }

    /// Deliver `status` if it passes the guard. Returns `true` once tracking
    /// is over (terminal status delivered, or unsubscribed).
    pub(crate) fn deliver(&mut self, status: JobStatus) -> bool {
        if self.token.is_cancelled() {
            return true;
        }
        let status = status.following(self.guard.last());
        if self.guard.admit(&status) {
            debug!("channel: delivering {}", status.state());
            self.listener.on_status(&status);
        }
        self.guard.is_finished()
    }
}
