//! Job controller: one in-flight conversion job seen from the caller.
//!
//! ```text
//!            start()                       channel updates
//! idle ──────────────▶ tracking ───────────────────────────▶ terminal
//!   │  submit failed      │  cancel() accepted                 ▲
//!   └──▶ idle             └───────────────▶ failed(cancelled) ─┘
//! ```
//!
//! ## Cancellation
//!
//! Backends acknowledge a cancel request long before the job actually stops,
//! and some never report the cancellation at all. Once a cancel is accepted
//! the controller adopts `failed` ("Cancelled by user") locally and ignores
//! everything the channel says afterwards, so a cancelled job never
//! resurrects as `processing`, even if the backend later reports `completed`.
//!
//! ## Ordering
//!
//! Channel updates and the local cancellation go through one lock, and the
//! listener is invoked while it is held. A listener therefore never sees an
//! update after the terminal status, whichever side produced it. Listeners
//! must not call back into the controller synchronously.

use crate::backend::registry::BackendRegistry;
use crate::backend::{Capabilities, ConversionBackend, JobHandle};
use crate::channel::{open_channel, Subscription};
use crate::config::{BackendKind, TrackerConfig};
use crate::error::JobError;
use crate::progress::{SharedListener, StatusListener};
use crate::request::ConversionRequest;
use crate::status::JobStatus;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A boxed stream of the statuses relayed by a controller.
pub type StatusStream = Pin<Box<dyn Stream<Item = JobStatus> + Send>>;

/// Result of [`JobController::cancel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The backend accepted the request; the job is now `failed` (cancelled).
    Cancelled,
    /// Nothing to cancel: no job, already terminal, or the backend cannot
    /// cancel.
    NotCancellable,
    /// The backend declined or the request failed; the job keeps running.
    Rejected(String),
}

impl CancelOutcome {
    pub fn accepted(&self) -> bool {
        matches!(self, CancelOutcome::Cancelled)
    }
}

// ── Shared state ─────────────────────────────────────────────────────────

struct Inner {
    status: Option<JobStatus>,
    streams: Vec<mpsc::UnboundedSender<JobStatus>>,
}

/// State shared between the controller and its channel task.
struct ControllerShared {
    inner: Mutex<Inner>,
    listener: SharedListener,
    updates: watch::Sender<Option<JobStatus>>,
    detached: CancellationToken,
}

impl ControllerShared {
    /// Make `status` the local view and notify everyone, unless the local
    /// view is already terminal or the controller was disposed.
    fn adopt(&self, status: JobStatus) -> bool {
        let mut inner = self.inner.lock();
        if self.detached.is_cancelled() {
            return false;
        }
        if let Some(current) = &inner.status {
            if current.is_terminal() {
                debug!(
                    "controller: ignoring {} after local terminal {}",
                    status.state(),
                    current.state()
                );
                return false;
            }
        }

        self.listener.on_status(&status);
        inner.streams.retain(|tx| tx.send(status.clone()).is_ok());
        if status.is_terminal() {
            inner.streams.clear();
        }
        self.updates.send_replace(Some(status.clone()));
        inner.status = Some(status);
        true
    }

    /// Seed the local view without notifying the listener.
    fn seed(&self, status: JobStatus) {
        let mut inner = self.inner.lock();
        self.updates.send_replace(Some(status.clone()));
        inner.status = Some(status);
    }

    fn current(&self) -> Option<JobStatus> {
        self.inner.lock().status.clone()
    }
}

/// Listener the channel talks to; forwards into [`ControllerShared::adopt`].
struct Relay(Arc<ControllerShared>);

impl StatusListener for Relay {
    fn on_status(&self, status: &JobStatus) {
        self.0.adopt(status.clone());
    }
}

// ── Controller ───────────────────────────────────────────────────────────

/// Drives one conversion job: submit, track, cancel, dispose.
///
/// # Example
/// ```rust,no_run
/// use edgequake_docjob::{
///     BackendConfig, BackendKind, BackendRegistry, ConversionRequest, FileSource,
///     JobController, NoopStatusListener, TrackerConfig,
/// };
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = Arc::new(BackendRegistry::from_configs(&[BackendConfig::from_env(
///     BackendKind::Worker,
/// )])?);
/// let mut controller = JobController::new(
///     registry,
///     BackendKind::Worker,
///     TrackerConfig::default(),
///     Arc::new(NoopStatusListener),
/// );
/// let request = ConversionRequest::builder(FileSource::FileId("f-123".into())).build()?;
/// controller.start(&request).await?;
/// let status = controller.wait_terminal().await;
/// println!("{status:?}");
/// controller.dispose();
/// # Ok(())
/// # }
/// ```
pub struct JobController {
    registry: Arc<BackendRegistry>,
    kind: BackendKind,
    config: TrackerConfig,
    shared: Arc<ControllerShared>,
    backend: Option<Arc<dyn ConversionBackend>>,
    handle: Option<JobHandle>,
    subscription: Option<Subscription>,
    disposed: bool,
}

impl JobController {
    pub fn new(
        registry: Arc<BackendRegistry>,
        kind: BackendKind,
        config: TrackerConfig,
        listener: SharedListener,
    ) -> Self {
        let (updates, _) = watch::channel(None);
        Self {
            registry,
            kind,
            config,
            shared: Arc::new(ControllerShared {
                inner: Mutex::new(Inner {
                    status: None,
                    streams: Vec::new(),
                }),
                listener,
                updates,
                detached: CancellationToken::new(),
            }),
            backend: None,
            handle: None,
            subscription: None,
            disposed: false,
        }
    }

    /// Submit `request` and start tracking it.
    ///
    /// The progress channel is attached only once the backend returned a
    /// handle; a failed submission leaves the controller idle and can be
    /// retried.
    ///
    /// # Errors
    /// * [`JobError::Disposed`] / [`JobError::AlreadyStarted`]
    /// * [`JobError::UnknownBackend`] when the registry lacks the kind
    /// * the adapter's submission error, unchanged
    pub async fn start(&mut self, request: &ConversionRequest) -> Result<JobHandle, JobError> {
        if self.disposed {
            return Err(JobError::Disposed);
        }
        if self.handle.is_some() {
            return Err(JobError::AlreadyStarted);
        }

        let backend = self.registry.select(self.kind)?;
        let handle = backend.submit_job(request).await?;
        info!("controller: submitted {}", handle);

        self.shared.seed(JobStatus::pending());
        let channel = open_channel(Arc::clone(&backend), &self.config);
        let relay: SharedListener = Arc::new(Relay(Arc::clone(&self.shared)));
        self.subscription = Some(channel.subscribe(handle.clone(), relay));
        debug!("controller: tracking {} via {}", handle, channel.strategy());

        self.backend = Some(backend);
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Ask the backend to cancel the job.
    ///
    /// Never fails: "nothing to cancel" and refusals are reported through
    /// [`CancelOutcome`]. On acceptance the local status becomes
    /// [`JobStatus::cancelled`] immediately and tracking stops.
    pub async fn cancel(&self) -> CancelOutcome {
        let (Some(backend), Some(handle)) = (&self.backend, &self.handle) else {
            return CancelOutcome::NotCancellable;
        };
        if self.disposed || self.shared.current().is_some_and(|s| s.is_terminal()) {
            return CancelOutcome::NotCancellable;
        }
        if !backend.supports_cancellation() {
            debug!("controller: {} cannot cancel jobs", backend.name());
            return CancelOutcome::NotCancellable;
        }

        match backend.cancel_job(handle).await {
            Ok(true) => {
                if !self.shared.adopt(JobStatus::cancelled()) {
                    // A terminal status won the race while the request was in flight.
                    return CancelOutcome::NotCancellable;
                }
                if let Some(subscription) = &self.subscription {
                    subscription.unsubscribe();
                }
                info!("controller: cancelled {}", handle);
                CancelOutcome::Cancelled
            }
            Ok(false) => {
                warn!("controller: {} declined to cancel {}", backend.name(), handle);
                CancelOutcome::Rejected(format!("{} declined the cancellation", backend.name()))
            }
            Err(e) => {
                warn!("controller: cancel of {} failed: {}", handle, e);
                CancelOutcome::Rejected(e.to_string())
            }
        }
    }

    /// Stop tracking and release the handle. Idempotent.
    ///
    /// The last known status stays readable through [`status`](Self::status).
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.shared.detached.cancel();
        self.shared.inner.lock().streams.clear();
        if let Some(handle) = self.handle.take() {
            debug!("controller: released {}", handle);
        }
        self.backend = None;
    }

    /// Latest local view of the job; `None` before a successful start.
    pub fn status(&self) -> Option<JobStatus> {
        self.shared.current()
    }

    pub fn handle(&self) -> Option<&JobHandle> {
        self.handle.as_ref()
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Capabilities of the adapter this controller submits to.
    pub fn capabilities(&self) -> Result<Capabilities, JobError> {
        self.registry.capabilities(self.kind)
    }

    /// Wait for the terminal status.
    ///
    /// Returns `None` when no job was started or once the controller is
    /// disposed.
    pub async fn wait_terminal(&self) -> Option<JobStatus> {
        if self.disposed || self.handle.is_none() {
            return None;
        }
        let mut rx = self.shared.updates.subscribe();
        tokio::select! {
            _ = self.shared.detached.cancelled() => None,
            r = rx.wait_for(|s| s.as_ref().is_some_and(JobStatus::is_terminal)) => {
                r.ok().and_then(|s| (*s).clone())
            }
        }
    }

    /// Stream of every status the controller adopts from now on, starting
    /// with the current one. Ends after the terminal status or on dispose.
    pub fn status_stream(&self) -> StatusStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.shared.inner.lock();
        let mut open = !self.disposed;
        if let Some(current) = &inner.status {
            let _ = tx.send(current.clone());
            open &= !current.is_terminal();
        }
        if open {
            inner.streams.push(tx);
        }
        Box::pin(UnboundedReceiverStream::new(rx))
    }
}

impl std::fmt::Debug for JobController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobController")
            .field("kind", &self.kind)
            .field("handle", &self.handle)
            .field("status", &self.status().map(|s| s.state()))
            .field("disposed", &self.disposed)
            .finish()
    }
}
