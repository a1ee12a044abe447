//! Polling strategy: ask the backend for a snapshot on an interval.
//!
//! ## Failure policy
//!
//! A failed or timed-out poll is transient. After `n` consecutive failures
//! the next poll waits `poll_interval × 2ⁿ`, capped at `max_backoff`
//! ([`TrackerConfig::poll_delay`]); one successful poll resets `n`. Once
//! `n` exceeds `max_transport_retries` the channel gives up with a terminal
//! `failed` status of kind `connection`.
//!
//! A [`JobError::NotFound`] is never retried: the backend forgot the handle,
//! so the job ends as `failed` with kind `not found`.

use super::{ProgressChannel, StatusGate, Subscription};
use crate::backend::{ConversionBackend, JobHandle};
use crate::config::TrackerConfig;
use crate::error::JobError;
use crate::progress::SharedListener;
use crate::status::{FailureKind, JobStatus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Progress channel backed by repeated `get_job_status` calls.
pub struct PollingChannel {
    backend: Arc<dyn ConversionBackend>,
    config: TrackerConfig,
}

impl PollingChannel {
    pub fn new(backend: Arc<dyn ConversionBackend>, config: TrackerConfig) -> Self {
        Self { backend, config }
    }
}

impl ProgressChannel for PollingChannel {
    fn subscribe(&self, handle: JobHandle, listener: SharedListener) -> Subscription {
        let token = CancellationToken::new();
        let gate = StatusGate::new(listener, token.clone());
        let task = tokio::spawn(poll_until_terminal(
            Arc::clone(&self.backend),
            handle,
            self.config.clone(),
            gate,
        ));
        Subscription::new(token, task)
    }

    fn strategy(&self) -> &'static str {
        "poll"
    }
}

/// Poll `handle` until a terminal status is delivered or the gate's token
/// is cancelled. Also the fallback path of the streaming channel.
pub(crate) async fn poll_until_terminal(
    backend: Arc<dyn ConversionBackend>,
    handle: JobHandle,
    config: TrackerConfig,
    mut gate: StatusGate,
) {
    let token = gate.token().clone();
    let mut failures: u32 = 0;
    info!(
        "poll: tracking {} every {:?}",
        handle, config.poll_interval
    );

    loop {
        let outcome = tokio::select! {
            _ = token.cancelled() => return,
            r = tokio::time::timeout(config.request_timeout, backend.get_job_status(&handle)) => r,
        };

        let last_error = match outcome {
            Ok(Ok(status)) => {
                failures = 0;
                if gate.deliver(status) {
                    debug!("poll: {} finished", handle);
                    return;
                }
                None
            }
            Ok(Err(JobError::NotFound { .. })) => {
                warn!("poll: {} is unknown to the backend", handle);
                gate.deliver(JobStatus::failed(
                    FailureKind::NotFound,
                    format!("job {handle} was not found on the backend (expired or unknown handle)"),
                ));
                return;
            }
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "status request timed out after {}s",
                config.request_timeout.as_secs_f64()
            )),
        };

        if let Some(error) = last_error {
            failures += 1;
            if failures > config.max_transport_retries {
                warn!("poll: giving up on {} after {} failures", handle, failures);
                gate.deliver(JobStatus::failed(
                    FailureKind::Connection,
                    format!("lost contact with the {} backend: {error}", handle.backend()),
                ));
                return;
            }
            warn!(
                "poll: {} attempt failed ({}/{}): {}",
                handle, failures, config.max_transport_retries, error
            );
        }

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(config.poll_delay(failures)) => {}
        }
    }
}
