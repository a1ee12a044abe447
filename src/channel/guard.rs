//! Ordering filter applied to every status before it reaches a listener.

use crate::status::JobStatus;
use tracing::debug;

/// Admits only forward-moving, non-redundant statuses.
///
/// * rank never decreases (`html_ready` is not followed by `processing`);
/// * an observation equal to the previous one is dropped
///   ([`JobStatus::same_observation`]);
/// * after the first terminal status nothing else is admitted.
#[derive(Debug, Default)]
pub struct TransitionGuard {
    last: Option<JobStatus>,
    finished: bool,
}

impl TransitionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `status` should be delivered. Admitted statuses become the new
    /// reference for the next comparison.
    pub fn admit(&mut self, status: &JobStatus) -> bool {
        if self.finished {
            debug!("guard: dropping {} after terminal status", status.state());
            return false;
        }
        if let Some(last) = &self.last {
            if status.state().rank() < last.state().rank() {
                debug!(
                    "guard: dropping backwards transition {} → {}",
                    last.state(),
                    status.state()
                );
                return false;
            }
            if status.same_observation(last) {
                return false;
            }
        }
        self.finished = status.is_terminal();
        self.last = Some(status.clone());
        true
    }

    /// A terminal status has been admitted.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Last admitted status.
    pub fn last(&self) -> Option<&JobStatus> {
        self.last.as_ref()
    }
}
