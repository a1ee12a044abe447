//! One-shot conversion entry points.
//!
//! ## When to use
//!
//! Most callers only want "submit, wait, give me the result". These helpers
//! drive a [`JobController`] to completion and turn a `failed` status back
//! into an error. Use the controller directly when you need cancellation,
//! partial HTML or a live status stream.

use crate::backend::registry::BackendRegistry;
use crate::config::{BackendKind, TrackerConfig};
use crate::controller::JobController;
use crate::error::JobError;
use crate::output::{save_result, SavedResult};
use crate::progress::{NoopStatusListener, SharedListener};
use crate::request::ConversionRequest;
use crate::status::{ConversionResult, FailureKind};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Convert a document on the `kind` backend and wait for the result.
///
/// # Errors
/// * submission errors, as returned by [`JobController::start`]
/// * [`JobError::JobFailed`] when the job ends `failed` (including a
///   not-found handle or lost connection while tracking)
pub async fn convert(
    registry: Arc<BackendRegistry>,
    kind: BackendKind,
    request: &ConversionRequest,
    config: &TrackerConfig,
) -> Result<ConversionResult, JobError> {
    convert_with_listener(registry, kind, request, config, Arc::new(NoopStatusListener)).await
}

/// [`convert`], reporting every status transition to `listener`.
pub async fn convert_with_listener(
    registry: Arc<BackendRegistry>,
    kind: BackendKind,
    request: &ConversionRequest,
    config: &TrackerConfig,
    listener: SharedListener,
) -> Result<ConversionResult, JobError> {
    let started = Instant::now();
    let mut controller = JobController::new(registry, kind, config.clone(), listener);
    let handle = controller.start(request).await?;

    let status = controller.wait_terminal().await;
    controller.dispose();
    let status = status.ok_or_else(|| JobError::Internal(format!("tracking of {handle} ended early")))?;

    if let Some(result) = status.result() {
        info!(
            "Converted {} in {:.1}s ({} chars)",
            handle,
            started.elapsed().as_secs_f64(),
            result.content.len()
        );
        return Ok(result.clone());
    }
    let (kind, reason) = match status.failure() {
        Some(f) => (f.kind, f.reason.clone()),
        None => (FailureKind::Backend, "job ended without a result".to_string()),
    };
    Err(JobError::JobFailed { kind, reason })
}

/// Convert and persist every produced format under `dir`.
///
/// See [`save_result`] for the file layout.
pub async fn convert_to_dir(
    registry: Arc<BackendRegistry>,
    kind: BackendKind,
    request: &ConversionRequest,
    config: &TrackerConfig,
    dir: impl AsRef<Path>,
) -> Result<SavedResult, JobError> {
    let result = convert(registry, kind, request, config).await?;
    save_result(&result, dir.as_ref()).await
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    registry: Arc<BackendRegistry>,
    kind: BackendKind,
    request: &ConversionRequest,
    config: &TrackerConfig,
) -> Result<ConversionResult, JobError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| JobError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(registry, kind, request, config))
}
