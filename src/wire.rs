//! Wire payloads shared by the status endpoint and the event stream.
//!
//! The event stream names its events `progress`, `html_ready`, `completed`
//! and `failed`; the status endpoint returns the same shapes inside one JSON
//! object. Both transports decode through here so a progress payload means
//! the same thing whichever way it arrived.
//!
//! ```text
//! progress    {"stage": "Recognizing text", "current": 3, "total": 12, "elapsed": 4.2}
//! html_ready  {"content": "<html>…"}
//! completed   {"content": "…", "metadata": {…}, "formats": {…}, "images": {…}}
//! failed      "reason"  |  {"error": "reason"}  |  reason
//! ```

use crate::error::JobError;
use crate::status::{ConversionResult, FailureKind, Progress, CANCELLED_BY_USER};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct ProgressPayload {
    #[serde(default)]
    stage: Option<String>,
    current: i64,
    total: i64,
    #[serde(default)]
    elapsed: Option<f64>,
}

/// Decode a progress payload, dropping it (with a warning) when the counters
/// violate the status model.
pub(crate) fn decode_progress(value: Value) -> Option<Progress> {
    let payload: ProgressPayload = match serde_json::from_value(value) {
        Ok(p) => p,
        Err(e) => {
            warn!("Ignoring malformed progress payload: {}", e);
            return None;
        }
    };
    let stage = payload.stage.unwrap_or_else(|| "Processing".to_string());
    match Progress::new(stage, payload.current, payload.total) {
        Ok(p) => Some(match payload.elapsed {
            Some(secs) => p.with_elapsed(secs),
            None => p,
        }),
        Err(e) => {
            warn!("Ignoring out-of-range progress: {}", e);
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct HtmlReadyPayload {
    content: String,
}

/// Decode the `html_ready` payload into the partial HTML.
pub(crate) fn decode_html_ready(data: &str) -> Result<String, JobError> {
    serde_json::from_str::<HtmlReadyPayload>(data)
        .map(|p| p.content)
        .map_err(|e| JobError::Protocol {
            backend: "stream".into(),
            detail: format!("html_ready payload: {e}"),
        })
}

/// Decode a completed-job payload.
///
/// Some workers leave `content` empty and only fill `formats`; the primary
/// content then falls back to HTML, then Markdown.
pub(crate) fn decode_result(value: Value, backend: &str) -> Result<ConversionResult, JobError> {
    let mut result: ConversionResult =
        serde_json::from_value(value).map_err(|e| JobError::Protocol {
            backend: backend.to_string(),
            detail: format!("result payload: {e}"),
        })?;
    if result.content.is_empty() {
        if let Some(fallback) = result
            .formats
            .html
            .as_ref()
            .or(result.formats.markdown.as_ref())
        {
            result.content = fallback.clone();
        }
    }
    Ok(result)
}

/// Extract a human-readable reason from a `failed` payload.
///
/// Accepts a JSON string, an object with an `error` (or `message`) field, or
/// plain text.
pub(crate) fn decode_failure_reason(data: &str) -> String {
    let reason = match serde_json::from_str::<Value>(data) {
        Ok(Value::String(s)) => s,
        Ok(Value::Object(map)) => map
            .get("error")
            .or_else(|| map.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| data.to_string()),
        _ => data.to_string(),
    };
    let reason = reason.trim().to_string();
    if reason.is_empty() {
        "Unknown error".to_string()
    } else {
        reason
    }
}

/// Classify a backend-reported failure reason.
///
/// Workers mark cancelled jobs as `failed` with the reason
/// `"Cancelled by user"`; those are reported as cancellations.
pub(crate) fn classify_failure(reason: &str) -> FailureKind {
    if reason.eq_ignore_ascii_case(CANCELLED_BY_USER) {
        FailureKind::Cancelled
    } else {
        FailureKind::Backend
    }
}
