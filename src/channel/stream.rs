//! Streaming strategy: follow the backend's event stream.
//!
//! ```text
//! event: progress     data: {"stage": "ocr", "current": 1, "total": 3}
//! event: html_ready   data: {"content": "<html>…"}
//! event: completed    data: {"content": "…", "formats": {…}, …}
//! event: failed       data: "reason"
//! event: error        data: {"error": "Job not found"}
//! event: ping         data: {}
//! ```
//!
//! * A failed initial connect (error, timeout, non-2xx) falls back to
//!   polling instead of failing the job.
//! * Once connected, a dropped stream before `completed`/`failed` ends the
//!   job as `failed` (kind `connection`). There is no automatic reconnect;
//!   the caller decides whether to track again by polling.
//! * A line longer than [`TrackerConfig::max_event_size`] (typically a
//!   `completed` event with a large inline result) closes the stream and
//!   switches to polling, whose first request fetches the status directly.
//! * The connection is closed as soon as a terminal event is delivered.

use super::poll::poll_until_terminal;
use super::{ProgressChannel, StatusGate, Subscription};
use crate::backend::{ConversionBackend, JobHandle};
use crate::config::TrackerConfig;
use crate::progress::SharedListener;
use crate::status::{FailureKind, JobState, JobStatus};
use crate::wire;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use sse_decode::{SseDecoder, SseError, SseEvent};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Progress channel backed by a server-sent event stream.
pub struct StreamingChannel {
    backend: Arc<dyn ConversionBackend>,
    config: TrackerConfig,
    client: reqwest::Client,
}

impl StreamingChannel {
    pub fn new(backend: Arc<dyn ConversionBackend>, config: TrackerConfig) -> Self {
        Self {
            backend,
            config,
            // No overall timeout: the stream lives as long as the job.
            client: reqwest::Client::new(),
        }
    }
}

impl ProgressChannel for StreamingChannel {
    fn subscribe(&self, handle: JobHandle, listener: SharedListener) -> Subscription {
        let token = CancellationToken::new();
        let gate = StatusGate::new(listener, token.clone());
        let task = tokio::spawn(follow_stream(
            Arc::clone(&self.backend),
            self.client.clone(),
            handle,
            self.config.clone(),
            gate,
        ));
        Subscription::new(token, task)
    }

    fn strategy(&self) -> &'static str {
        "stream"
    }
}

async fn follow_stream(
    backend: Arc<dyn ConversionBackend>,
    client: reqwest::Client,
    handle: JobHandle,
    config: TrackerConfig,
    mut gate: StatusGate,
) {
    let token = gate.token().clone();

    let Some(url) = backend.stream_url(&handle) else {
        warn!("stream: {} has no stream URL, polling instead", handle);
        return poll_until_terminal(backend, handle, config, gate).await;
    };

    let connect = client
        .get(url.clone())
        .header(ACCEPT, "text/event-stream")
        .send();
    let connected = tokio::select! {
        _ = token.cancelled() => return,
        r = tokio::time::timeout(config.connect_timeout, connect) => r,
    };
    let response = match connected {
        Ok(Ok(r)) if r.status().is_success() => r,
        Ok(Ok(r)) => {
            warn!("stream: {} answered {}, polling instead", url, r.status());
            return poll_until_terminal(backend, handle, config, gate).await;
        }
        Ok(Err(e)) => {
            warn!("stream: connect to {} failed ({}), polling instead", url, e);
            return poll_until_terminal(backend, handle, config, gate).await;
        }
        Err(_) => {
            warn!(
                "stream: connect to {} timed out after {:?}, polling instead",
                url, config.connect_timeout
            );
            return poll_until_terminal(backend, handle, config, gate).await;
        }
    };

    info!("stream: following {}", handle);
    let mut body = Box::pin(response.bytes_stream());
    let mut decoder = SseDecoder::with_max_line(config.max_event_size);

    loop {
        let next = tokio::select! {
            _ = token.cancelled() => {
                debug!("stream: {} unsubscribed, closing connection", handle);
                return;
            }
            next = body.next() => next,
        };

        let reason = match next {
            Some(Ok(chunk)) => {
                let (events, oversized) = match decoder.feed(&chunk) {
                    Ok(events) => (events, None),
                    Err(SseError::LineTooLong { limit, decoded }) => (decoded, Some(limit)),
                };
                for event in events {
                    let current = gate.last().cloned().unwrap_or_else(JobStatus::pending);
                    if let Some(status) = apply_event(&current, &event) {
                        if gate.deliver(status) {
                            debug!("stream: {} finished, closing connection", handle);
                            return;
                        }
                    }
                }
                if let Some(limit) = oversized {
                    warn!(
                        "stream: {} sent an event over {} bytes, fetching the status instead",
                        handle, limit
                    );
                    drop(body);
                    return poll_until_terminal(backend, handle, config, gate).await;
                }
                continue;
            }
            Some(Err(e)) => format!("event stream dropped: {e}"),
            None => "event stream closed before the job finished".to_string(),
        };

        warn!("stream: {}: {}", handle, reason);
        gate.deliver(JobStatus::failed(FailureKind::Connection, reason));
        return;
    }
}

/// Fold one event into the current view of the job.
///
/// Returns `None` for events that carry no status change (keep-alives,
/// unknown names, undecodable partial payloads).
fn apply_event(current: &JobStatus, event: &SseEvent) -> Option<JobStatus> {
    match event.event.as_str() {
        "progress" => {
            let progress = serde_json::from_str(&event.data)
                .ok()
                .and_then(wire::decode_progress);
            match (current.state(), current.html_content()) {
                (JobState::HtmlReady, Some(html)) => Some(JobStatus::html_ready(html, progress)),
                _ => Some(JobStatus::processing(progress)),
            }
        }
        "html_ready" => match wire::decode_html_ready(&event.data) {
            Ok(html) => Some(JobStatus::html_ready(html, current.progress().cloned())),
            Err(e) => {
                warn!("stream: ignoring html_ready event: {}", e);
                None
            }
        },
        "completed" => {
            let status = serde_json::from_str(&event.data)
                .map_err(|e| e.to_string())
                .and_then(|v| wire::decode_result(v, "stream").map_err(|e| e.to_string()));
            Some(match status {
                Ok(result) => JobStatus::completed(result).carrying_html(current.html_content()),
                Err(e) => JobStatus::failed(
                    FailureKind::Backend,
                    format!("job completed but its result could not be read: {e}"),
                ),
            })
        }
        "failed" => {
            let reason = wire::decode_failure_reason(&event.data);
            Some(JobStatus::failed(wire::classify_failure(&reason), reason))
        }
        "error" => {
            let reason = wire::decode_failure_reason(&event.data);
            let kind = if reason.to_ascii_lowercase().contains("not found") {
                FailureKind::NotFound
            } else {
                FailureKind::Connection
            };
            Some(JobStatus::failed(kind, reason))
        }
        other => {
            debug!("stream: ignoring '{}' event", other);
            None
        }
    }
}
