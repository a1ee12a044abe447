//! Configuration for job tracking and backend adapters.
//!
//! Two independent knobs sets:
//!
//! * [`TrackerConfig`]: how progress is delivered: poll interval, request
//!   and connect timeouts, retry budget, streaming preference and the
//!   largest event accepted from a stream.
//!   Built via [`TrackerConfigBuilder`] so callers only set what they care
//!   about.
//! * [`BackendConfig`]: where one provider lives and how to authenticate.
//!   One per [`BackendKind`]; usually read from the environment.

use crate::error::JobError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ── Tracker configuration ────────────────────────────────────────────────

/// Timing and transport policy for progress channels.
///
/// # Example
/// ```rust
/// use edgequake_docjob::TrackerConfig;
/// use std::time::Duration;
///
/// let config = TrackerConfig::builder()
///     .poll_interval(Duration::from_millis(500))
///     .max_transport_retries(3)
///     .prefer_streaming(false)
///     .build()
///     .unwrap();
/// assert_eq!(config.poll_delay(0), Duration::from_millis(500));
/// ```
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Delay between two status polls when the backend answers. Default: 1 s.
    pub poll_interval: Duration,

    /// Timeout for a single status poll. Default: 30 s.
    ///
    /// A poll that times out counts as one transient transport failure; it
    /// does not fail the job on its own.
    pub request_timeout: Duration,

    /// Timeout for opening the event stream. Default: 10 s.
    ///
    /// When the initial connect fails or times out the channel falls back to
    /// polling instead of failing the job.
    pub connect_timeout: Duration,

    /// Consecutive transport failures tolerated while polling. Default: 5.
    ///
    /// One more failure past this budget ends tracking with a `failed`
    /// status of kind `connection`.
    pub max_transport_retries: u32,

    /// Upper bound for the backoff delay between failing polls. Default: 30 s.
    pub max_backoff: Duration,

    /// Use the event stream when the backend offers one. Default: true.
    pub prefer_streaming: bool,

    /// Largest single event-stream line accepted, in bytes. Default: 256 MiB.
    ///
    /// A `completed` event carries the whole result on one line. When a line
    /// passes this limit the channel asks the backend for the job status once
    /// instead of reading the event.
    pub max_event_size: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_transport_retries: 5,
            max_backoff: Duration::from_secs(30),
            prefer_streaming: true,
            max_event_size: sse_decode::DEFAULT_MAX_LINE,
        }
    }
}

impl TrackerConfig {
    /// Create a new builder for `TrackerConfig`.
    pub fn builder() -> TrackerConfigBuilder {
        TrackerConfigBuilder {
            config: Self::default(),
        }
    }

    /// Delay before the next poll after `consecutive_failures` failed polls.
    ///
    /// `poll_interval × 2ⁿ`, capped at `max_backoff` (and never below the
    /// plain interval).
    pub fn poll_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return self.poll_interval;
        }
        let factor = 2u32.saturating_pow(consecutive_failures.min(16));
        self.poll_interval
            .saturating_mul(factor)
            .min(self.max_backoff)
            .max(self.poll_interval)
    }
}

/// Builder for [`TrackerConfig`].
#[derive(Debug)]
pub struct TrackerConfigBuilder {
    config: TrackerConfig,
}

impl TrackerConfigBuilder {
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn max_transport_retries(mut self, n: u32) -> Self {
        self.config.max_transport_retries = n.min(100);
        self
    }

    pub fn max_backoff(mut self, max: Duration) -> Self {
        self.config.max_backoff = max;
        self
    }

    pub fn prefer_streaming(mut self, v: bool) -> Self {
        self.config.prefer_streaming = v;
        self
    }

    pub fn max_event_size(mut self, bytes: usize) -> Self {
        self.config.max_event_size = bytes;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<TrackerConfig, JobError> {
        let c = &self.config;
        if c.poll_interval.is_zero() {
            return Err(JobError::InvalidConfig(
                "poll interval must be greater than zero".into(),
            ));
        }
        if c.request_timeout.is_zero() || c.connect_timeout.is_zero() {
            return Err(JobError::InvalidConfig(
                "timeouts must be greater than zero".into(),
            ));
        }
        if c.max_event_size == 0 {
            return Err(JobError::InvalidConfig(
                "max event size must be greater than zero".into(),
            ));
        }
        if c.max_backoff < c.poll_interval {
            return Err(JobError::InvalidConfig(format!(
                "max backoff ({:?}) must be >= poll interval ({:?})",
                c.max_backoff, c.poll_interval
            )));
        }
        Ok(self.config)
    }
}

// ── Backend configuration ────────────────────────────────────────────────

/// The interchangeable conversion providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Self-hosted worker with job API, SSE stream and cancellation.
    Worker,
    /// Modal function-call API (poll only).
    Modal,
    /// Runpod serverless endpoint (poll + cancel).
    Runpod,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Worker, BackendKind::Modal, BackendKind::Runpod];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Worker => "worker",
            BackendKind::Modal => "modal",
            BackendKind::Runpod => "runpod",
        }
    }

    /// Environment variable holding the base URL for this backend.
    pub fn url_env_var(self) -> &'static str {
        match self {
            BackendKind::Worker => "DOCJOB_WORKER_URL",
            BackendKind::Modal => "DOCJOB_MODAL_URL",
            BackendKind::Runpod => "DOCJOB_RUNPOD_URL",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "worker" | "local" => Ok(BackendKind::Worker),
            "modal" => Ok(BackendKind::Modal),
            "runpod" => Ok(BackendKind::Runpod),
            other => Err(JobError::UnknownBackend {
                kind: other.to_string(),
            }),
        }
    }
}

/// Connection settings for one backend adapter.
#[derive(Clone)]
pub struct BackendConfig {
    pub kind: BackendKind,

    /// Base URL of the provider API, without trailing slash.
    pub base_url: String,

    /// Bearer token, when the provider requires one.
    pub api_key: Option<String>,

    /// Base URL under which uploaded files are downloadable, used to turn a
    /// file id into a URL for hosted backends (`{file_url_base}/{file_id}`).
    pub file_url_base: Option<String>,

    /// Per-request HTTP timeout. Default: 60 s.
    pub request_timeout: Duration,
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("file_url_base", &self.file_url_base)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl BackendConfig {
    /// Settings for `kind` at `base_url`, with defaults for the rest.
    pub fn new(kind: BackendKind, base_url: impl Into<String>) -> Self {
        Self {
            kind,
            base_url: trim_base(base_url.into()),
            api_key: None,
            file_url_base: None,
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = trim_base(url.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_file_url_base(mut self, base: impl Into<String>) -> Self {
        self.file_url_base = Some(trim_base(base.into()));
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Read settings for `kind` from the environment.
    ///
    /// | Variable | Used for |
    /// |----------|----------|
    /// | `DOCJOB_WORKER_URL` / `DOCJOB_MODAL_URL` / `DOCJOB_RUNPOD_URL` | base URL |
    /// | `RUNPOD_API_KEY` (runpod) or `DOCJOB_API_KEY` | bearer token |
    /// | `DOCJOB_FILE_URL_BASE` | file id → URL resolution |
    ///
    /// The worker defaults to `http://localhost:8000` when unset; hosted
    /// backends are left without a base URL. Nothing is validated here so
    /// callers can layer overrides on top; adapters call
    /// [`validate`](Self::validate) when they are built.
    pub fn from_env(kind: BackendKind) -> Self {
        let base_url = match (env_non_empty(kind.url_env_var()), kind) {
            (Some(url), _) => url,
            (None, BackendKind::Worker) => "http://localhost:8000".to_string(),
            (None, _) => String::new(),
        };

        let mut config = Self::new(kind, base_url);
        config.api_key = match kind {
            BackendKind::Runpod => {
                env_non_empty("RUNPOD_API_KEY").or_else(|| env_non_empty("DOCJOB_API_KEY"))
            }
            _ => env_non_empty("DOCJOB_API_KEY"),
        };
        config.file_url_base = env_non_empty("DOCJOB_FILE_URL_BASE").map(trim_base);
        config
    }

    /// Check the URL shape and required credentials.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.base_url.is_empty() {
            return Err(JobError::InvalidConfig(format!(
                "no base URL for the {} backend; set {}",
                self.kind,
                self.kind.url_env_var()
            )));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(JobError::InvalidConfig(format!(
                "{} base URL '{}' must start with http:// or https://",
                self.kind, self.base_url
            )));
        }
        if self.kind == BackendKind::Runpod && self.api_key.is_none() {
            return Err(JobError::InvalidConfig(
                "the runpod backend requires an API key (RUNPOD_API_KEY)".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(JobError::InvalidConfig(
                "request timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
