//! HTTP plumbing shared by the provider adapters.
//!
//! Every adapter talks JSON over HTTP; this module owns the `reqwest`
//! client, bearer authentication, and the mapping from HTTP failures onto
//! the [`JobError`] taxonomy:
//!
//! | Situation | Error |
//! |-----------|-------|
//! | connect/read failure | [`JobError::Transport`] |
//! | request timeout | [`JobError::Timeout`] |
//! | 4xx on submission | [`JobError::Submission`] |
//! | 404 on a job endpoint | [`JobError::NotFound`] |
//! | undecodable body | [`JobError::Protocol`] |

use crate::config::BackendConfig;
use crate::error::JobError;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Configured HTTP client for one adapter.
#[derive(Debug, Clone)]
pub(crate) struct HttpClient {
    client: reqwest::Client,
    backend: &'static str,
    base: Url,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl HttpClient {
    pub(crate) fn new(backend: &'static str, config: &BackendConfig) -> Result<Self, JobError> {
        config.validate()?;
        // A trailing slash makes `Url::join` append instead of replace.
        let base = Url::parse(&format!("{}/", config.base_url)).map_err(|e| {
            JobError::InvalidConfig(format!("{backend} base URL '{}': {e}", config.base_url))
        })?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| JobError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            backend,
            base,
            api_key: config.api_key.clone(),
            timeout_secs: config.request_timeout.as_secs(),
        })
    }

    /// Resolve `path` (no leading slash) against the base URL.
    pub(crate) fn url(&self, path: &str) -> Result<Url, JobError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| JobError::Internal(format!("bad endpoint '{path}': {e}")))
    }

    pub(crate) fn get(&self, url: Url) -> RequestBuilder {
        self.authorise(self.client.get(url))
    }

    pub(crate) fn post(&self, url: Url) -> RequestBuilder {
        self.authorise(self.client.post(url))
    }

    fn authorise(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    /// Send a request, mapping network failures.
    pub(crate) async fn send(&self, req: RequestBuilder) -> Result<Response, JobError> {
        let response = req.send().await.map_err(|e| self.transport_error(e))?;
        debug!(
            "{} {} → {}",
            self.backend,
            response.url().path(),
            response.status()
        );
        Ok(response)
    }

    /// Decode a JSON body.
    pub(crate) async fn json<T: DeserializeOwned>(&self, response: Response) -> Result<T, JobError> {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;
        serde_json::from_slice(&bytes).map_err(|e| JobError::Protocol {
            backend: self.backend.to_string(),
            detail: format!("{e} in body {}", preview(&bytes)),
        })
    }

    pub(crate) fn transport_error(&self, e: reqwest::Error) -> JobError {
        if e.is_timeout() {
            JobError::Timeout {
                backend: self.backend.to_string(),
                secs: self.timeout_secs,
            }
        } else {
            JobError::Transport {
                backend: self.backend.to_string(),
                detail: e.to_string(),
            }
        }
    }

    /// Map a non-success answer to a submission endpoint.
    ///
    /// Client errors mean the request itself was rejected; anything else is a
    /// transport problem worth surfacing as such.
    pub(crate) async fn submission_error(&self, response: Response) -> JobError {
        let status = response.status();
        let detail = error_detail(response).await;
        if status.is_client_error()
            && status != StatusCode::UNAUTHORIZED
            && status != StatusCode::FORBIDDEN
            && status != StatusCode::TOO_MANY_REQUESTS
        {
            JobError::Submission {
                backend: self.backend.to_string(),
                reason: detail,
            }
        } else {
            JobError::Transport {
                backend: self.backend.to_string(),
                detail: format!("HTTP {status}: {detail}"),
            }
        }
    }

    /// Map a non-success answer to a job endpoint (`status`, `cancel`).
    pub(crate) async fn job_error(&self, response: Response, job_id: &str) -> JobError {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return JobError::NotFound {
                backend: self.backend.to_string(),
                job_id: job_id.to_string(),
            };
        }
        let detail = error_detail(response).await;
        JobError::Transport {
            backend: self.backend.to_string(),
            detail: format!("HTTP {status}: {detail}"),
        }
    }
}

/// Best-effort human-readable message from an error body.
///
/// FastAPI-style services answer `{"detail": "…"}`; others send `error` or
/// plain text.
async fn error_detail(response: Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let from_json = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| {
            ["detail", "error", "message"]
                .iter()
                .find_map(|k| v.get(k).and_then(|d| d.as_str()).map(str::to_string))
        });
    match from_json {
        Some(msg) => msg,
        None if !text.trim().is_empty() => text.trim().chars().take(200).collect(),
        None => format!("HTTP {status}"),
    }
}

fn preview(bytes: &[u8]) -> String {
    let s = String::from_utf8_lossy(bytes);
    if s.chars().count() > 120 {
        format!("{:?}…", s.chars().take(119).collect::<String>())
    } else {
        format!("{s:?}")
    }
}

/// Turn a file id into a downloadable URL for hosted backends.
pub(crate) fn file_id_url(
    backend: &'static str,
    file_url_base: Option<&str>,
    file_id: &str,
) -> Result<String, JobError> {
    match file_url_base {
        Some(base) => Ok(format!("{base}/{file_id}")),
        None => Err(JobError::Submission {
            backend: backend.to_string(),
            reason: "this backend downloads the document itself; configure a file URL base \
                     (DOCJOB_FILE_URL_BASE) or pass a URL instead of a file id"
                .into(),
        }),
    }
}
