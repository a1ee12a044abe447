//! Adapter for a Runpod serverless endpoint.
//!
//! Runpod queues jobs behind its own API. Status is polled; cancellation is
//! a separate call. Every request carries the endpoint's bearer token.
//!
//! ```text
//! POST /run          {"input": {"file_url", "output_format", "use_llm", "page_range"}}
//!                    → {"id", "status"}
//! GET  /status/{id}  → {"id", "status", "output"?, "error"?}
//! POST /cancel/{id}  → {"id", "status": "CANCELLED"}
//! ```
//!
//! | Runpod status | Job state |
//! |---------------|-----------|
//! | `IN_QUEUE` | pending |
//! | `IN_PROGRESS` | processing |
//! | `COMPLETED` | completed (or failed when `output.error` is set) |
//! | `FAILED` / `TIMED_OUT` | failed |
//! | `CANCELLED` | failed, cancelled |

use super::http::{file_id_url, HttpClient};
use super::modal::completed_output;
use super::{check_formats, ConversionBackend, JobHandle};
use crate::config::BackendConfig;
use crate::error::JobError;
use crate::request::{ConversionRequest, FileSource, OutputFormat};
use crate::status::{FailureKind, JobStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

const NAME: &str = "runpod";

const FORMATS: &[OutputFormat] = &[OutputFormat::Html, OutputFormat::Markdown, OutputFormat::Json];

/// Runpod serverless adapter.
#[derive(Debug, Clone)]
pub struct RunpodBackend {
    http: HttpClient,
    file_url_base: Option<String>,
}

#[derive(Debug, Serialize)]
struct RunRequest<'a> {
    input: RunInput<'a>,
}

#[derive(Debug, Serialize)]
struct RunInput<'a> {
    file_url: &'a str,
    output_format: &'a str,
    use_llm: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_range: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    #[serde(default)]
    status: Option<String>,
}

impl RunpodBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, JobError> {
        Ok(Self {
            http: HttpClient::new(NAME, config)?,
            file_url_base: config.file_url_base.clone(),
        })
    }

    fn file_url(&self, file: &FileSource) -> Result<String, JobError> {
        match file {
            FileSource::Url(url) => Ok(url.clone()),
            FileSource::FileId(id) => file_id_url(NAME, self.file_url_base.as_deref(), id),
            FileSource::Inline { filename, .. } => Err(JobError::Submission {
                backend: NAME.into(),
                reason: format!(
                    "inline upload of '{filename}' is not supported; upload the file and pass its URL"
                ),
            }),
        }
    }
}

fn into_status(body: StatusBody) -> Result<JobStatus, JobError> {
    let error_text = || match &body.error {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    match body.status.as_str() {
        "IN_QUEUE" => Ok(JobStatus::pending()),
        "IN_PROGRESS" => Ok(JobStatus::processing(None)),
        "COMPLETED" => completed_output(body.output.clone(), NAME),
        "FAILED" => Ok(JobStatus::failed(FailureKind::Backend, error_text())),
        "TIMED_OUT" => Ok(JobStatus::failed(
            FailureKind::Backend,
            "job exceeded the endpoint execution timeout",
        )),
        "CANCELLED" => Ok(JobStatus::cancelled()),
        other => Err(JobError::Protocol {
            backend: NAME.into(),
            detail: format!("unknown job status '{other}'"),
        }),
    }
}

#[async_trait]
impl ConversionBackend for RunpodBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn supported_formats(&self) -> &[OutputFormat] {
        FORMATS
    }

    async fn submit_job(&self, request: &ConversionRequest) -> Result<JobHandle, JobError> {
        check_formats(self, request)?;
        let file_url = self.file_url(request.file())?;
        let options = request.options();
        let body = RunRequest {
            input: RunInput {
                file_url: &file_url,
                output_format: request.primary_format().as_str(),
                use_llm: options.use_llm,
                page_range: (!options.page_range.is_all()).then(|| options.page_range.as_str()),
            },
        };

        let response = self
            .http
            .send(self.http.post(self.http.url("run")?).json(&body))
            .await?;
        if !response.status().is_success() {
            return Err(self.http.submission_error(response).await);
        }
        let run: RunResponse = self.http.json(response).await?;
        info!("runpod: queued job {}", run.id);
        Ok(JobHandle::new(NAME, run.id))
    }

    async fn get_job_status(&self, handle: &JobHandle) -> Result<JobStatus, JobError> {
        let url = self.http.url(&format!("status/{}", handle.id()))?;
        let response = self.http.send(self.http.get(url)).await?;
        if !response.status().is_success() {
            return Err(self.http.job_error(response, handle.id()).await);
        }
        let body: StatusBody = self.http.json(response).await?;
        into_status(body)
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    fn supports_cancellation(&self) -> bool {
        true
    }

    async fn cancel_job(&self, handle: &JobHandle) -> Result<bool, JobError> {
        let url = self.http.url(&format!("cancel/{}", handle.id()))?;
        let response = self.http.send(self.http.post(url)).await?;
        if !response.status().is_success() {
            return Err(self.http.job_error(response, handle.id()).await);
        }
        let body: CancelResponse = self.http.json(response).await?;
        // Runpod echoes the job's status after the cancel request.
        let accepted = body.status.as_deref() == Some("CANCELLED");
        info!("runpod: cancel {} accepted={}", handle, accepted);
        Ok(accepted)
    }
}
