//! Adapter for conversion functions deployed on Modal.
//!
//! A Modal deployment exposes a thin FastAPI shim over a spawned function
//! call. There is no event stream and no cancellation: the handle is polled
//! until the function call resolves.
//!
//! ```text
//! POST /run          {"file_url", "use_llm", "page_range"}   → {"id"}
//! GET  /status/{id}  → {"status": "IN_PROGRESS"}
//!                    | {"status": "COMPLETED", "output": {…}}
//!                    | {"status": "FAILED", "error": "expired" | reason}
//! ```
//!
//! An `"expired"` error means Modal dropped the call's output; the handle
//! no longer refers to anything and is reported as [`JobError::NotFound`].

use super::http::{file_id_url, HttpClient};
use super::{check_formats, ConversionBackend, JobHandle};
use crate::config::BackendConfig;
use crate::error::JobError;
use crate::request::{ConversionRequest, FileSource, OutputFormat};
use crate::status::{FailureKind, JobStatus};
use crate::wire;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

const NAME: &str = "modal";

const FORMATS: &[OutputFormat] = &[OutputFormat::Html, OutputFormat::Markdown, OutputFormat::Chunks];

/// Modal function-call adapter.
#[derive(Debug, Clone)]
pub struct ModalBackend {
    http: HttpClient,
    file_url_base: Option<String>,
}

#[derive(Debug, Serialize)]
struct RunRequest<'a> {
    file_url: &'a str,
    use_llm: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_range: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    #[serde(alias = "call_id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl ModalBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, JobError> {
        Ok(Self {
            http: HttpClient::new(NAME, config)?,
            file_url_base: config.file_url_base.clone(),
        })
    }

    /// Modal downloads the document itself, so every source must be a URL.
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

fn into_status(body: StatusBody, job_id: &str) -> Result<JobStatus, JobError> {
    match body.status.to_ascii_uppercase().as_str() {
        "PENDING" | "IN_QUEUE" => Ok(JobStatus::pending()),
        "IN_PROGRESS" => Ok(JobStatus::processing(None)),
        "COMPLETED" => completed_output(body.output, NAME),
        "FAILED" => {
            let reason = body.error.unwrap_or_default();
            if reason.eq_ignore_ascii_case("expired") {
                return Err(JobError::NotFound {
                    backend: NAME.into(),
                    job_id: job_id.to_string(),
                });
            }
            Ok(JobStatus::failed(wire::classify_failure(&reason), reason))
        }
        other => Err(JobError::Protocol {
            backend: NAME.into(),
            detail: format!("unknown call status '{other}'"),
        }),
    }
}

/// Decode the output of a finished hosted call.
///
/// Serverless handlers report their own failures inside a successful call as
/// `{"error": "…"}`; that is a backend failure, not a result.
pub(super) fn completed_output(output: Option<Value>, backend: &str) -> Result<JobStatus, JobError> {
    let output = output.ok_or_else(|| JobError::Protocol {
        backend: backend.to_string(),
        detail: "call is completed but returned no output".into(),
    })?;
    if let Some(reason) = output.get("error").and_then(Value::as_str) {
        return Ok(JobStatus::failed(FailureKind::Backend, reason));
    }
    Ok(JobStatus::completed(wire::decode_result(output, backend)?))
}

#[async_trait]
impl ConversionBackend for ModalBackend {
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
            file_url: &file_url,
            use_llm: options.use_llm,
            page_range: (!options.page_range.is_all()).then(|| options.page_range.as_str()),
        };

        let response = self
            .http
            .send(self.http.post(self.http.url("run")?).json(&body))
            .await?;
        if !response.status().is_success() {
            return Err(self.http.submission_error(response).await);
        }
        let run: RunResponse = self.http.json(response).await?;
        info!("modal: spawned call {}", run.id);
        Ok(JobHandle::new(NAME, run.id))
    }

    async fn get_job_status(&self, handle: &JobHandle) -> Result<JobStatus, JobError> {
        let url = self.http.url(&format!("status/{}", handle.id()))?;
        let response = self.http.send(self.http.get(url)).await?;
        if !response.status().is_success() {
            return Err(self.http.job_error(response, handle.id()).await);
        }
        let body: StatusBody = self.http.json(response).await?;
        into_status(body, handle.id())
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    fn supports_cancellation(&self) -> bool {
        false
    }
}
