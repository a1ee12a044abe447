//! Adapter for the self-hosted conversion worker.
//!
//! The worker keeps jobs in memory and exposes the richest API of all
//! providers: an event stream per job, a status endpoint, and cancellation.
//!
//! ```text
//! POST /upload                       multipart "file"   → {"file_id"}
//! POST /fetch-url?url=…                                 → {"file_id"}
//! POST /convert/{file_id}?output_format&use_llm&force_ocr&page_range
//!                                                       → {"job_id"}
//! GET  /jobs/{job_id}                                   → status object
//! GET  /jobs/{job_id}/stream                            → text/event-stream
//! POST /cancel/{job_id}                                 → {"cancelled": bool}
//! ```

use super::http::HttpClient;
use super::{check_formats, ConversionBackend, JobHandle};
use crate::config::BackendConfig;
use crate::error::JobError;
use crate::request::{ConversionRequest, FileSource, OutputFormat};
use crate::status::{FailureKind, JobState, JobStatus, CANCELLED_BY_USER};
use crate::wire;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

const NAME: &str = "worker";

const FORMATS: &[OutputFormat] = &[
    OutputFormat::Html,
    OutputFormat::Markdown,
    OutputFormat::Json,
    OutputFormat::Chunks,
];

/// Self-hosted worker adapter.
#[derive(Debug, Clone)]
pub struct WorkerBackend {
    http: HttpClient,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    #[serde(default)]
    cancelled: bool,
}

/// Body of `GET /jobs/{id}`.
#[derive(Debug, Deserialize)]
struct JobBody {
    status: String,
    #[serde(default)]
    progress: Option<Value>,
    #[serde(default)]
    html_content: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl JobBody {
    fn into_status(self) -> Result<JobStatus, JobError> {
        let progress = self.progress.and_then(wire::decode_progress);
        let status = match self.status.as_str() {
            "pending" => JobStatus::pending(),
            "processing" => JobStatus::processing(progress),
            "html_ready" => match self.html_content {
                Some(html) => JobStatus::html_ready(html, progress),
                // Partial HTML not exposed on this endpoint; still processing.
                None => JobStatus::processing(progress),
            },
            "completed" => {
                let value = self.result.ok_or_else(|| JobError::Protocol {
                    backend: NAME.into(),
                    detail: "job is completed but carries no result".into(),
                })?;
                JobStatus::completed(wire::decode_result(value, NAME)?)
                    .carrying_html(self.html_content.as_deref())
            }
            "failed" => {
                let reason = self.error.unwrap_or_else(|| "Unknown error".to_string());
                JobStatus::failed(wire::classify_failure(&reason), reason)
            }
            "cancelled" => JobStatus::failed(
                FailureKind::Cancelled,
                self.error.unwrap_or_else(|| CANCELLED_BY_USER.to_string()),
            ),
            other => {
                return Err(JobError::Protocol {
                    backend: NAME.into(),
                    detail: format!("unknown job status '{other}'"),
                })
            }
        };
        Ok(status)
    }
}

impl WorkerBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, JobError> {
        Ok(Self {
            http: HttpClient::new(NAME, config)?,
        })
    }

    /// Turn any file source into a worker-side file id.
    async fn resolve_file_id(&self, file: &FileSource) -> Result<String, JobError> {
        let request = match file {
            FileSource::FileId(id) => return Ok(id.clone()),
            FileSource::Url(url) => {
                let mut endpoint = self.http.url("fetch-url")?;
                endpoint.query_pairs_mut().append_pair("url", url);
                self.http.post(endpoint)
            }
            FileSource::Inline {
                bytes,
                filename,
                mime_type,
            } => {
                let mut part = Part::bytes(bytes.clone()).file_name(filename.clone());
                if let Some(mime) = mime_type {
                    part = part.mime_str(mime).map_err(|e| {
                        JobError::InvalidRequest(format!("invalid MIME type '{mime}': {e}"))
                    })?;
                }
                self.http
                    .post(self.http.url("upload")?)
                    .multipart(Form::new().part("file", part))
            }
        };

        let response = self.http.send(request).await?;
        if !response.status().is_success() {
            return Err(self.http.submission_error(response).await);
        }
        let uploaded: UploadResponse = self.http.json(response).await?;
        debug!("worker: file stored as {}", uploaded.file_id);
        Ok(uploaded.file_id)
    }
}

#[async_trait]
impl ConversionBackend for WorkerBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn supported_formats(&self) -> &[OutputFormat] {
        FORMATS
    }

    async fn submit_job(&self, request: &ConversionRequest) -> Result<JobHandle, JobError> {
        check_formats(self, request)?;
        let file_id = self.resolve_file_id(request.file()).await?;

        let options = request.options();
        let mut endpoint = self.http.url(&format!("convert/{file_id}"))?;
        {
            let mut query = endpoint.query_pairs_mut();
            query
                .append_pair("output_format", request.primary_format().as_str())
                .append_pair("use_llm", bool_str(options.use_llm))
                .append_pair("force_ocr", bool_str(options.force_ocr));
            if !options.page_range.is_all() {
                query.append_pair("page_range", options.page_range.as_str());
            }
        }

        let response = self.http.send(self.http.post(endpoint)).await?;
        if !response.status().is_success() {
            return Err(self.http.submission_error(response).await);
        }
        let submitted: SubmitResponse = self.http.json(response).await?;
        info!("worker: submitted job {} for file {}", submitted.job_id, file_id);
        Ok(JobHandle::new(NAME, submitted.job_id))
    }

    async fn get_job_status(&self, handle: &JobHandle) -> Result<JobStatus, JobError> {
        let url = self.http.url(&format!("jobs/{}", handle.id()))?;
        let response = self.http.send(self.http.get(url)).await?;
        if !response.status().is_success() {
            return Err(self.http.job_error(response, handle.id()).await);
        }
        let body: JobBody = self.http.json(response).await?;
        let status = body.into_status()?;
        debug_assert!(status.state() != JobState::Completed || status.result().is_some());
        Ok(status)
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn supports_cancellation(&self) -> bool {
        true
    }

    fn stream_url(&self, handle: &JobHandle) -> Option<Url> {
        self.http
            .url(&format!("jobs/{}/stream", handle.id()))
            .ok()
    }

    async fn cancel_job(&self, handle: &JobHandle) -> Result<bool, JobError> {
        let url = self.http.url(&format!("cancel/{}", handle.id()))?;
        let response = self.http.send(self.http.post(url)).await?;
        if !response.status().is_success() {
            return Err(self.http.job_error(response, handle.id()).await);
        }
        let body: CancelResponse = self.http.json(response).await?;
        info!("worker: cancel {} accepted={}", handle, body.cancelled);
        Ok(body.cancelled)
    }
}

fn bool_str(v: bool) -> &'static str {
    if v {
        "true"
    } else {
        "false"
    }
}
