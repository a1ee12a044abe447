//! # edgequake-docjob
//!
//! Submit document conversion jobs to interchangeable backends, follow their
//! progress, and collect partial and final results without blocking.
//!
//! ## Why this crate?
//!
//! Conversion providers disagree on everything except the job itself: the
//! self-hosted worker streams events and can cancel, Modal can only be
//! polled, Runpod polls but cancels. Callers should not care. This crate
//! puts every provider behind one adapter contract, delivers progress over
//! whichever transport the provider offers, and exposes one status model
//! and one failure path to the caller.
//!
//! ## Job Lifecycle
//!
//! ```text
//! ConversionRequest
//!  │
//!  ├─ 1. Select   registry picks the adapter for a BackendKind
//!  ├─ 2. Submit   adapter.submit_job → JobHandle (errors surface here)
//!  ├─ 3. Track    event stream, or polling with bounded backoff
//!  │              pending → processing → html_ready → completed | failed
//!  ├─ 4. Cancel   optional; local view turns failed("Cancelled by user")
//!  └─ 5. Dispose  channel closed, handle released
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docjob::{
//!     convert, BackendConfig, BackendKind, BackendRegistry, ConversionRequest, FileSource,
//!     OutputFormat, TrackerConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Worker URL from DOCJOB_WORKER_URL (default http://localhost:8000)
//!     let registry = Arc::new(BackendRegistry::from_configs(&[
//!         BackendConfig::from_env(BackendKind::Worker),
//!     ])?);
//!     let request = ConversionRequest::builder(FileSource::Url(
//!         "https://example.com/report.pdf".into(),
//!     ))
//!     .format(OutputFormat::Html)
//!     .format(OutputFormat::Markdown)
//!     .build()?;
//!
//!     let result = convert(registry, BackendKind::Worker, &request, &TrackerConfig::default()).await?;
//!     println!("{}", result.content);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docjob` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-docjob = { version = "0.1", default-features = false }
//! ```
//!
//! ## Backends
//!
//! | Backend | Streaming | Cancellation | Inline upload |
//! |---------|-----------|--------------|---------------|
//! | `worker` | ✓ | ✓ | ✓ |
//! | `modal`  | — | — | — |
//! | `runpod` | — | ✓ | — |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod channel;
pub mod config;
pub mod controller;
pub mod convert;
pub mod error;
pub mod output;
pub mod progress;
pub mod request;
pub mod status;
mod wire;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::registry::BackendRegistry;
pub use backend::{Capabilities, ConversionBackend, JobHandle};
pub use backend::{modal::ModalBackend, runpod::RunpodBackend, worker::WorkerBackend};
pub use channel::guard::TransitionGuard;
pub use channel::{open_channel, ProgressChannel, Subscription};
pub use config::{BackendConfig, BackendKind, TrackerConfig, TrackerConfigBuilder};
pub use controller::{CancelOutcome, JobController, StatusStream};
pub use convert::{convert, convert_sync, convert_to_dir, convert_with_listener};
pub use error::JobError;
pub use output::{embed_images, save_result, SavedResult};
pub use progress::{NoopStatusListener, SharedListener, StatusListener};
pub use request::{
    ConversionRequest, ConversionRequestBuilder, FileSource, OutputFormat, PageRange,
    ProcessingOptions,
};
pub use status::{
    ConversionResult, Failure, FailureKind, JobState, JobStatus, OutputFormats, Progress,
    CANCELLED_BY_USER,
};
