//! CLI binary for edgequake-docjob.
//!
//! A thin shim over the library crate: maps CLI flags to a
//! `ConversionRequest`, a `TrackerConfig` and one backend, then drives a
//! `JobController` while rendering progress.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_docjob::{
    embed_images, save_result, BackendConfig, BackendKind, BackendRegistry, CancelOutcome,
    ConversionRequest, ConversionResult, Failure, FailureKind, FileSource, JobController,
    JobStatus, OutputFormat, Progress, StatusListener, TrackerConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI status listener using indicatif ──────────────────────────────────────

/// Terminal listener: a spinner while the job is queued, a stage bar once the
/// backend reports counters, and one log line per milestone.
struct CliStatusListener {
    bar: ProgressBar,
    started: Instant,
}

impl CliStatusListener {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Submitted");
        bar.set_message("waiting for the backend…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            started: Instant::now(),
        })
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len}  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS)
    }

    fn elapsed(&self) -> String {
        format!("{:.1}s", self.started.elapsed().as_secs_f64())
    }
}

impl StatusListener for CliStatusListener {
    fn on_pending(&self, _status: &JobStatus) {
        self.bar.set_prefix("Queued");
    }

    fn on_processing(&self, _status: &JobStatus) {
        self.bar.set_prefix("Converting");
        self.bar.set_message("");
    }

    fn on_progress(&self, _status: &JobStatus, progress: &Progress) {
        if self.bar.length() != Some(progress.total()) {
            self.bar.set_style(Self::bar_style());
            self.bar.set_length(progress.total());
        }
        self.bar.set_prefix(progress.stage().to_string());
        self.bar.set_position(progress.current());
    }

    fn on_html_ready(&self, _status: &JobStatus, html: &str) {
        self.bar.println(format!(
            "  {} HTML ready  {}  {}",
            cyan("◆"),
            dim(&format!("{:>7} chars", html.len())),
            dim(&self.elapsed()),
        ));
    }

    fn on_completed(&self, _status: &JobStatus, result: &ConversionResult) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} Conversion complete  {}  {}",
            green("✔"),
            dim(&format!("{} chars", result.content.len())),
            dim(&self.elapsed()),
        );
    }

    fn on_failed(&self, _status: &JobStatus, failure: &Failure) {
        self.bar.finish_and_clear();
        if failure.kind == FailureKind::Cancelled {
            eprintln!("{} {}", cyan("◼"), failure.reason);
        } else {
            eprintln!(
                "{} Conversion failed ({}): {}",
                red("✘"),
                failure.kind,
                red(&failure.reason)
            );
        }
    }
}

/// Plain listener for `--no-progress`: one stderr line per transition.
struct LogStatusListener;

impl StatusListener for LogStatusListener {
    fn on_status(&self, status: &JobStatus) {
        match status.progress() {
            Some(p) => eprintln!("{}: {} {}/{}", status.state(), p.stage(), p.current(), p.total()),
            None => eprintln!("{}", status.state()),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a local file on the self-hosted worker (stdout)
  docjob report.pdf

  # Remote document, every format, saved to a directory
  docjob https://example.com/paper.pdf --format html,markdown,json,chunks -o out/

  # Already uploaded file on Runpod, first five pages, LLM clean-up
  docjob --backend runpod --file-id 3f2a… --pages 1-5 --use-llm

  # Poll instead of streaming, JSON status on stdout
  docjob --no-stream --json scan.png

BACKENDS:
  Backend   Streaming  Cancel  Inputs
  ───────   ─────────  ──────  ─────────────────────────────
  worker    ✓          ✓       file, URL, file id
  modal     —          —       URL, file id (needs DOCJOB_FILE_URL_BASE)
  runpod    —          ✓       URL, file id (needs DOCJOB_FILE_URL_BASE)

ENVIRONMENT VARIABLES:
  DOCJOB_WORKER_URL       Worker base URL (default http://localhost:8000)
  DOCJOB_MODAL_URL        Modal deployment URL
  DOCJOB_RUNPOD_URL       Runpod endpoint URL (https://api.runpod.ai/v2/<id>)
  RUNPOD_API_KEY          Runpod bearer token
  DOCJOB_API_KEY          Bearer token for other backends
  DOCJOB_FILE_URL_BASE    Where uploaded file ids can be downloaded from

Ctrl-C cancels the job when the backend supports it.
"#;

/// Submit and track document conversion jobs.
#[derive(Parser, Debug)]
#[command(
    name = "docjob",
    version,
    about = "Submit, track and cancel document conversion jobs",
    long_about = "Submit a document to a conversion backend (self-hosted worker, Modal or \
Runpod), follow its progress over an event stream or by polling, and print or save the result.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file, HTTP/HTTPS URL, or (with --file-id) an uploaded file id.
    input: String,

    /// Conversion backend.
    #[arg(short, long, env = "DOCJOB_BACKEND", value_enum, default_value = "worker")]
    backend: BackendArg,

    /// Backend base URL (overrides DOCJOB_<BACKEND>_URL).
    #[arg(long)]
    base_url: Option<String>,

    /// Bearer token (overrides RUNPOD_API_KEY / DOCJOB_API_KEY).
    #[arg(long)]
    api_key: Option<String>,

    /// Base URL under which file ids are downloadable.
    #[arg(long)]
    file_url_base: Option<String>,

    /// Treat INPUT as an already uploaded file id.
    #[arg(long)]
    file_id: bool,

    /// Output formats, comma separated: html, markdown, json, chunks.
    #[arg(short, long, env = "DOCJOB_FORMAT", value_delimiter = ',', default_value = "html")]
    format: Vec<String>,

    /// Ask the backend to clean up the output with an LLM.
    #[arg(long, env = "DOCJOB_USE_LLM")]
    use_llm: bool,

    /// Force OCR even when the document has a text layer.
    #[arg(long, env = "DOCJOB_FORCE_OCR")]
    force_ocr: bool,

    /// Page range: 1-5, 8 or 1-3,7 (1-indexed). Default: all pages.
    #[arg(long, env = "DOCJOB_PAGES", default_value = "")]
    pages: String,

    /// Delay between status polls, in milliseconds.
    #[arg(long, env = "DOCJOB_POLL_INTERVAL_MS", default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Per-request timeout in seconds.
    #[arg(long, env = "DOCJOB_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// Poll even when the backend offers an event stream.
    #[arg(long, env = "DOCJOB_NO_STREAM")]
    no_stream: bool,

    /// Save every produced format into this directory.
    #[arg(short, long, env = "DOCJOB_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Print the final job status as JSON instead of the content.
    #[arg(long, env = "DOCJOB_JSON")]
    json: bool,

    /// Inline base64 images into the printed HTML.
    #[arg(long)]
    embed_images: bool,

    /// Disable the progress bar.
    #[arg(long, env = "DOCJOB_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCJOB_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCJOB_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Worker,
    Modal,
    Runpod,
}

impl From<BackendArg> for BackendKind {
    fn from(v: BackendArg) -> Self {
        match v {
            BackendArg::Worker => BackendKind::Worker,
            BackendArg::Modal => BackendKind::Modal,
            BackendArg::Runpod => BackendKind::Runpod,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar provides the feedback that matters; keep library logs
    // at error level unless asked for more.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build request, tracker and registry ─────────────────────────────
    let kind = BackendKind::from(cli.backend);
    let request = build_request(&cli).await?;
    let tracker = TrackerConfig::builder()
        .poll_interval(Duration::from_millis(cli.poll_interval_ms))
        .request_timeout(Duration::from_secs(cli.timeout))
        .prefer_streaming(!cli.no_stream)
        .build()
        .context("Invalid tracking configuration")?;
    let registry = Arc::new(
        BackendRegistry::from_configs(&[backend_config(&cli, kind)])
            .context("Invalid backend configuration")?,
    );

    let listener: Arc<dyn StatusListener> = if show_progress {
        CliStatusListener::new()
    } else if !cli.quiet && !cli.json {
        Arc::new(LogStatusListener)
    } else {
        Arc::new(edgequake_docjob::NoopStatusListener)
    };

    // ── Submit and track ─────────────────────────────────────────────────
    let mut controller = JobController::new(registry, kind, tracker, listener);
    let handle = controller
        .start(&request)
        .await
        .context("Submission failed")?;
    if !cli.quiet && !show_progress {
        eprintln!("{} submitted {}", cyan("◆"), bold(&handle.to_string()));
    }

    let status = tokio::select! {
        status = controller.wait_terminal() => status,
        _ = tokio::signal::ctrl_c() => {
            match controller.cancel().await {
                CancelOutcome::Cancelled => {}
                CancelOutcome::NotCancellable => {
                    eprintln!("{} the {} backend cannot cancel; stopped tracking {}", cyan("⚠"), kind, handle);
                }
                CancelOutcome::Rejected(reason) => {
                    eprintln!("{} cancellation rejected: {}; stopped tracking {}", cyan("⚠"), reason, handle);
                }
            }
            controller.status()
        }
    };
    controller.dispose();

    let Some(status) = status.filter(JobStatus::is_terminal) else {
        return Ok(ExitCode::from(130));
    };

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("Failed to serialise status")?
        );
    }

    if let Some(result) = status.result() {
        if let Some(ref dir) = cli.output_dir {
            let saved = save_result(result, dir)
                .await
                .context("Failed to save result")?;
            if !cli.quiet {
                eprintln!(
                    "{}  {} files, {} images  →  {}",
                    green("✔"),
                    saved.files.len(),
                    saved.images.len(),
                    bold(&dir.display().to_string()),
                );
            }
        } else if !cli.json {
            print_content(result, cli.embed_images)?;
        }
        return Ok(ExitCode::SUCCESS);
    }

    Ok(if status.is_cancelled() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Write the primary content to stdout.
fn print_content(result: &ConversionResult, embed: bool) -> Result<()> {
    let content = match (&result.images, embed) {
        (Some(images), true) => embed_images(&result.content, images),
        _ => result.content.clone(),
    };
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(content.as_bytes())
        .context("Failed to write to stdout")?;
    if !content.ends_with('\n') {
        handle.write_all(b"\n").ok();
    }
    Ok(())
}

/// Map CLI args to a `ConversionRequest`.
async fn build_request(cli: &Cli) -> Result<ConversionRequest> {
    let source = if cli.file_id {
        FileSource::FileId(cli.input.clone())
    } else if cli.input.starts_with("http://") || cli.input.starts_with("https://") {
        FileSource::Url(cli.input.clone())
    } else {
        let path = Path::new(&cli.input);
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        FileSource::Inline {
            bytes,
            filename,
            mime_type: None,
        }
    };

    let formats = cli
        .format
        .iter()
        .map(|f| f.parse::<OutputFormat>())
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid --format")?;

    ConversionRequest::builder(source)
        .formats(formats)
        .use_llm(cli.use_llm)
        .force_ocr(cli.force_ocr)
        .page_range(cli.pages.clone())
        .build()
        .context("Invalid conversion request")
}

/// Environment settings for `kind`, with CLI flags layered on top.
fn backend_config(cli: &Cli, kind: BackendKind) -> BackendConfig {
    let mut config = BackendConfig::from_env(kind);
    if let Some(ref url) = cli.base_url {
        config = config.with_base_url(url.as_str());
    }
    if let Some(ref key) = cli.api_key {
        config = config.with_api_key(key.as_str());
    }
    if let Some(ref base) = cli.file_url_base {
        config = config.with_file_url_base(base.as_str());
    }
    config.with_request_timeout(Duration::from_secs(cli.timeout.max(1)))
}
