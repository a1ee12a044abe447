//! Conversion requests: what to convert, into which formats, and how.
//!
//! A [`ConversionRequest`] is built once through its builder and is
//! immutable afterwards; adapters only ever see `&ConversionRequest`.
//!
//! # Example
//! ```rust
//! use edgequake_docjob::{ConversionRequest, FileSource, OutputFormat};
//!
//! let request = ConversionRequest::builder(FileSource::FileId("3f2c…".into()))
//!     .format(OutputFormat::Html)
//!     .format(OutputFormat::Markdown)
//!     .use_llm(true)
//!     .page_range("1-5,8")
//!     .build()
//!     .unwrap();
//! assert_eq!(request.options().page_range.as_str(), "1-5,8");
//! ```

use crate::error::JobError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// File extensions the conversion backends accept.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "pdf", "docx", "doc", "odt", "xlsx", "xls", "ods", "pptx", "ppt", "odp", "html", "epub",
    "png", "jpg", "jpeg", "webp", "gif", "tiff",
];

// ── File source ──────────────────────────────────────────────────────────

/// Where the document comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum FileSource {
    /// Identifier produced by the upload service. Opaque to this crate.
    FileId(String),
    /// Publicly reachable document URL.
    Url(String),
    /// Document bytes sent along with the request.
    Inline {
        bytes: Vec<u8>,
        filename: String,
        mime_type: Option<String>,
    },
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSource::FileId(id) => f.debug_tuple("FileId").field(id).finish(),
            FileSource::Url(url) => f.debug_tuple("Url").field(url).finish(),
            FileSource::Inline {
                bytes,
                filename,
                mime_type,
            } => f
                .debug_struct("Inline")
                .field("bytes", &format_args!("<{} bytes>", bytes.len()))
                .field("filename", filename)
                .field("mime_type", mime_type)
                .finish(),
        }
    }
}

impl FileSource {
    /// Lower-cased extension of the file name or URL path, if any.
    pub fn extension(&self) -> Option<String> {
        let name = match self {
            FileSource::FileId(_) => return None,
            FileSource::Url(url) => url.split(['?', '#']).next().unwrap_or(url),
            FileSource::Inline { filename, .. } => filename.as_str(),
        };
        let file = name.rsplit('/').next().unwrap_or(name);
        file.rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }

    fn validate(&self) -> Result<(), JobError> {
        match self {
            FileSource::FileId(id) if id.trim().is_empty() => {
                Err(JobError::InvalidRequest("file id must not be empty".into()))
            }
            FileSource::FileId(_) => Ok(()),
            FileSource::Url(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                Err(JobError::InvalidRequest(format!(
                    "'{url}' is not an HTTP/HTTPS URL"
                )))
            }
            // URLs without an extension are resolved by the backend (content
            // disposition), so only a *known-bad* extension is rejected.
            FileSource::Url(_) => match self.extension() {
                Some(ext) if !is_supported_extension(&ext) && looks_like_document_ext(&ext) => {
                    Err(unsupported_type(&ext))
                }
                _ => Ok(()),
            },
            FileSource::Inline { bytes, filename, .. } => {
                if bytes.is_empty() {
                    return Err(JobError::InvalidRequest(format!("'{filename}' is empty")));
                }
                match self.extension() {
                    Some(ext) if is_supported_extension(&ext) => Ok(()),
                    Some(ext) => Err(unsupported_type(&ext)),
                    None => Err(JobError::InvalidRequest(format!(
                        "'{filename}' has no file extension"
                    ))),
                }
            }
        }
    }
}

fn is_supported_extension(ext: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&ext)
}

// "report.v2" style dotted names are not extensions.
fn looks_like_document_ext(ext: &str) -> bool {
    ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphabetic())
}

fn unsupported_type(ext: &str) -> JobError {
    JobError::InvalidRequest(format!(
        "unsupported file type '.{ext}'. Supported: {}",
        SUPPORTED_EXTENSIONS.join(", ")
    ))
}

// ── Output format ────────────────────────────────────────────────────────

/// Output format a caller can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Html,
    Markdown,
    Json,
    /// Block-level chunks for retrieval pipelines.
    Chunks,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Html => "html",
            OutputFormat::Markdown => "markdown",
            OutputFormat::Json => "json",
            OutputFormat::Chunks => "chunks",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(OutputFormat::Html),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "json" => Ok(OutputFormat::Json),
            "chunks" => Ok(OutputFormat::Chunks),
            other => Err(JobError::InvalidRequest(format!(
                "unknown output format '{other}' (expected html, markdown, json or chunks)"
            ))),
        }
    }
}

// ── Page range ───────────────────────────────────────────────────────────

/// Validated page-range expression such as `"1-5,8"`.
///
/// Pages are 1-indexed. The empty string selects every page. The string is
/// forwarded to backends verbatim after validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct PageRange(String);

impl PageRange {
    /// Every page.
    pub fn all() -> Self {
        Self(String::new())
    }

    /// Parse and normalise (whitespace removed) a page-range expression.
    pub fn parse(s: &str) -> Result<Self, JobError> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() || compact.eq_ignore_ascii_case("all") {
            return Ok(Self::all());
        }

        for part in compact.split(',') {
            if part.is_empty() {
                return Err(JobError::InvalidRequest(format!(
                    "empty segment in page range '{s}'"
                )));
            }
            match part.split_once('-') {
                Some((start, end)) => {
                    let start = parse_page(start, s)?;
                    let end = parse_page(end, s)?;
                    if start > end {
                        return Err(JobError::InvalidRequest(format!(
                            "invalid page range '{part}': start must be <= end"
                        )));
                    }
                }
                None => {
                    parse_page(part, s)?;
                }
            }
        }

        Ok(Self(compact))
    }

    pub fn is_all(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Expand into sorted, deduplicated 0-indexed page numbers, clipped to
    /// `total_pages`.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        if self.is_all() {
            return (0..total_pages).collect();
        }

        // Segments were validated in `parse`.
        let mut indices: Vec<usize> = Vec::new();
        for part in self.0.split(',') {
            let (start, end) = match part.split_once('-') {
                Some((a, b)) => (a.parse::<usize>().unwrap_or(1), b.parse::<usize>().unwrap_or(0)),
                None => {
                    let p = part.parse::<usize>().unwrap_or(0);
                    (p, p)
                }
            };
            let s = start.max(1) - 1;
            let e = end.min(total_pages);
            indices.extend(s..e);
        }
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_all() {
            f.write_str("all")
        } else {
            f.write_str(&self.0)
        }
    }
}

fn parse_page(s: &str, whole: &str) -> Result<usize, JobError> {
    let page: usize = s.parse().map_err(|_| {
        JobError::InvalidRequest(format!("invalid page number '{s}' in page range '{whole}'"))
    })?;
    if page < 1 {
        return Err(JobError::InvalidRequest(format!(
            "pages are 1-indexed, minimum is 1 (got {page})"
        )));
    }
    Ok(page)
}

// ── Request ──────────────────────────────────────────────────────────────

/// Processing knobs forwarded to the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingOptions {
    /// Let an LLM rewrite/repair the extracted content.
    pub use_llm: bool,
    /// OCR every page even when a text layer exists.
    pub force_ocr: bool,
    pub page_range: PageRange,
}

/// One conversion intent. Immutable once built.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    file: FileSource,
    formats: Vec<OutputFormat>,
    options: ProcessingOptions,
}

impl ConversionRequest {
    /// Start building a request for `file`.
    pub fn builder(file: FileSource) -> ConversionRequestBuilder {
        ConversionRequestBuilder {
            file,
            formats: Vec::new(),
            options: ProcessingOptions::default(),
            page_range: None,
        }
    }

    pub fn file(&self) -> &FileSource {
        &self.file
    }

    /// Requested formats, deduplicated, in request order. Never empty.
    pub fn formats(&self) -> &[OutputFormat] {
        &self.formats
    }

    /// First requested format; backends that accept a single format use this.
    pub fn primary_format(&self) -> OutputFormat {
        self.formats[0]
    }

    pub fn options(&self) -> &ProcessingOptions {
        &self.options
    }
}

/// Builder for [`ConversionRequest`].
#[derive(Debug)]
pub struct ConversionRequestBuilder {
    file: FileSource,
    formats: Vec<OutputFormat>,
    options: ProcessingOptions,
    page_range: Option<String>,
}

impl ConversionRequestBuilder {
    pub fn format(mut self, format: OutputFormat) -> Self {
        if !self.formats.contains(&format) {
            self.formats.push(format);
        }
        self
    }

    pub fn formats(mut self, formats: impl IntoIterator<Item = OutputFormat>) -> Self {
        for f in formats {
            self = self.format(f);
        }
        self
    }

    pub fn use_llm(mut self, v: bool) -> Self {
        self.options.use_llm = v;
        self
    }

    pub fn force_ocr(mut self, v: bool) -> Self {
        self.options.force_ocr = v;
        self
    }

    /// Page range such as `"1-5,8"`; validated in [`build`](Self::build).
    pub fn page_range(mut self, range: impl Into<String>) -> Self {
        self.page_range = Some(range.into());
        self
    }

    /// Validate and freeze the request.
    ///
    /// Defaults to HTML output when no format was requested.
    pub fn build(mut self) -> Result<ConversionRequest, JobError> {
        self.file.validate()?;
        if self.formats.is_empty() {
            self.formats.push(OutputFormat::Html);
        }
        if let Some(range) = self.page_range.take() {
            self.options.page_range = PageRange::parse(&range)?;
        }
        Ok(ConversionRequest {
            file: self.file,
            formats: self.formats,
            options: self.options,
        })
    }
}
