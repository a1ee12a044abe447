//! Persisting a [`ConversionResult`] to disk.
//!
//! ```text
//! <dir>/
//!  ├─ document.html     formats.html
//!  ├─ document.md       formats.markdown
//!  ├─ document.json     formats.json (pretty-printed)
//!  ├─ chunks.json       formats.chunks (pretty-printed)
//!  ├─ metadata.json     metadata (always written)
//!  └─ images/           base64 images, decoded
//! ```
//!
//! Files are written atomically (temp file + rename). Images given as URLs
//! are left as references and listed in [`SavedResult::linked_images`].

use crate::error::JobError;
use crate::status::ConversionResult;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What [`save_result`] wrote.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SavedResult {
    /// Document and metadata files, in write order.
    pub files: Vec<PathBuf>,
    /// Decoded image files.
    pub images: Vec<PathBuf>,
    /// Images that are URLs and were not downloaded.
    pub linked_images: Vec<String>,
}

/// Write every format present in `result` under `dir`, creating it.
///
/// # Errors
/// [`JobError::OutputWriteFailed`] on the first I/O failure. Undecodable
/// image payloads are skipped with a warning.
pub async fn save_result(result: &ConversionResult, dir: &Path) -> Result<SavedResult, JobError> {
    create_dir(dir).await?;
    let mut saved = SavedResult::default();
    let formats = &result.formats;

    let primary_only = formats.html.is_none() && formats.markdown.is_none();
    if let Some(html) = &formats.html {
        saved.files.push(write_atomic(&dir.join("document.html"), html.as_bytes()).await?);
    }
    if let Some(md) = &formats.markdown {
        saved.files.push(write_atomic(&dir.join("document.md"), md.as_bytes()).await?);
    }
    if primary_only && !result.content.is_empty() {
        let name = if result.content.trim_start().starts_with('<') {
            "document.html"
        } else {
            "document.md"
        };
        saved
            .files
            .push(write_atomic(&dir.join(name), result.content.as_bytes()).await?);
    }
    if let Some(json) = &formats.json {
        saved.files.push(write_json(&dir.join("document.json"), json).await?);
    }
    if let Some(chunks) = &formats.chunks {
        saved.files.push(write_json(&dir.join("chunks.json"), chunks).await?);
    }
    saved
        .files
        .push(write_json(&dir.join("metadata.json"), &result.metadata).await?);

    if let Some(images) = &result.images {
        let image_dir = dir.join("images");
        for (name, value) in images {
            if is_url(value) {
                saved.linked_images.push(name.clone());
                continue;
            }
            let Some(file_name) = Path::new(name).file_name() else {
                warn!("Skipping image with unusable name '{}'", name);
                continue;
            };
            let bytes = match STANDARD.decode(base64_payload(value)) {
                Ok(b) => b,
                Err(e) => {
                    warn!("Skipping image '{}': invalid base64 ({})", name, e);
                    continue;
                }
            };
            if saved.images.is_empty() {
                create_dir(&image_dir).await?;
            }
            saved
                .images
                .push(write_atomic(&image_dir.join(file_name), &bytes).await?);
        }
    }

    debug!(
        "Saved {} files and {} images to {}",
        saved.files.len(),
        saved.images.len(),
        dir.display()
    );
    Ok(saved)
}

/// Inline base64 images into `html` as `data:` URLs.
///
/// Every `src="name"` (or `src='name'`) whose name is a key of `images` is
/// rewritten. URL-valued images are substituted as-is.
pub fn embed_images(html: &str, images: &BTreeMap<String, String>) -> String {
    let mut out = html.to_string();
    for (name, value) in images {
        let target = if is_url(value) || value.starts_with("data:") {
            value.clone()
        } else {
            format!("data:{};base64,{}", mime_for(name), value.trim())
        };
        for quote in ['"', '\''] {
            let needle = format!("src={quote}{name}{quote}");
            if out.contains(&needle) {
                out = out.replace(&needle, &format!("src={quote}{target}{quote}"));
            }
        }
    }
    out
}

fn is_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Strip a `data:…;base64,` prefix when present.
fn base64_payload(value: &str) -> &str {
    match value.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map_or(rest, |(_, payload)| payload),
        None => value.trim(),
    }
}

fn mime_for(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("tif" | "tiff") => "image/tiff",
        _ => "application/octet-stream",
    }
}

async fn create_dir(dir: &Path) -> Result<(), JobError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| JobError::OutputWriteFailed {
            path: dir.to_path_buf(),
            source: e,
        })
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<PathBuf, JobError> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| JobError::Internal(format!("serialising {}: {e}", path.display())))?;
    write_atomic(path, &bytes).await
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<PathBuf, JobError> {
    let fail = |e| JobError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await.map_err(fail)?;
    tokio::fs::rename(&tmp, path).await.map_err(fail)?;
    Ok(path.to_path_buf())
}
