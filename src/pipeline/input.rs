//! Input resolution: normalise a user-supplied path or URL to a local file,
//! sniff what kind of submission it is, and derive the document identifier.
//!
//! ## Why download to a temp file?
//!
//! pdfium requires a file-system path; it cannot stream from a byte buffer.
//! Downloading to a `TempDir` gives every later stage a path to open while
//! ensuring cleanup happens automatically when [`ResolvedInput`] is dropped.
//!
//! ## Document identity
//!
//! Recognition output, the computed report and any stored correction are
//! linked by a key derived from the submitted file names, never from content,
//! so re-running recognition on the same scan finds the same correction.

use crate::error::DigitizeError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// What a submission file contains, decided from its first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    /// PNG or JPEG scan/photo: one page.
    Image,
    /// PDF: one page per PDF page.
    Pdf,
    /// Pre-computed recognition output (JSON token dump).
    Tokens,
}

/// The resolved input: either a local path or a downloaded temp file.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; file downloaded to a temp directory.
    /// The `TempDir` is kept alive to prevent cleanup until processing completes.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Get the path to the file regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

/// One resolved file of a submission, ready for recognition.
#[derive(Debug)]
pub struct Submission {
    pub input: ResolvedInput,
    pub kind: SubmissionKind,
}

impl Submission {
    pub fn path(&self) -> &Path {
        self.input.path()
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a local file and sniff its kind.
pub async fn resolve_submission(
    input: &str,
    timeout_secs: u64,
) -> Result<Submission, DigitizeError> {
    let resolved = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        resolve_local(input)?
    };
    let kind = sniff_file(resolved.path())?;
    debug!("Submission {} is {:?}", resolved.path().display(), kind);
    Ok(Submission {
        input: resolved,
        kind,
    })
}

/// Decide the submission kind from leading bytes.
pub fn sniff_kind(head: &[u8]) -> Option<SubmissionKind> {
    if head.starts_with(b"%PDF") {
        return Some(SubmissionKind::Pdf);
    }
    if head.starts_with(b"\x89PNG") || head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(SubmissionKind::Image);
    }
    let body = head.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(head);
    match body.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'[') | Some(b'{') => Some(SubmissionKind::Tokens),
        _ => None,
    }
}

fn sniff_file(path: &Path) -> Result<SubmissionKind, DigitizeError> {
    use std::io::Read;
    let mut head = Vec::with_capacity(64);
    std::fs::File::open(path)
        .and_then(|f| f.take(64).read_to_end(&mut head))
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => DigitizeError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => DigitizeError::FileNotFound {
                path: path.to_path_buf(),
            },
        })?;

    sniff_kind(&head).ok_or_else(|| DigitizeError::UnsupportedFormat {
        path: path.to_path_buf(),
        magic: head.iter().take(4).copied().collect(),
    })
}

/// Resolve a local file path, validating existence and read permission.
fn resolve_local(path_str: &str) -> Result<ResolvedInput, DigitizeError> {
    let path = PathBuf::from(path_str);

    if !path.is_file() {
        return Err(DigitizeError::FileNotFound { path });
    }

    debug!("Resolved local submission: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, DigitizeError> {
    info!("Downloading submission from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| DigitizeError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            DigitizeError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            DigitizeError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(DigitizeError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = file_name_from_url(url).ok_or_else(|| DigitizeError::InvalidInput {
        input: url.to_string(),
    })?;

    let temp_dir = TempDir::new().map_err(|e| DigitizeError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| DigitizeError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| DigitizeError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded to: {}", file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last non-empty path segment of a URL, if it looks like a file name.
fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    (!last.is_empty()).then(|| last.to_string())
}

// ── Document identity ────────────────────────────────────────────────────

/// Stable document identifier for one or more submitted files.
///
/// A single file is keyed by its file stem (`scans/cbc.png` → `cbc`). A
/// multi-file submission is keyed by a bundle name built from the first
/// file's stem and the file count (`cbc_bundle_3`).
pub fn document_id<S: AsRef<str>>(inputs: &[S]) -> String {
    let first = inputs
        .first()
        .map(|s| stem_of(s.as_ref()))
        .unwrap_or_else(|| "document".to_string());
    match inputs.len() {
        0 | 1 => first,
        n => format!("{first}_bundle_{n}"),
    }
}

fn stem_of(input: &str) -> String {
    let name = if is_url(input) {
        file_name_from_url(input).unwrap_or_default()
    } else {
        Path::new(input)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    let stem = Path::new(&name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let safe: String = stem
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == ':' { '_' } else { c })
        .collect();
    if safe.is_empty() {
        "document".to_string()
    } else {
        safe
    }
}
