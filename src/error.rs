//! Error types for the labreport-digitizer library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DigitizeError`]: **fatal**, the document cannot be digitized at all
//!   (missing file, unreadable scan, recognition engine failure, broken
//!   correction store). Returned as `Err(DigitizeError)` from the top-level
//!   `digitize*` functions.
//!
//! * [`PageError`]: a single page failed inside the recognition stage. A
//!   page failure aborts its document: it is lifted into
//!   [`DigitizeError::RecognitionFailed`] together with the document id so the
//!   fault can be localised. There is no automatic retry.
//!
//! Content-shape problems are *not* errors. Malformed token geometry degrades
//! to the unit box, uncoercible report values fall back to their sentinels,
//! and a missing correction simply means "serve the computed report".

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the labreport-digitizer library.
#[derive(Debug, Error)]
pub enum DigitizeError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// The file is neither a PNG/JPEG scan, a PDF, nor a JSON token dump.
    #[error("Unsupported submission '{path}'\nFirst bytes: {magic:?}")]
    UnsupportedFormat { path: PathBuf, magic: Vec<u8> },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Page image errors ─────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// A page could not be decoded or rasterised.
    #[error("Rasterisation failed for page {page} of '{path}': {detail}")]
    RasterisationFailed {
        path: PathBuf,
        page: usize,
        detail: String,
    },

    // ── Recognition errors ────────────────────────────────────────────────
    /// The configured vision provider is not initialised (missing API key etc.).
    #[error("Vision provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The recognition engine failed on a page. The document is aborted.
    #[error("Recognition failed for document '{document}', page {page}: {detail}")]
    RecognitionFailed {
        document: String,
        page: usize,
        detail: String,
    },

    /// A token dump could not be parsed at all (not JSON, wrong top-level shape).
    #[error("Token dump for document '{document}' is unreadable: {detail}")]
    MalformedTokens { document: String, detail: String },

    // ── Store errors ──────────────────────────────────────────────────────
    /// Reading or writing a stored correction failed.
    #[error("Correction store I/O failed at '{path}': {source}")]
    CorrectionStoreFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored correction exists but is not valid JSON.
    #[error("Stored correction '{path}' is not valid JSON: {detail}")]
    CorruptCorrection { path: PathBuf, detail: String },

    /// A correction offered for storage holds values that would not be
    /// served as typed (wrong date format, non-integer age, unknown key...).
    #[error("Correction for '{document}' rejected; fix these fields: {}", .fields.join(", "))]
    InvalidCorrection { document: String, fields: Vec<String> },

    /// Could not create or write an output file (report, annotation, JSON).
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failure confined to one page of the recognition stage.
///
/// Reported through [`crate::progress::DigitizeProgressCallback::on_page_error`]
/// and then lifted into [`DigitizeError`] with [`PageError::into_fatal`].
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page image could not be produced.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The vision engine returned an error or an unusable reply.
    #[error("Page {page}: recognition failed: {detail}")]
    RecognitionFailed { page: usize, detail: String },

    /// The vision engine did not answer in time.
    #[error("Page {page}: recognition timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}

impl PageError {
    /// 1-indexed page the error refers to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::RecognitionFailed { page, .. }
            | PageError::Timeout { page, .. } => *page,
        }
    }

    /// Attach the document identity and turn this into a fatal error.
    pub fn into_fatal(self, document: &str) -> DigitizeError {
        DigitizeError::RecognitionFailed {
            document: document.to_string(),
            page: self.page(),
            detail: self.to_string(),
        }
    }
}
