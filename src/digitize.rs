//! End-to-end digitization entry points.
//!
//! [`extract_report`] is the deterministic core: recognized pages in, report
//! out, no I/O. [`digitize`] wraps it with everything around a real
//! submission: resolving files and URLs, page images, recognition page by
//! page, and the correction override.

use crate::config::DigitizeConfig;
use crate::correction::{write_atomic, CorrectionStore};
use crate::error::DigitizeError;
use crate::model::{PageTokens, ReportOutput, Token};
use crate::pipeline::confidence::{score_patient_fields, score_words};
use crate::pipeline::denoise::denoise_with;
use crate::pipeline::extract::{extract_fields, extract_tests, patient_map};
use crate::pipeline::input::{self, SubmissionKind};
use crate::pipeline::normalize::{normalize, RawExtraction};
use crate::pipeline::order::order_tokens_with;
use crate::pipeline::recognize::{load_token_dump, Recognizer};
use crate::pipeline::render;
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

// ── Output types ─────────────────────────────────────────────────────────

/// One recognized page of a document.
#[derive(Debug, Clone, Serialize)]
pub struct DigitizedPage {
    /// 1-indexed position within the document.
    pub page: usize,
    pub tokens: Vec<Token>,
    /// Page image, when the page came from a scan or PDF.
    #[serde(skip)]
    pub image: Option<DynamicImage>,
}

/// Timing and size figures for one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DigitizeStats {
    pub pages: usize,
    pub tokens: usize,
    pub lines: usize,
    pub tests: usize,
    pub recognition_ms: u64,
    pub total_ms: u64,
}

/// Everything produced for one document.
#[derive(Debug, Clone, Serialize)]
pub struct DigitizedDocument {
    pub document_id: String,
    /// The report to serve: the stored correction if one exists, else the
    /// computed report.
    pub report: ReportOutput,
    /// True when `report` came from the correction store.
    pub corrected: bool,
    /// Reading-ordered text of all pages, before denoising.
    pub raw_text: String,
    pub stats: DigitizeStats,
    #[serde(skip)]
    pub pages: Vec<DigitizedPage>,
}

/// Result of the extraction core.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub report: ReportOutput,
    /// Reading-ordered text, pages joined by `\n`.
    pub text: String,
    pub lines: usize,
}

// ── Extraction core ──────────────────────────────────────────────────────

/// Build the report from recognized pages.
///
/// Pages are ordered and denoised individually, so word frequencies are
/// counted per page. The cleaned texts are then joined in page order and
/// extraction runs once over the combined text. Confidence lookups search
/// every page's tokens in reading order.
pub fn extract_report(pages: &[PageTokens], config: &DigitizeConfig) -> Extraction {
    let mut texts = Vec::with_capacity(pages.len());
    let mut cleaned = Vec::with_capacity(pages.len());
    let mut ordered_tokens: Vec<Token> = Vec::new();
    let mut lines = 0;

    for page in pages {
        let ordered = order_tokens_with(
            page.tokens.clone(),
            config.line_height_factor,
            config.min_line_threshold,
        );
        debug!(
            "Page {}: {} tokens → {} lines",
            page.page,
            page.tokens.len(),
            ordered.lines.len()
        );
        lines += ordered.lines.len();
        ordered_tokens.extend(ordered.lines.into_iter().flat_map(|l| l.tokens));
        cleaned.push(denoise_with(
            &ordered.text,
            &config.boilerplate,
            config.max_word_frequency,
        ));
        texts.push(ordered.text);
    }

    let text = texts.join("\n");
    let report = extract_from_clean(&cleaned.join("\n"), &ordered_tokens);
    Extraction {
        report,
        text,
        lines,
    }
}

/// Run extraction over plain text, for callers that already have it.
///
/// The text is denoised as a single page. With no tokens to look up, every
/// captured value gets the unresolved confidence.
pub fn digitize_text(text: &str, config: &DigitizeConfig) -> ReportOutput {
    let clean = denoise_with(text, &config.boilerplate, config.max_word_frequency);
    extract_from_clean(&clean, &[])
}

/// Extraction over already denoised text.
fn extract_from_clean(clean: &str, tokens: &[Token]) -> ReportOutput {
    let captures = extract_fields(clean);
    let candidates = extract_tests(clean);
    debug!(
        "Extracted {} patient field(s), {} test(s)",
        captures.len(),
        candidates.len()
    );

    let patient_confidence = score_patient_fields(&captures, tokens);
    let tests = candidates
        .iter()
        .map(|c| {
            let mut map = c.to_map();
            map.insert(
                "confidence".into(),
                Value::from(score_words(&c.matched_tokens, tokens)),
            );
            map
        })
        .collect();

    let raw = RawExtraction {
        patient: patient_map(&captures),
        tests,
    };
    ReportOutput {
        report: normalize(&raw),
        patient_confidence,
    }
}

// ── Full pipeline ────────────────────────────────────────────────────────

/// Where one page's tokens come from.
enum PageSource {
    Image(DynamicImage),
    Recorded(Vec<Token>),
}

/// Digitize one document made of one or more files or URLs.
///
/// Every input is resolved and sniffed (PNG/JPEG scan, PDF, or JSON token
/// dump). Scan and PDF pages are recognized with `recognizer`; token dumps
/// are used as recorded. Pages are processed strictly in input order, one at
/// a time.
///
/// # Errors
/// Any page failing recognition aborts the document with
/// [`DigitizeError::RecognitionFailed`]. Input, rendering and correction
/// store failures are fatal as well.
pub async fn digitize<S, R>(
    inputs: &[S],
    recognizer: &R,
    config: &DigitizeConfig,
) -> Result<DigitizedDocument, DigitizeError>
where
    S: AsRef<str>,
    R: Recognizer,
{
    let total_start = Instant::now();
    if inputs.is_empty() {
        return Err(DigitizeError::InvalidInput {
            input: String::new(),
        });
    }
    let document_id = input::document_id(inputs);
    info!("Digitizing '{}' ({} file(s))", document_id, inputs.len());

    // ── Step 1: Resolve inputs and collect pages ────────────────────────
    let mut sources = Vec::new();
    for raw in inputs {
        let submission =
            input::resolve_submission(raw.as_ref(), config.download_timeout_secs).await?;
        match submission.kind {
            SubmissionKind::Tokens => {
                let pages = load_token_dump(submission.path(), &document_id)?;
                sources.extend(pages.into_iter().map(PageSource::Recorded));
            }
            SubmissionKind::Image | SubmissionKind::Pdf => {
                let images = render::load_pages(&submission, config).await?;
                sources.extend(images.into_iter().map(|(_, img)| PageSource::Image(img)));
            }
        }
    }
    let total_pages = sources.len();

    if let Some(ref cb) = config.progress_callback {
        cb.on_document_start(&document_id, total_pages);
    }

    // ── Step 2: Recognize pages in order ────────────────────────────────
    let recognition_start = Instant::now();
    let mut pages = Vec::with_capacity(total_pages);
    for (idx, source) in sources.into_iter().enumerate() {
        let page_num = idx + 1;
        if let Some(ref cb) = config.progress_callback {
            cb.on_page_start(page_num, total_pages);
        }

        let (tokens, image) = match source {
            PageSource::Recorded(tokens) => (tokens, None),
            PageSource::Image(img) => match recognizer.recognize_page(page_num, &img).await {
                Ok(tokens) => (tokens, Some(img)),
                Err(e) => {
                    if let Some(ref cb) = config.progress_callback {
                        cb.on_page_error(page_num, total_pages, &e.to_string());
                    }
                    return Err(e.into_fatal(&document_id));
                }
            },
        };

        if let Some(ref cb) = config.progress_callback {
            cb.on_page_complete(page_num, total_pages, tokens.len());
        }
        pages.push(DigitizedPage {
            page: page_num,
            tokens,
            image,
        });
    }
    let recognition_ms = recognition_start.elapsed().as_millis() as u64;

    // ── Step 3: Extract ─────────────────────────────────────────────────
    let page_tokens: Vec<PageTokens> = pages
        .iter()
        .map(|p| PageTokens {
            page: p.page,
            tokens: p.tokens.clone(),
        })
        .collect();
    let extraction = extract_report(&page_tokens, config);

    // ── Step 4: Correction override ─────────────────────────────────────
    let store = CorrectionStore::new(&config.correction_dir);
    let (report, corrected) = store.apply(&document_id, extraction.report).await?;

    let stats = DigitizeStats {
        pages: total_pages,
        tokens: page_tokens.iter().map(|p| p.tokens.len()).sum(),
        lines: extraction.lines,
        tests: report.report.tests.len(),
        recognition_ms,
        total_ms: total_start.elapsed().as_millis() as u64,
    };

    if let Some(ref cb) = config.progress_callback {
        cb.on_document_complete(&document_id, stats.tests, corrected);
    }
    info!(
        "Digitized '{}': {} page(s), {} test(s){} in {}ms",
        document_id,
        stats.pages,
        stats.tests,
        if corrected { " (corrected)" } else { "" },
        stats.total_ms
    );

    Ok(DigitizedDocument {
        document_id,
        report,
        corrected,
        raw_text: extraction.text,
        stats,
        pages,
    })
}

/// Synchronous wrapper around [`digitize`].
///
/// Creates a temporary tokio runtime internally.
pub fn digitize_sync<S, R>(
    inputs: &[S],
    recognizer: &R,
    config: &DigitizeConfig,
) -> Result<DigitizedDocument, DigitizeError>
where
    S: AsRef<str>,
    R: Recognizer,
{
    tokio::runtime::Runtime::new()
        .map_err(|e| DigitizeError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(digitize(inputs, recognizer, config))
}

/// Digitize and write the served report as pretty JSON to `output_path`.
pub async fn digitize_to_file<S, R>(
    inputs: &[S],
    output_path: impl AsRef<Path>,
    recognizer: &R,
    config: &DigitizeConfig,
) -> Result<DigitizeStats, DigitizeError>
where
    S: AsRef<str>,
    R: Recognizer,
{
    let document = digitize(inputs, recognizer, config).await?;
    let path = output_path.as_ref();

    let body = serde_json::to_vec_pretty(&document.report)
        .map_err(|e| DigitizeError::Internal(e.to_string()))?;
    write_atomic(path, &body)
        .await
        .map_err(|e| DigitizeError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    Ok(document.stats)
}

/// Digitize an in-memory upload.
///
/// `file_name` decides the document identifier, so corrections stored for
/// an earlier upload of the same file apply again.
pub async fn digitize_from_bytes<R: Recognizer>(
    bytes: &[u8],
    file_name: &str,
    recognizer: &R,
    config: &DigitizeConfig,
) -> Result<DigitizedDocument, DigitizeError> {
    let name = Path::new(file_name)
        .file_name()
        .ok_or_else(|| DigitizeError::InvalidInput {
            input: file_name.to_string(),
        })?;
    let dir = tempfile::TempDir::new()
        .map_err(|e| DigitizeError::Internal(format!("tempfile: {e}")))?;
    let path = dir.path().join(name);
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| DigitizeError::Internal(format!("tempfile write: {e}")))?;

    let path = path.to_string_lossy().to_string();
    // `dir` is dropped (and the file deleted) when `digitize` returns
    digitize(std::slice::from_ref(&path), recognizer, config).await
}

/// Digitize independent documents concurrently.
///
/// Each entry of `documents` is the file list of one document. Results come
/// back in input order; one document failing does not affect the others.
pub async fn digitize_many<S, R>(
    documents: &[Vec<S>],
    recognizer: &R,
    config: &DigitizeConfig,
    concurrency: usize,
) -> Vec<Result<DigitizedDocument, DigitizeError>>
where
    S: AsRef<str>,
    R: Recognizer,
{
    stream::iter(documents.iter().map(|inputs| digitize(inputs.as_slice(), recognizer, config)))
        .buffered(concurrency.max(1))
        .collect()
        .await
}
