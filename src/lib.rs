//! # labreport-digitizer
//!
//! Turn scanned or photographed lab reports into structured, typed JSON.
//!
//! ## Why this crate?
//!
//! Lab reports arrive as phone photos, faxes and PDFs with no shared layout.
//! A vision engine can read the words, but the words come back as an
//! unordered bag of boxes. This crate rebuilds reading order, strips
//! letterhead noise, pulls out patient fields and `<test> <value> <unit>`
//! triples with deterministic rules, scores each value by how confidently
//! its words were read, and coerces the lot into a record that never has a
//! missing key. Operators can pin a corrected record per document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! scan / PDF / token dump
//!  │
//!  ├─ 1. Input      resolve local file or URL, sniff kind, derive document id
//!  ├─ 2. Recognize  page image → tokens (vision LLM or recorded dump)
//!  ├─ 3. Order      tokens → visual lines → text
//!  ├─ 4. Denoise    drop boilerplate and page-frequent words
//!  ├─ 5. Extract    patient fields + test candidates
//!  ├─ 6. Score      mean recognition confidence per value
//!  ├─ 7. Normalize  canonical Report with sentinel defaults
//!  └─ 8. Correct    stored operator correction replaces the report
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use labreport_digitizer::{digitize, DigitizeConfig, VisionRecognizer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = DigitizeConfig::default();
//!     let recognizer = VisionRecognizer::from_config(&config)?;
//!     let doc = digitize(&["cbc_scan.png"], &recognizer, &config).await?;
//!     println!("{}", serde_json::to_string_pretty(&doc.report)?);
//!     Ok(())
//! }
//! ```
//!
//! Without a vision engine, the extraction core runs on recorded tokens:
//!
//! ```rust
//! use labreport_digitizer::{extract_report, BoundingBox, DigitizeConfig, PageTokens, Token};
//!
//! let page = PageTokens {
//!     page: 1,
//!     tokens: vec![
//!         Token::new("13.5", BoundingBox::new(0.30, 0.50, 0.36, 0.52), 0.8),
//!         Token::new("Hemoglobin", BoundingBox::new(0.10, 0.50, 0.25, 0.52), 0.9),
//!         Token::new("g/dI", BoundingBox::new(0.40, 0.50, 0.45, 0.52), 0.7),
//!     ],
//! };
//! let out = extract_report(&[page], &DigitizeConfig::default());
//! assert_eq!(out.report.report.tests[0].unit, "g/dl");
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | `lab2json` binary (clap, anyhow, tracing-subscriber, indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! labreport-digitizer = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod annotate;
pub mod config;
pub mod correction;
pub mod digitize;
pub mod error;
pub mod evaluate;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use annotate::{annotate_image, highlight_boxes, highlight_words, save_annotations};
pub use config::{DigitizeConfig, DigitizeConfigBuilder};
pub use correction::{CorrectionStore, ReportStore};
pub use digitize::{
    digitize, digitize_from_bytes, digitize_many, digitize_sync, digitize_text, digitize_to_file,
    extract_report, DigitizeStats, DigitizedDocument, DigitizedPage, Extraction,
};
pub use error::{DigitizeError, PageError};
pub use evaluate::{evaluate_dir, evaluate_report, Evaluation, ScoredEvaluation, TestComparison};
pub use model::{
    BoundingBox, Line, PageTokens, Patient, Report, ReportOutput, Sex, TestResult, Token, UNKNOWN,
};
pub use pipeline::normalize::normalize_unit;
pub use pipeline::recognize::{Recognizer, TokenDumpRecognizer, VisionRecognizer};
pub use progress::{DigitizeProgressCallback, NoopProgressCallback, ProgressCallback};
