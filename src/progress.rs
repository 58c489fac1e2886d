//! Progress-callback trait for per-page recognition events.
//!
//! Inject an [`Arc<dyn DigitizeProgressCallback>`] via
//! [`crate::config::DigitizeConfigBuilder::progress_callback`] to receive
//! events as the pipeline recognizes each page.
//!
//! # Example
//!
//! ```rust
//! use labreport_digitizer::{DigitizeConfig, DigitizeProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct WordCounter {
//!     words: AtomicUsize,
//! }
//!
//! impl DigitizeProgressCallback for WordCounter {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, token_count: usize) {
//!         self.words.fetch_add(token_count, Ordering::SeqCst);
//!         eprintln!("Page {}/{}: {} words", page_num, total_pages, token_count);
//!     }
//! }
//!
//! let counter = Arc::new(WordCounter { words: AtomicUsize::new(0) });
//!
//! let config = DigitizeConfig::builder()
//!     .progress_callback(counter as Arc<dyn DigitizeProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes a document.
///
/// Pages of one document are recognized strictly in order, so page events for
/// a single document never interleave. When several documents are digitized
/// concurrently the same callback may be invoked from different tasks.
/// All methods have default no-op implementations.
pub trait DigitizeProgressCallback: Send + Sync {
    /// Called once per document before the first page is recognized.
    ///
    /// # Arguments
    /// * `document_id`: identifier the report and corrections are keyed by
    /// * `total_pages`: pages that will be recognized
    fn on_document_start(&self, document_id: &str, total_pages: usize) {
        let _ = (document_id, total_pages);
    }

    /// Called just before a page is sent to the recognizer (1-indexed).
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page has been recognized.
    ///
    /// # Arguments
    /// * `token_count`: words recognized on the page after cleanup
    fn on_page_complete(&self, page_num: usize, total_pages: usize, token_count: usize) {
        let _ = (page_num, total_pages, token_count);
    }

    /// Called when recognition fails on a page. The document is aborted
    /// right after this call.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after extraction finished.
    ///
    /// # Arguments
    /// * `test_count`: tests in the served report
    /// * `corrected`: whether a stored correction replaced the computed report
    fn on_document_complete(&self, document_id: &str, test_count: usize, corrected: bool) {
        let _ = (document_id, test_count, corrected);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl DigitizeProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::DigitizeConfig`].
pub type ProgressCallback = Arc<dyn DigitizeProgressCallback>;
