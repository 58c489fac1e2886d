//! Pipeline stages for lab-report digitization.
//!
//! Each submodule implements exactly one transformation step. Everything
//! after `recognize` is pure and deterministic: the same tokens always give
//! the same report.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ recognize ──▶ order ──▶ denoise
//! (path/URL) (pages)   (base64)   (tokens)      (lines)   (text)
//!
//!       ──▶ extract ──▶ confidence ──▶ normalize
//!           (fields,    (scores)       (Report)
//!            tests)
//! ```
//!
//! 1. [`input`]: resolve a path or URL, sniff image/PDF/token dump, derive the document id
//! 2. [`render`]: decode scans or rasterise PDF pages in `spawn_blocking`
//! 3. [`encode`]: grayscale, contrast-stretch and PNG-encode each page for the vision engine
//! 4. [`recognize`]: page image → tokens, behind the [`recognize::Recognizer`] seam
//! 5. [`order`]: group tokens into visual lines, top to bottom, left to right
//! 6. [`denoise`]: drop boilerplate and page-frequent words
//! 7. [`extract`]: tagged rule list producing patient fields and test candidates
//! 8. [`confidence`]: mean recognition confidence behind each captured value
//! 9. [`normalize`]: coerce everything into the canonical [`crate::model::Report`]

pub mod confidence;
pub mod denoise;
pub mod encode;
pub mod extract;
pub mod input;
pub mod normalize;
pub mod order;
pub mod recognize;
pub mod render;
