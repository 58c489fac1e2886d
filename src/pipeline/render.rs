//! Page images: decode scans and rasterise PDF pages to `DynamicImage`.
//!
//! ## Why spawn_blocking?
//!
//! Image decoding is CPU-bound, and the `pdfium-render` crate wraps the
//! pdfium C++ library, which uses thread-local state internally and is not
//! safe to call from async contexts. `tokio::task::spawn_blocking` moves the
//! work onto the blocking thread pool so Tokio workers never stall.
//!
//! ## Sizing
//!
//! PDF pages are rasterised at `dpi` (72 points per inch), then clamped so
//! the longest edge stays within `max_rendered_pixels`. Scans have no
//! physical size and are only clamped. Token geometry is normalised, so
//! resizing never changes the recognised layout.

use crate::config::DigitizeConfig;
use crate::error::DigitizeError;
use crate::pipeline::input::{Submission, SubmissionKind};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// Load every page image of a submission, in page order.
///
/// # Returns
/// A vector of `(page_index_0based, DynamicImage)` tuples. Token dumps have
/// no page images and yield an empty vector.
pub async fn load_pages(
    submission: &Submission,
    config: &DigitizeConfig,
) -> Result<Vec<(usize, DynamicImage)>, DigitizeError> {
    let path = submission.path().to_path_buf();
    let max_pixels = config.max_rendered_pixels;
    let dpi = config.dpi;
    let kind = submission.kind;

    tokio::task::spawn_blocking(move || match kind {
        SubmissionKind::Image => {
            decode_image_blocking(&path, max_pixels).map(|img| vec![(0, img)])
        }
        SubmissionKind::Pdf => render_pdf_blocking(&path, dpi, max_pixels),
        SubmissionKind::Tokens => Ok(Vec::new()),
    })
    .await
    .map_err(|e| DigitizeError::Internal(format!("Render task panicked: {}", e)))?
}

/// Decode a PNG/JPEG scan and shrink it to the pixel cap.
fn decode_image_blocking(path: &Path, max_pixels: u32) -> Result<DynamicImage, DigitizeError> {
    let img = image::open(path).map_err(|e| DigitizeError::RasterisationFailed {
        path: path.to_path_buf(),
        page: 1,
        detail: e.to_string(),
    })?;

    let img = if img.width().max(img.height()) > max_pixels {
        img.resize(max_pixels, max_pixels, image::imageops::FilterType::Triangle)
    } else {
        img
    };
    debug!(
        "Decoded {} → {}x{} px",
        path.display(),
        img.width(),
        img.height()
    );
    Ok(img)
}

/// Pixel size of a page measured in points, rendered at `dpi` and shrunk
/// proportionally so neither edge exceeds `max_pixels`.
fn page_pixel_size(width_pts: f32, height_pts: f32, dpi: u32, max_pixels: u32) -> (u32, u32) {
    let scale = dpi as f32 / 72.0;
    let width = (width_pts * scale).max(1.0);
    let height = (height_pts * scale).max(1.0);

    let longest = width.max(height);
    let ratio = if longest > max_pixels as f32 {
        max_pixels as f32 / longest
    } else {
        1.0
    };
    (
        ((width * ratio).round() as u32).max(1),
        ((height * ratio).round() as u32).max(1),
    )
}

/// Blocking implementation of PDF page rendering.
fn render_pdf_blocking(
    pdf_path: &Path,
    dpi: u32,
    max_pixels: u32,
) -> Result<Vec<(usize, DynamicImage)>, DigitizeError> {
    let pdfium = Pdfium::default();

    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| DigitizeError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let mut results = Vec::with_capacity(total_pages);

    for (idx, page) in pages.iter().enumerate() {
        let (width_px, height_px) =
            page_pixel_size(page.width().value, page.height().value, dpi, max_pixels);
        let render_config = PdfRenderConfig::new()
            .set_target_width(width_px as i32)
            .set_target_height(height_px as i32);

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            DigitizeError::RasterisationFailed {
                path: pdf_path.to_path_buf(),
                page: idx + 1,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );

        results.push((idx, image));
    }

    Ok(results)
}
