//! Page preparation for the vision engine: grayscale, contrast stretch,
//! lossless PNG, base64.
//!
//! Lab reports are black ink on paper. Colour carries nothing the word
//! detector needs, so pages are sent as 8-bit luma, which also shrinks the
//! request body. Faded thermal prints and dim phone photos occupy a narrow
//! band of grey; stretching that band to the full 0..=255 range restores
//! the edge contrast of thin glyphs.
//!
//! PNG is lossless: JPEG ringing around thin glyphs turns "1" and "/" into
//! "l", exactly the corruptions the unit normaliser has to undo.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::{DynamicImage, GrayImage};
use std::io::Cursor;
use tracing::debug;

/// Pages whose luma spread is at least this wide are left as is.
const MIN_LUMA_SPREAD: u8 = 128;

/// Convert to 8-bit grayscale and widen a compressed luma range.
pub fn prepare_page(img: &DynamicImage) -> GrayImage {
    let mut gray = img.to_luma8();

    let (lo, hi) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if hi <= lo || hi - lo >= MIN_LUMA_SPREAD {
        return gray;
    }

    let span = (hi - lo) as u32;
    for p in gray.pixels_mut() {
        p[0] = (((p[0] - lo) as u32 * 255 + span / 2) / span) as u8;
    }
    debug!("Stretched page luma {}..={} to full range", lo, hi);
    gray
}

/// Prepare a page and encode it as a base64 PNG `ImageData`.
///
/// `detail: "high"` asks the engine to read the page at full resolution so
/// the small print of reference ranges survives.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let gray = DynamicImage::ImageLuma8(prepare_page(img));
    let mut buf = Vec::new();
    gray.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} grayscale page → {} bytes base64",
        gray.width(),
        gray.height(),
        b64.len()
    );

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
