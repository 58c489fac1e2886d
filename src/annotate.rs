//! Visual review aid: box the words a report was built from.
//!
//! Operators check a report by looking at the page with every word that fed
//! a patient field or a test highlighted in green. Matching is by text only
//! (case-insensitive), so every occurrence of a highlighted word is boxed.

use crate::digitize::DigitizedDocument;
use crate::error::DigitizeError;
use crate::model::{BoundingBox, Report, Sex, Token, UNKNOWN};
use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

const HIGHLIGHT: Rgba<u8> = Rgba([0, 255, 0, 255]);
const STROKE_PX: i32 = 2;

/// Words to highlight: known patient values (whole and word by word) and
/// every test's matched tokens.
pub fn highlight_words(report: &Report) -> Vec<String> {
    let p = &report.patient;
    let sex = match p.sex {
        Sex::M => Some("M".to_string()),
        Sex::F => Some("F".to_string()),
        Sex::Unknown => None,
    };
    let patient_values = [
        Some(p.name.clone()),
        p.age.map(|a| a.to_string()),
        sex,
        p.id.clone(),
        Some(p.dob.clone()),
        Some(p.visit_id.clone()),
        Some(p.date.clone()),
    ];

    let mut words = Vec::new();
    for value in patient_values.into_iter().flatten() {
        if value.is_empty() || value == UNKNOWN {
            continue;
        }
        let parts: Vec<&str> = value.split_whitespace().collect();
        if parts.len() > 1 {
            words.extend(parts.iter().map(|w| w.to_string()));
        }
        words.push(value);
    }
    for test in &report.tests {
        words.extend(test.matched_tokens.iter().cloned());
    }
    words
}

/// Boxes of the tokens whose text equals a highlight word.
pub fn highlight_boxes<'a>(tokens: &'a [Token], words: &[String]) -> Vec<&'a BoundingBox> {
    let wanted: HashSet<String> = words.iter().map(|w| w.to_lowercase()).collect();
    tokens
        .iter()
        .filter(|t| wanted.contains(&t.text.to_lowercase()))
        .map(|t| &t.bbox)
        .collect()
}

/// Copy of `image` with 2 px green boxes around the report's source words.
pub fn annotate_image(image: &DynamicImage, tokens: &[Token], report: &Report) -> RgbaImage {
    let mut canvas = image.to_rgba8();
    let (w, h) = canvas.dimensions();
    let words = highlight_words(report);

    for bbox in highlight_boxes(tokens, &words) {
        for inset in 0..STROKE_PX {
            if let Some(rect) = pixel_rect(bbox, w, h, inset) {
                draw_hollow_rect_mut(&mut canvas, rect, HIGHLIGHT);
            }
        }
    }
    canvas
}

/// Normalised box → pixel rectangle shrunk by `inset` on each side.
fn pixel_rect(bbox: &BoundingBox, w: u32, h: u32, inset: i32) -> Option<Rect> {
    let x0 = (bbox.x0 * w as f64) as i32 + inset;
    let y0 = (bbox.y0 * h as f64) as i32 + inset;
    let x1 = (bbox.x1 * w as f64) as i32 - inset;
    let y1 = (bbox.y1 * h as f64) as i32 - inset;
    (x1 > x0 && y1 > y0).then(|| Rect::at(x0, y0).of_size((x1 - x0) as u32, (y1 - y0) as u32))
}

/// Write `annotated_<document_id>_p<page>.png` for every page that has an image.
pub fn save_annotations(
    document: &DigitizedDocument,
    dir: &Path,
) -> Result<Vec<PathBuf>, DigitizeError> {
    std::fs::create_dir_all(dir).map_err(|e| DigitizeError::OutputWriteFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let report = &document.report.report;
    let mut written = Vec::new();
    for page in &document.pages {
        let Some(image) = page.image.as_ref() else {
            continue;
        };
        let path = dir.join(format!("annotated_{}_p{}.png", document.document_id, page.page));
        annotate_image(image, &page.tokens, report)
            .save(&path)
            .map_err(|e| DigitizeError::OutputWriteFailed {
                path: path.clone(),
                source: match e {
                    image::ImageError::IoError(io) => io,
                    other => std::io::Error::other(other.to_string()),
                },
            })?;
        debug!("Annotated page {} → {}", page.page, path.display());
        written.push(path);
    }
    Ok(written)
}
