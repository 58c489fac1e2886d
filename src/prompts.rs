//! Prompts for vision-based word detection.
//!
//! The vision engine is used strictly as a recognizer: it reports the words
//! it sees and where, and nothing else. Field and test extraction stay in the
//! deterministic pipeline so the same page always yields the same report.
//!
//! Callers can override the default via
//! [`crate::config::DigitizeConfig::system_prompt`].

/// Default system prompt for detecting words on a lab-report page image.
///
/// The reply format is what [`crate::pipeline::recognize::parse_token_json`]
/// accepts.
pub const WORD_DETECTION_PROMPT: &str = r#"You are a precise OCR engine.
List every word printed on the page image.

Follow these rules precisely:

1. WORDS
   - One entry per whitespace-separated word, exactly as printed
   - Keep punctuation attached to the word it touches ("Name:", "g/dl")
   - Do NOT correct spelling, units or numbers
   - Do NOT merge words from different lines

2. GEOMETRY
   - "bbox" is [x0, y0, x1, y1], the word's box as fractions of the page
     width and height, origin at the top-left corner, all values in [0, 1]

3. CONFIDENCE
   - "confidence" is your certainty that the text is read correctly, in [0, 1]

4. OUTPUT FORMAT
   - Output ONLY a JSON array, no commentary and no markdown fences:
     [{"text": "Hemoglobin", "bbox": [0.08, 0.41, 0.21, 0.43], "confidence": 0.97}]
   - Output [] if the page has no text"#;

/// User text accompanying the page image.
pub const PAGE_INSTRUCTION: &str = "Detect all words on this page.";
