//! Confidence scoring from upstream recognition confidences.
//!
//! A field's score is the mean recognition confidence of the tokens its
//! words came from. Words are resolved to tokens by case-insensitive text
//! equality against the *first* token with that text on the page; an
//! identical word elsewhere on the page can therefore lend its confidence to
//! the field. This imprecision is known and kept.

use crate::model::{clamp_unit, Token};
use crate::pipeline::extract::FieldCapture;
use std::collections::BTreeMap;

/// Score when words were given but none resolved to a token.
pub const UNRESOLVED_CONFIDENCE: f64 = 0.6;

/// Score when there were no words to look up at all.
pub const NO_EVIDENCE_CONFIDENCE: f64 = 0.5;

/// Mean confidence of the tokens matching `words`, rounded to 3 decimals.
pub fn score_words<S: AsRef<str>>(words: &[S], tokens: &[Token]) -> f64 {
    let found: Vec<f64> = words
        .iter()
        .filter_map(|w| {
            let w = w.as_ref().to_lowercase();
            tokens
                .iter()
                .find(|t| t.text.to_lowercase() == w)
                .map(|t| t.confidence)
        })
        .collect();

    if found.is_empty() {
        return if words.is_empty() {
            NO_EVIDENCE_CONFIDENCE
        } else {
            UNRESOLVED_CONFIDENCE
        };
    }

    let mean = found.iter().sum::<f64>() / found.len() as f64;
    clamp_unit((mean * 1000.0).round() / 1000.0)
}

/// Per-field confidence for every captured patient field.
pub fn score_patient_fields(captures: &[FieldCapture], tokens: &[Token]) -> BTreeMap<String, f64> {
    captures
        .iter()
        .map(|c| (c.field.to_string(), score_words(&c.words, tokens)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BoundingBox;

    fn tok(text: &str, conf: f64) -> Token {
        Token::new(text, BoundingBox::UNIT, conf)
    }

    #[test]
    fn mean_of_resolved_words_rounded() {
        let tokens = vec![tok("Hemoglobin", 0.9), tok("13.5", 0.8), tok("g/dl", 0.7)];
        assert_eq!(score_words(&["hemoglobin", "13.5", "g/dl"], &tokens), 0.8);
        let tokens = vec![tok("a", 0.1), tok("b", 0.2), tok("c", 0.2)];
        assert_eq!(score_words(&["a", "b", "c"], &tokens), 0.167);
    }

    #[test]
    fn unresolved_words_are_ignored_in_the_mean() {
        let tokens = vec![tok("Glucose", 0.95)];
        assert_eq!(score_words(&["Glucose", "missing"], &tokens), 0.95);
    }

    #[test]
    fn defaults_when_nothing_resolves() {
        let tokens = vec![tok("Urea", 0.9)];
        assert_eq!(score_words(&["Creatinine"], &tokens), UNRESOLVED_CONFIDENCE);
        let none: [&str; 0] = [];
        assert_eq!(score_words(&none, &tokens), NO_EVIDENCE_CONFIDENCE);
    }

    #[test]
    fn first_matching_token_wins() {
        let tokens = vec![tok("WBC", 0.2), tok("WBC", 1.0)];
        assert_eq!(score_words(&["WBC"], &tokens), 0.2);
    }

    #[test]
    fn patient_fields_keyed_by_name() {
        let captures = vec![FieldCapture {
            field: "sex",
            value: "M".into(),
            words: vec!["Male".into()],
        }];
        let scores = score_patient_fields(&captures, &[tok("male", 0.88)]);
        assert_eq!(scores.get("sex"), Some(&0.88));
    }
}
