//! Boilerplate removal before pattern matching.
//!
//! Scanned reports repeat the lab's letterhead, "CONFIDENTIAL" stamps and
//! page footers many times per page. Those words confuse the test pattern
//! (a footer line followed by a page number looks like a test), so we drop
//! any word that is on the boilerplate list or that occurs more often than
//! `max_frequency` times on the page. Survivors keep their order and case.

use std::collections::{HashMap, HashSet};

/// Words dropped regardless of frequency.
pub const DEFAULT_BOILERPLATE: &[&str] = &["confidential", "sample", "copy", "report", "hospital"];

/// Default page frequency above which a word is treated as noise.
pub const DEFAULT_MAX_WORD_FREQUENCY: usize = 5;

/// Denoise `text` with the built-in boilerplate list and frequency limit.
pub fn denoise(text: &str) -> String {
    let boilerplate: HashSet<String> = DEFAULT_BOILERPLATE.iter().map(|w| w.to_string()).collect();
    denoise_with(text, &boilerplate, DEFAULT_MAX_WORD_FREQUENCY)
}

/// Denoise `text`. `boilerplate` entries must be lower-case.
///
/// The result is the surviving words joined by single spaces; line breaks in
/// the input are not preserved.
pub fn denoise_with(text: &str, boilerplate: &HashSet<String>, max_frequency: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for w in &words {
        *counts.entry(w.to_lowercase()).or_insert(0) += 1;
    }

    words
        .into_iter()
        .filter(|w| {
            let lower = w.to_lowercase();
            !boilerplate.contains(&lower)
                && counts.get(&lower).copied().unwrap_or(0) <= max_frequency
        })
        .collect::<Vec<_>>()
        .join(" ")
}
