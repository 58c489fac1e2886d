//! Reading-order reconstruction: unordered word boxes → lines → text.
//!
//! Recognition engines return words in whatever order their detector emits
//! them. Pattern matching downstream needs "Hemoglobin 13.5 g/dl" to come out
//! as one line in left-to-right order, so we rebuild lines from geometry:
//!
//! 1. sort every token by vertical centre, then by left edge;
//! 2. derive a line threshold from the median word height (robust against a
//!    few oversized headings), floored so tiny or empty pages still work;
//! 3. walk the sorted tokens, closing a line whenever a token's centre drifts
//!    more than the threshold from the running mean centre of the line;
//! 4. sort each finished line left to right.

use crate::model::{Line, Token};
use tracing::debug;

/// Default multiplier applied to the median token height.
pub const DEFAULT_LINE_HEIGHT_FACTOR: f64 = 0.6;

/// Default lower bound on the line threshold (normalised page units).
pub const DEFAULT_MIN_LINE_THRESHOLD: f64 = 0.008;

/// Lines plus the concatenated page text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderedPage {
    pub lines: Vec<Line>,
    /// Lines joined by `\n`, tokens within a line by a single space.
    pub text: String,
}

/// Order tokens with the default threshold parameters.
pub fn order_tokens(tokens: Vec<Token>) -> OrderedPage {
    order_tokens_with(tokens, DEFAULT_LINE_HEIGHT_FACTOR, DEFAULT_MIN_LINE_THRESHOLD)
}

/// Order tokens into lines using `max(factor × median height, floor)` as the
/// line-membership threshold.
pub fn order_tokens_with(mut tokens: Vec<Token>, factor: f64, floor: f64) -> OrderedPage {
    if tokens.is_empty() {
        return OrderedPage::default();
    }

    tokens.sort_by(|a, b| {
        a.bbox
            .y_center()
            .total_cmp(&b.bbox.y_center())
            .then(a.bbox.x0.total_cmp(&b.bbox.x0))
    });

    let threshold = line_threshold(&tokens, factor, floor);

    let mut lines: Vec<Line> = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    let mut running_avg = 0.0;

    for token in tokens {
        let yc = token.bbox.y_center();
        if !current.is_empty() && (yc - running_avg).abs() > threshold {
            lines.push(finish_line(std::mem::take(&mut current)));
        }
        if current.is_empty() {
            running_avg = yc;
        } else {
            // Incremental mean over the tokens already on this line.
            let n = current.len() as f64;
            running_avg = (running_avg * n + yc) / (n + 1.0);
        }
        current.push(token);
    }
    if !current.is_empty() {
        lines.push(finish_line(current));
    }

    let text = lines.iter().map(Line::text).collect::<Vec<_>>().join("\n");
    debug!(
        "Ordered tokens into {} lines (threshold {:.4})",
        lines.len(),
        threshold
    );

    OrderedPage { lines, text }
}

fn line_threshold(tokens: &[Token], factor: f64, floor: f64) -> f64 {
    let heights: Vec<f64> = tokens.iter().map(|t| t.bbox.height()).collect();
    (factor * median(heights)).max(floor)
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn finish_line(mut tokens: Vec<Token>) -> Line {
    tokens.sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));
    Line { tokens }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BoundingBox;

    fn tok(text: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> Token {
        Token::new(text, BoundingBox::new(x0, y0, x1, y1), 0.9)
    }

    fn report_tokens() -> Vec<Token> {
        vec![
            tok("Name:", 0.05, 0.10, 0.12, 0.12),
            tok("John", 0.13, 0.101, 0.18, 0.121),
            tok("Smith", 0.19, 0.099, 0.25, 0.119),
            tok("Hemoglobin", 0.05, 0.30, 0.20, 0.32),
            tok("13.5", 0.40, 0.302, 0.45, 0.322),
            tok("g/dl", 0.50, 0.301, 0.55, 0.321),
        ]
    }

    #[test]
    fn empty_input_gives_empty_output() {
        let page = order_tokens(vec![]);
        assert!(page.lines.is_empty());
        assert_eq!(page.text, "");
    }

    #[test]
    fn single_token_is_one_line() {
        let page = order_tokens(vec![tok("Urea", 0.1, 0.1, 0.2, 0.12)]);
        assert_eq!(page.lines.len(), 1);
        assert_eq!(page.text, "Urea");
    }

    #[test]
    fn reverse_visual_order_is_restored() {
        let mut tokens = report_tokens();
        tokens.reverse();
        let page = order_tokens(tokens);
        assert_eq!(page.text, "Name: John Smith\nHemoglobin 13.5 g/dl");
    }

    #[test]
    fn reordering_sorted_output_is_idempotent() {
        let first = order_tokens(report_tokens());
        let flattened: Vec<Token> = first
            .lines
            .iter()
            .flat_map(|l| l.tokens.iter().cloned())
            .collect();
        let second = order_tokens(flattened);
        assert_eq!(first, second);
    }

    #[test]
    fn slightly_skewed_words_stay_on_one_line() {
        // A line that drifts downward by less than the threshold per word.
        let tokens = vec![
            tok("Serum", 0.10, 0.500, 0.20, 0.520),
            tok("Creatinine", 0.22, 0.506, 0.40, 0.526),
            tok("1.1", 0.42, 0.512, 0.48, 0.532),
            tok("mg/dl", 0.50, 0.516, 0.60, 0.536),
        ];
        let page = order_tokens(tokens);
        assert_eq!(page.lines.len(), 1);
        assert_eq!(page.text, "Serum Creatinine 1.1 mg/dl");
    }

    #[test]
    fn zero_height_tokens_use_threshold_floor() {
        let tokens = vec![
            tok("a", 0.1, 0.100, 0.2, 0.100),
            tok("b", 0.3, 0.105, 0.4, 0.105),
            tok("c", 0.1, 0.200, 0.2, 0.200),
        ];
        let page = order_tokens(tokens);
        assert_eq!(page.text, "a b\nc");
    }

    #[test]
    fn median_handles_even_count() {
        assert_eq!(median(vec![1.0, 3.0, 2.0, 4.0]), 2.5);
        assert_eq!(median(vec![5.0]), 5.0);
    }
}
