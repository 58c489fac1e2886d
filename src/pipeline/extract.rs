//! Rule-based field and test extraction over denoised text.
//!
//! Each rule is a variant pairing one anchored, case-insensitive pattern with
//! the normaliser for what it captures. Adding a field or a new kind of test
//! line means adding a variant; the scanning loops never change.
//!
//! Field rules return at most one capture each. The single test rule scans
//! left to right for non-overlapping `<label> <number> <unit>` runs and
//! rejects labels that look like report metadata ("Reference Range", "Method",
//! "Ordered by", "Report date").

use crate::model::UNKNOWN;
use crate::pipeline::normalize::normalize_unit;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::debug;

// ── Patient fields ───────────────────────────────────────────────────────

/// Patient keys that always appear in the raw extraction.
pub const PATIENT_FIELDS: [&str; 7] = ["name", "age", "sex", "date", "dob", "id", "visit_id"];

/// Words that start another field; a captured name stops before them.
const FIELD_LABELS: &[&str] = &[
    "age", "sex", "gender", "date", "dob", "id", "visit", "mrn", "uhid", "ref", "referred",
    "patient", "name",
];

static RE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:patient\s*name|name)\s*[:\-]?\s*([A-Za-z .]+)").unwrap());

static RE_AGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bage\s*[:\-]?\s*(\d{1,3})").unwrap());

static RE_SEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bsex\s*[:\-]?\s*(male|female|m|f)\b").unwrap());

static RE_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(date|dob)\s*[:\-]?\s*(\d{2}/\d{2}/\d{4})").unwrap());

/// One patient-field rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// "Patient Name" / "Name" → letters, spaces, periods.
    Name,
    /// "Age" → 1–3 digit integer.
    Age,
    /// "Sex" → Male/Female/M/F, stored as one upper-case letter.
    Sex,
    /// "Date" / "DOB" → `dd/mm/yyyy`; the label decides `dob` vs `date`.
    Date,
}

/// A field value found by a [`FieldRule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCapture {
    pub field: &'static str,
    pub value: String,
    /// Words of the captured text as it appeared on the page.
    pub words: Vec<String>,
}

impl FieldRule {
    pub const ALL: [FieldRule; 4] =
        [FieldRule::Name, FieldRule::Age, FieldRule::Sex, FieldRule::Date];

    fn pattern(self) -> &'static Regex {
        match self {
            FieldRule::Name => &RE_NAME,
            FieldRule::Age => &RE_AGE,
            FieldRule::Sex => &RE_SEX,
            FieldRule::Date => &RE_DATE,
        }
    }

    /// Run the rule over `text`, returning the first capture if any.
    pub fn apply(self, text: &str) -> Option<FieldCapture> {
        let caps = self.pattern().captures(text)?;
        self.capture(&caps)
    }

    fn capture(self, caps: &Captures<'_>) -> Option<FieldCapture> {
        match self {
            FieldRule::Name => {
                let name = trim_at_next_label(&caps[1]);
                if name.is_empty() {
                    return None;
                }
                Some(FieldCapture {
                    field: "name",
                    words: split_words(&name),
                    value: name,
                })
            }
            FieldRule::Age => Some(FieldCapture {
                field: "age",
                value: caps[1].to_string(),
                words: vec![caps[1].to_string()],
            }),
            FieldRule::Sex => {
                let raw = &caps[1];
                let letter = raw.chars().next()?.to_ascii_uppercase();
                Some(FieldCapture {
                    field: "sex",
                    value: letter.to_string(),
                    words: vec![raw.to_string()],
                })
            }
            FieldRule::Date => {
                let field = if caps[1].eq_ignore_ascii_case("dob") {
                    "dob"
                } else {
                    "date"
                };
                Some(FieldCapture {
                    field,
                    value: caps[2].to_string(),
                    words: vec![caps[2].to_string()],
                })
            }
        }
    }
}

/// Apply every field rule once.
pub fn extract_fields(text: &str) -> Vec<FieldCapture> {
    FieldRule::ALL
        .iter()
        .filter_map(|rule| rule.apply(text))
        .collect()
}

/// Raw patient mapping: every key of [`PATIENT_FIELDS`], `UNKNOWN` when not captured.
pub fn patient_map(captures: &[FieldCapture]) -> Map<String, Value> {
    let mut map: Map<String, Value> = PATIENT_FIELDS
        .iter()
        .map(|k| (k.to_string(), Value::String(UNKNOWN.to_string())))
        .collect();
    for c in captures {
        map.insert(c.field.to_string(), Value::String(c.value.clone()));
    }
    map
}

fn trim_at_next_label(raw: &str) -> String {
    raw.split_whitespace()
        .take_while(|w| {
            let w = w.trim_matches('.').to_lowercase();
            !FIELD_LABELS.contains(&w.as_str())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn split_words(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

// ── Test results ────────────────────────────────────────────────────────────────

/// Labels containing any of these are metadata, not results.
pub const METADATA_KEYWORDS: [&str; 5] = ["reference", "range", "method", "ordered", "report"];

static RE_LABELED_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([A-Za-z][A-Za-z0-9 ()\-]{2,}?)\s+([-+]?\d+(?:\.\d+)?)\s*([A-Za-z/%().\-]*)")
        .unwrap()
});

/// One test-line rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestRule {
    /// `<label> <signed number> <unit>` on one line of text.
    LabeledValue,
}

/// A test result before confidence scoring and normalisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCandidate {
    pub name: String,
    pub value: String,
    pub unit: String,
    pub matched_tokens: Vec<String>,
}

impl TestCandidate {
    /// Raw mapping handed to the schema normaliser.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("name".into(), Value::String(self.name.clone()));
        map.insert("value".into(), Value::String(self.value.clone()));
        map.insert("unit".into(), Value::String(self.unit.clone()));
        map.insert(
            "matched_tokens".into(),
            Value::Array(self.matched_tokens.iter().cloned().map(Value::String).collect()),
        );
        map
    }
}

impl TestRule {
    pub const ALL: [TestRule; 1] = [TestRule::LabeledValue];

    fn pattern(self) -> &'static Regex {
        match self {
            TestRule::LabeledValue => &RE_LABELED_VALUE,
        }
    }

    /// Scan `text` for every non-overlapping accepted match.
    pub fn scan(self, text: &str) -> Vec<TestCandidate> {
        self.pattern()
            .captures_iter(text)
            .filter_map(|caps| self.candidate(&caps))
            .collect()
    }

    fn candidate(self, caps: &Captures<'_>) -> Option<TestCandidate> {
        match self {
            TestRule::LabeledValue => {
                let label = caps[1].trim();
                if label.chars().count() < 3 {
                    return None;
                }
                if is_metadata_label(label) {
                    debug!("Rejected metadata line '{}'", label);
                    return None;
                }
                let value = caps[2].to_string();
                let raw_unit = caps[3].trim();

                let mut matched_tokens = split_words(label);
                matched_tokens.push(value.clone());
                if !raw_unit.is_empty() {
                    matched_tokens.push(raw_unit.to_string());
                }

                Some(TestCandidate {
                    name: label.to_string(),
                    value,
                    unit: normalize_unit(raw_unit),
                    matched_tokens,
                })
            }
        }
    }
}

/// True when `label` contains a metadata keyword, case-insensitively.
pub fn is_metadata_label(label: &str) -> bool {
    let lower = label.to_lowercase();
    METADATA_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Apply every test rule, in rule order.
pub fn extract_tests(text: &str) -> Vec<TestCandidate> {
    TestRule::ALL.iter().flat_map(|rule| rule.scan(text)).collect()
}
