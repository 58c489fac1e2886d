//! Schema normalisation: raw extraction mapping → canonical [`Report`].
//!
//! Everything upstream produces loosely-typed JSON (rule captures, vision
//! replies, operator corrections typed by hand). This stage is the single
//! place where values are coerced into the typed record, and it never fails:
//! a value that cannot be coerced is replaced by its safe default.
//!
//! | Field | Rule | Default |
//! |-------|------|---------|
//! | `unit` | trim, lower-case, OCR-corruption substitutions | `""` |
//! | `confidence` | numeric, clamped to `[0, 1]` | `0.0` |
//! | `sex` | first letter, upper-cased, must be `M`/`F` | `UNKNOWN` |
//! | `dob` / `date` | must match `dd/mm/yyyy` | `UNKNOWN` |
//! | `age` | non-negative integer | `null` |
//! | `name` / `visit_id` | non-empty string | `UNKNOWN` |
//! | `id` | non-empty string other than `UNKNOWN` | `null` |

use crate::model::{clamp_unit, Patient, Report, Sex, TestResult, UNKNOWN};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

/// Loosely-typed extraction result, before normalisation.
///
/// Corrections loaded from disk use the same shape, which is why both
/// computed and operator-supplied reports pass through [`normalize`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawExtraction {
    pub patient: Map<String, Value>,
    pub tests: Vec<Map<String, Value>>,
}

impl RawExtraction {
    /// Read a Report-shaped JSON value, ignoring whatever does not fit.
    pub fn from_value(value: &Value) -> Self {
        let patient = value
            .get("patient")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let tests = value
            .get("tests")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|t| t.as_object().cloned()).collect())
            .unwrap_or_default();
        Self { patient, tests }
    }
}

/// Coerce a raw extraction into a [`Report`].
pub fn normalize(raw: &RawExtraction) -> Report {
    let field = |key: &str| raw.patient.get(key);
    let patient = Patient {
        name: coerce_text(field("name")),
        age: coerce_age(field("age")),
        sex: coerce_sex(field("sex")),
        id: coerce_id(field("id")),
        dob: coerce_date(field("dob")),
        visit_id: coerce_text(field("visit_id")),
        date: coerce_date(field("date")),
    };

    let tests = raw
        .tests
        .iter()
        .map(|t| TestResult {
            name: scalar_string(t.get("name")).map(|s| s.trim().to_string()).unwrap_or_default(),
            value: scalar_string(t.get("value")).map(|s| s.trim().to_string()).unwrap_or_default(),
            unit: scalar_string(t.get("unit"))
                .map(|s| normalize_unit(&s))
                .unwrap_or_default(),
            matched_tokens: coerce_words(t.get("matched_tokens")),
            confidence: coerce_confidence(t.get("confidence")),
        })
        .collect();

    Report { patient, tests }
}

/// Normalise a Report-shaped JSON value (e.g. a stored correction).
pub fn normalize_value(value: &Value) -> Report {
    normalize(&RawExtraction::from_value(value))
}

// ── Units ────────────────────────────────────────────────────────────────

static RE_REPEATED_L: Lazy<Regex> = Lazy::new(|| Regex::new(r"dl{2,}").unwrap());

/// Fixed substitutions for common OCR corruptions of `/`, applied after
/// lower-casing.
const UNIT_SUBSTITUTIONS: &[(&str, &str)] = &[
    ("mgldl", "mg/dl"),
    ("gldl", "g/dl"),
    ("iuldl", "iu/dl"),
    ("mmolll", "mmol/l"),
];

/// Canonical unit spelling: trimmed, lower-case, OCR corruptions repaired.
///
/// A capital `I` read in place of `l` after `d` ("dI") becomes `dl`, runs of
/// `l` after `d` collapse to one, and `l` misread for `/` is restored in the
/// fixed cases of [`UNIT_SUBSTITUTIONS`]. The function is idempotent.
pub fn normalize_unit(unit: &str) -> String {
    let unit = unit.trim().replace("dI", "dl").to_lowercase();
    let mut unit = RE_REPEATED_L.replace_all(&unit, "dl").into_owned();
    for (from, to) in UNIT_SUBSTITUTIONS {
        if unit.contains(from) {
            unit = unit.replace(from, to);
        }
    }
    unit
}

// ── Field coercions ──────────────────────────────────────────────────────

static RE_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2}/\d{2}/\d{4}$").unwrap());

/// Strings as-is, numbers and booleans via `to_string`; null/arrays/objects → None.
fn scalar_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn coerce_text(value: Option<&Value>) -> String {
    scalar_string(value)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn coerce_id(value: Option<&Value>) -> Option<String> {
    scalar_string(value)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && s != UNKNOWN)
}

fn coerce_age(value: Option<&Value>) -> Option<u32> {
    let age = match value? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    let age = age.and_then(|a| u32::try_from(a).ok());
    if age.is_none() {
        debug!("Age {:?} is not an integer, dropping", value);
    }
    age
}

fn coerce_sex(value: Option<&Value>) -> Sex {
    let first = scalar_string(value)
        .and_then(|s| s.chars().find(|c| c.is_alphabetic()))
        .map(|c| c.to_ascii_uppercase());
    match first {
        Some('M') => Sex::M,
        Some('F') => Sex::F,
        _ => Sex::Unknown,
    }
}

fn coerce_date(value: Option<&Value>) -> String {
    scalar_string(value)
        .map(|s| s.trim().to_string())
        .filter(|s| RE_DATE.is_match(s))
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn coerce_confidence(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    raw.map(clamp_unit).unwrap_or(0.0)
}

fn coerce_words(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|v| scalar_string(Some(v))).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unit_corruptions_are_repaired() {
        assert_eq!(normalize_unit(" g/dI "), "g/dl");
        assert_eq!(normalize_unit("mg/dll"), "mg/dl");
        assert_eq!(normalize_unit("mgldl"), "mg/dl");
        assert_eq!(normalize_unit("MG/DL"), "mg/dl");
        assert_eq!(normalize_unit("gldl"), "g/dl");
        assert_eq!(normalize_unit("%"), "%");
        assert_eq!(normalize_unit(""), "");
    }

    #[test]
    fn unit_normalisation_is_idempotent() {
        for u in [
            "g/dI", "mgldl", "mgldll", "MGLDL", "dlll", "mmolll", "IU/dI", "10^3/uL", "fL", "%",
            "cells/cumm", "gldlll", "",
        ] {
            let once = normalize_unit(u);
            assert_eq!(normalize_unit(&once), once, "not idempotent for {u:?}");
        }
    }

    #[test]
    fn sex_takes_first_letter() {
        assert_eq!(coerce_sex(Some(&json!("female"))), Sex::F);
        assert_eq!(coerce_sex(Some(&json!(" m"))), Sex::M);
        assert_eq!(coerce_sex(Some(&json!("UNKNOWN"))), Sex::Unknown);
        assert_eq!(coerce_sex(Some(&json!("Other"))), Sex::Unknown);
        assert_eq!(coerce_sex(Some(&json!(7))), Sex::Unknown);
        assert_eq!(coerce_sex(None), Sex::Unknown);
    }

    #[test]
    fn dates_must_be_dd_mm_yyyy() {
        assert_eq!(coerce_date(Some(&json!("01/02/2023"))), "01/02/2023");
        assert_eq!(coerce_date(Some(&json!("1/2/2023"))), UNKNOWN);
        assert_eq!(coerce_date(Some(&json!("2023-02-01"))), UNKNOWN);
        assert_eq!(coerce_date(Some(&Value::Null)), UNKNOWN);
    }

    #[test]
    fn age_coercion() {
        assert_eq!(coerce_age(Some(&json!("45"))), Some(45));
        assert_eq!(coerce_age(Some(&json!(45))), Some(45));
        assert_eq!(coerce_age(Some(&json!(45.0))), Some(45));
        assert_eq!(coerce_age(Some(&json!("UNKNOWN"))), None);
        assert_eq!(coerce_age(Some(&json!(-3))), None);
        assert_eq!(coerce_age(Some(&json!(4.5))), None);
    }

    #[test]
    fn confidence_is_clamped_or_defaulted() {
        assert_eq!(coerce_confidence(Some(&json!(1.5))), 1.0);
        assert_eq!(coerce_confidence(Some(&json!(-0.1))), 0.0);
        assert_eq!(coerce_confidence(Some(&json!("0.75"))), 0.75);
        assert_eq!(coerce_confidence(Some(&json!("high"))), 0.0);
        assert_eq!(coerce_confidence(None), 0.0);
    }

    #[test]
    fn partial_value_fills_every_field() {
        let report = normalize_value(&json!({"patient": {"name": "Asha Rao", "id": "UNKNOWN"}}));
        assert_eq!(report.patient.name, "Asha Rao");
        assert_eq!(report.patient.id, None);
        assert_eq!(report.patient.visit_id, UNKNOWN);
        assert_eq!(report.patient.age, None);
        assert!(report.tests.is_empty());
    }

    #[test]
    fn garbage_never_panics() {
        for v in [json!(null), json!(42), json!("text"), json!({"patient": 3, "tests": {"a": 1}})] {
            assert_eq!(normalize_value(&v), Report::default());
        }
    }

    #[test]
    fn tests_are_coerced() {
        let report = normalize_value(&json!({
            "tests": [
                {"name": " Glucose ", "value": 95, "unit": "MgLdl", "confidence": "0.9",
                 "matched_tokens": ["Glucose", 95, "MgLdl"]},
                "not a test",
                {"name": "Urea"}
            ]
        }));
        assert_eq!(report.tests.len(), 2);
        let g = &report.tests[0];
        assert_eq!(g.name, "Glucose");
        assert_eq!(g.value, "95");
        assert_eq!(g.unit, "mg/dl");
        assert_eq!(g.confidence, 0.9);
        assert_eq!(g.matched_tokens, vec!["Glucose", "95", "MgLdl"]);
        assert_eq!(report.tests[1].unit, "");
        assert_eq!(report.tests[1].confidence, 0.0);
    }
}
