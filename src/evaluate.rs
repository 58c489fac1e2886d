//! Accuracy of produced reports against hand-labelled expectations.
//!
//! Expected records live next to each other as `<base>_expected.json`; the
//! matching actual record is `<results_dir>/<base>.json` (what
//! [`crate::correction::ReportStore`] writes). Values are compared on their
//! string form, case-insensitively, so `45` matches `"45"` and `"g/dL"`
//! matches `"g/dl"`.
//!
//! Scores are percentages rounded to two decimals:
//!
//! - **patient**: expected patient fields whose actual value matches, over the
//!   number of expected fields;
//! - **tests**: expected tests that have an actual test of the same name with
//!   matching value *and* unit, over the number of expected tests. An expected
//!   test with no same-named actual test is a full miss.

use crate::error::DigitizeError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Status reported when either side of a comparison is unavailable.
pub const MISSING_STATUS: &str = "missing";

/// Suffix identifying expected-record files.
pub const EXPECTED_SUFFIX: &str = "_expected.json";

/// Outcome for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Evaluation {
    Scored(ScoredEvaluation),
    /// `{"status": "missing"}`
    Missing { status: String },
}

impl Evaluation {
    fn missing() -> Self {
        Evaluation::Missing {
            status: MISSING_STATUS.to_string(),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Evaluation::Missing { .. })
    }
}

/// Scores and per-item details for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEvaluation {
    pub patient_accuracy: f64,
    pub test_accuracy: f64,
    pub patient_results: BTreeMap<String, bool>,
    pub test_results: Vec<TestComparison>,
}

/// How one expected test fared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestComparison {
    pub name: String,
    pub value_match: bool,
    pub unit_match: bool,
}

impl TestComparison {
    pub fn is_match(&self) -> bool {
        self.value_match && self.unit_match
    }
}

/// Compare an actual Report-shaped record against the expected one.
///
/// Either side being anything but a non-empty JSON object yields the
/// `missing` status.
pub fn evaluate_report(expected: &Value, actual: &Value) -> Evaluation {
    let (Some(expected), Some(actual)) = (non_empty_object(expected), non_empty_object(actual))
    else {
        return Evaluation::missing();
    };

    let empty = Map::new();
    let exp_patient = expected.get("patient").and_then(Value::as_object).unwrap_or(&empty);
    let act_patient = actual.get("patient").and_then(Value::as_object).unwrap_or(&empty);

    let patient_results: BTreeMap<String, bool> = exp_patient
        .iter()
        .map(|(key, exp)| {
            let hit = act_patient.get(key).is_some_and(|act| same(Some(exp), Some(act)));
            (key.clone(), hit)
        })
        .collect();
    let patient_hits = patient_results.values().filter(|hit| **hit).count();

    let exp_tests = tests_of(expected);
    let act_tests = tests_of(actual);
    let test_results: Vec<TestComparison> = exp_tests
        .iter()
        .map(|exp| {
            let name = string_form(exp.get("name"));
            match act_tests
                .iter()
                .find(|act| string_form(act.get("name")).to_lowercase() == name.to_lowercase())
            {
                Some(act) => TestComparison {
                    value_match: same(exp.get("value"), act.get("value")),
                    unit_match: same(exp.get("unit"), act.get("unit")),
                    name,
                },
                None => TestComparison {
                    name,
                    value_match: false,
                    unit_match: false,
                },
            }
        })
        .collect();
    let test_hits = test_results.iter().filter(|t| t.is_match()).count();

    Evaluation::Scored(ScoredEvaluation {
        patient_accuracy: percentage(patient_hits, patient_results.len()),
        test_accuracy: percentage(test_hits, test_results.len()),
        patient_results,
        test_results,
    })
}

/// Evaluate every `<base>_expected.json` in `expected_dir`.
///
/// Unreadable or unparsable files on either side yield `missing` for that
/// document; only an unreadable `expected_dir` is an error.
pub fn evaluate_dir(
    expected_dir: &Path,
    results_dir: &Path,
) -> Result<BTreeMap<String, Evaluation>, DigitizeError> {
    let entries = std::fs::read_dir(expected_dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => DigitizeError::PermissionDenied {
            path: expected_dir.to_path_buf(),
        },
        _ => DigitizeError::FileNotFound {
            path: expected_dir.to_path_buf(),
        },
    })?;

    let mut summary = BTreeMap::new();
    for entry in entries.flatten() {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let Some(base) = file_name.strip_suffix(EXPECTED_SUFFIX) else {
            continue;
        };

        let expected = load_lenient(&entry.path());
        let actual = load_lenient(&results_dir.join(format!("{base}.json")));
        let evaluation = evaluate_report(&expected, &actual);
        debug!("Evaluated '{}': {:?}", base, evaluation);
        summary.insert(base.to_string(), evaluation);
    }
    Ok(summary)
}

fn load_lenient(path: &Path) -> Value {
    let parsed = std::fs::read(path)
        .map_err(|e| e.to_string())
        .and_then(|b| serde_json::from_slice::<Value>(&b).map_err(|e| e.to_string()));
    match parsed {
        Ok(v) => v,
        Err(e) => {
            warn!("Cannot load {}: {}", path.display(), e);
            Value::Null
        }
    }
}

fn non_empty_object(v: &Value) -> Option<&Map<String, Value>> {
    v.as_object().filter(|m| !m.is_empty())
}

fn tests_of(record: &Map<String, Value>) -> Vec<&Map<String, Value>> {
    record
        .get("tests")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default()
}

/// String form used for comparison: strings as-is, other values as JSON text.
fn string_form(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn same(a: Option<&Value>, b: Option<&Value>) -> bool {
    string_form(a).to_lowercase() == string_form(b).to_lowercase()
}

fn percentage(hits: usize, total: usize) -> f64 {
    let ratio = hits as f64 / total.max(1) as f64;
    (ratio * 10_000.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scored(e: Evaluation) -> ScoredEvaluation {
        match e {
            Evaluation::Scored(s) => s,
            Evaluation::Missing { .. } => panic!("expected a score"),
        }
    }

    #[test]
    fn exact_match_scores_one_hundred() {
        let report = json!({
            "patient": {"name": "John Smith", "age": 45},
            "tests": [{"name": "Hemoglobin", "value": "13.5", "unit": "g/dl"}]
        });
        let s = scored(evaluate_report(&report, &report));
        assert_eq!(s.patient_accuracy, 100.0);
        assert_eq!(s.test_accuracy, 100.0);
    }

    #[test]
    fn comparison_is_case_insensitive_on_string_form() {
        let expected = json!({
            "patient": {"name": "JOHN SMITH", "age": 45, "sex": "M"},
            "tests": [{"name": "hemoglobin", "value": 13.5, "unit": "g/dL"}]
        });
        let actual = json!({
            "patient": {"name": "John Smith", "age": "45", "sex": "F"},
            "tests": [{"name": "Hemoglobin", "value": "13.5", "unit": "g/dl"}]
        });
        let s = scored(evaluate_report(&expected, &actual));
        assert_eq!(s.patient_accuracy, 66.67);
        assert_eq!(s.patient_results["sex"], false);
        assert_eq!(s.test_accuracy, 100.0);
    }

    #[test]
    fn unmatched_expected_test_is_a_full_miss() {
        let expected = json!({
            "patient": {},
            "tests": [
                {"name": "Glucose", "value": "90", "unit": "mg/dl"},
                {"name": "Urea", "value": "20", "unit": "mg/dl"},
                {"name": "Sodium", "value": "140", "unit": "mmol/l"}
            ]
        });
        let actual = json!({
            "patient": {},
            "tests": [
                {"name": "glucose", "value": "90", "unit": "mg/dl"},
                {"name": "Sodium", "value": "140", "unit": "mmol"}
            ]
        });
        let s = scored(evaluate_report(&expected, &actual));
        assert_eq!(s.test_accuracy, 33.33);
        assert_eq!(
            s.test_results[1],
            TestComparison { name: "Urea".into(), value_match: false, unit_match: false }
        );
        assert!(s.test_results[2].value_match && !s.test_results[2].unit_match);
        assert_eq!(s.patient_accuracy, 0.0);
    }

    #[test]
    fn empty_or_absent_records_are_missing() {
        let report = json!({"patient": {"name": "A"}});
        assert!(evaluate_report(&json!({}), &report).is_missing());
        assert!(evaluate_report(&report, &Value::Null).is_missing());
        assert_eq!(
            serde_json::to_value(evaluate_report(&Value::Null, &Value::Null)).unwrap(),
            json!({"status": "missing"})
        );
    }

    #[test]
    fn directory_evaluation_pairs_files_by_base_name() {
        let exp = tempfile::tempdir().unwrap();
        let res = tempfile::tempdir().unwrap();
        let record = json!({"patient": {"name": "Asha"}, "tests": []});
        std::fs::write(exp.path().join("cbc_expected.json"), record.to_string()).unwrap();
        std::fs::write(exp.path().join("lipid_expected.json"), record.to_string()).unwrap();
        std::fs::write(exp.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(res.path().join("cbc.json"), record.to_string()).unwrap();

        let summary = evaluate_dir(exp.path(), res.path()).unwrap();
        assert_eq!(summary.len(), 2);
        assert!(!summary["cbc"].is_missing());
        assert!(summary["lipid"].is_missing());
    }

    #[test]
    fn missing_expected_dir_is_an_error() {
        let res = tempfile::tempdir().unwrap();
        assert!(evaluate_dir(Path::new("/no/such/dir"), res.path()).is_err());
    }
}
