//! Operator corrections and confirmed reports on disk.
//!
//! Both stores are flat directories of pretty-printed JSON keyed by document
//! identifier:
//!
//! ```text
//! data/corrections/<document_id>_corrected.json   ← CorrectionStore
//! data/final_reports/<document_id>.json           ← ReportStore
//! ```
//!
//! A stored correction replaces the computed report wholesale; there is no
//! per-field merge. Writes go to a temp file in the same directory and are
//! renamed into place, so readers never see a half-written record. Concurrent
//! writers are not coordinated: the last rename wins.

use crate::error::DigitizeError;
use crate::model::{Report, ReportOutput};
use crate::pipeline::normalize::normalize_value;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Reject identifiers that would escape the store directory.
fn check_id(document_id: &str) -> Result<(), DigitizeError> {
    let bad = document_id.trim().is_empty()
        || document_id.contains(['/', '\\'])
        || document_id == "."
        || document_id == "..";
    if bad {
        return Err(DigitizeError::InvalidInput {
            input: document_id.to_string(),
        });
    }
    Ok(())
}

/// Write `bytes` to `path` via a sibling temp file and a rename.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await
}

// ── Corrections ──────────────────────────────────────────────────────────

/// Paths of the fields in `correction` that would be served differently
/// from how they were supplied, e.g. `patient.dob` or `tests[0].unit`.
///
/// Keys outside the report schema are listed too, since they would be
/// dropped. An empty result means the correction round-trips unchanged.
pub fn noncanonical_fields(correction: &Value) -> Vec<String> {
    let Some(supplied) = correction.as_object() else {
        return vec!["(root)".to_string()];
    };
    let served = match serde_json::to_value(normalize_value(correction)) {
        Ok(v) => v,
        Err(_) => return vec!["(root)".to_string()],
    };

    let mut bad = Vec::new();
    for (key, value) in supplied {
        match key.as_str() {
            "patient" => compare_fields(value, &served["patient"], "patient", &mut bad),
            "tests" => match value.as_array() {
                Some(items) => {
                    // Non-object items are skipped by normalisation, so the
                    // served index only advances on objects.
                    let mut served_idx = 0;
                    for (i, item) in items.iter().enumerate() {
                        let at = format!("tests[{i}]");
                        if item.is_object() {
                            compare_fields(item, &served["tests"][served_idx], &at, &mut bad);
                            served_idx += 1;
                        } else {
                            bad.push(at);
                        }
                    }
                }
                None => bad.push("tests".to_string()),
            },
            other => bad.push(other.to_string()),
        }
    }
    bad
}

fn compare_fields(supplied: &Value, served: &Value, prefix: &str, bad: &mut Vec<String>) {
    let Some(fields) = supplied.as_object() else {
        bad.push(prefix.to_string());
        return;
    };
    for (key, value) in fields {
        match served.get(key) {
            Some(s) if same_value(value, s) => {}
            _ => bad.push(format!("{prefix}.{key}")),
        }
    }
}

/// JSON equality that treats `1` and `1.0` as the same number.
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| same_value(a, b))
        }
        _ => a == b,
    }
}

/// Operator-supplied reports, read before serving a document.
#[derive(Debug, Clone)]
pub struct CorrectionStore {
    dir: PathBuf,
}

impl CorrectionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the correction for `document_id`.
    pub fn path_for(&self, document_id: &str) -> PathBuf {
        self.dir.join(format!("{document_id}_corrected.json"))
    }

    /// Load the correction for `document_id`.
    ///
    /// Returns `Ok(None)` when no correction has been stored. A partial
    /// correction is completed with sentinel defaults; files edited by hand
    /// outside [`CorrectionStore::save`] are still normalised.
    pub async fn load(&self, document_id: &str) -> Result<Option<Report>, DigitizeError> {
        check_id(document_id)?;
        let path = self.path_for(document_id);

        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No correction for '{}'", document_id);
                return Ok(None);
            }
            Err(e) => return Err(DigitizeError::CorrectionStoreFailed { path, source: e }),
        };

        let value: Value =
            serde_json::from_slice(&bytes).map_err(|e| DigitizeError::CorruptCorrection {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        if !value.is_object() {
            return Err(DigitizeError::CorruptCorrection {
                path,
                detail: "correction is not a JSON object".into(),
            });
        }

        Ok(Some(normalize_value(&value)))
    }

    /// Store a Report-shaped correction (full or partial) for `document_id`.
    ///
    /// Every supplied value must already be in served form, so the report
    /// read back is exactly what the operator typed. Absent fields are
    /// allowed and filled with sentinels on load.
    pub async fn save(
        &self,
        document_id: &str,
        correction: &Value,
    ) -> Result<PathBuf, DigitizeError> {
        check_id(document_id)?;
        let path = self.path_for(document_id);
        if !correction.is_object() {
            return Err(DigitizeError::CorruptCorrection {
                path,
                detail: "correction is not a JSON object".into(),
            });
        }
        let fields = noncanonical_fields(correction);
        if !fields.is_empty() {
            warn!("Rejected correction for '{}': {:?}", document_id, fields);
            return Err(DigitizeError::InvalidCorrection {
                document: document_id.to_string(),
                fields,
            });
        }

        let body = serde_json::to_vec_pretty(correction)
            .map_err(|e| DigitizeError::Internal(e.to_string()))?;
        write_atomic(&path, &body)
            .await
            .map_err(|e| DigitizeError::CorrectionStoreFailed {
                path: path.clone(),
                source: e,
            })?;

        info!("Stored correction for '{}' at {}", document_id, path.display());
        Ok(path)
    }

    /// Replace `computed` by the stored correction, if there is one.
    ///
    /// Returns the report to serve and whether it came from a correction.
    /// Computed patient confidences do not describe operator-typed values, so
    /// a corrected report carries none.
    pub async fn apply(
        &self,
        document_id: &str,
        computed: ReportOutput,
    ) -> Result<(ReportOutput, bool), DigitizeError> {
        match self.load(document_id).await? {
            Some(report) => {
                info!("Serving stored correction for '{}'", document_id);
                Ok((
                    ReportOutput {
                        report,
                        patient_confidence: BTreeMap::new(),
                    },
                    true,
                ))
            }
            None => Ok((computed, false)),
        }
    }
}

// ── Confirmed reports ────────────────────────────────────────────────────

/// Reports confirmed for a document; the "actual" side of an evaluation.
#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, document_id: &str) -> PathBuf {
        self.dir.join(format!("{document_id}.json"))
    }

    /// Persist `report` as `<dir>/<document_id>.json`.
    pub async fn save(
        &self,
        document_id: &str,
        report: &ReportOutput,
    ) -> Result<PathBuf, DigitizeError> {
        check_id(document_id)?;
        let path = self.path_for(document_id);
        let body = serde_json::to_vec_pretty(report)
            .map_err(|e| DigitizeError::Internal(e.to_string()))?;
        write_atomic(&path, &body)
            .await
            .map_err(|e| DigitizeError::OutputWriteFailed {
                path: path.clone(),
                source: e,
            })?;
        debug!("Saved report for '{}' to {}", document_id, path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Patient, Sex, TestResult, UNKNOWN};
    use serde_json::json;

    #[tokio::test]
    async fn missing_correction_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CorrectionStore::new(dir.path());
        assert!(store.load("cbc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn partial_correction_is_completed_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = CorrectionStore::new(dir.path().join("corrections"));
        let path = store
            .save("cbc", &json!({"patient": {"name": "Asha Rao", "sex": "F"}}))
            .await
            .unwrap();
        assert!(path.ends_with("cbc_corrected.json"));

        let report = store.load("cbc").await.unwrap().unwrap();
        assert_eq!(report.patient.name, "Asha Rao");
        assert_eq!(report.patient.sex, Sex::F);
        assert_eq!(report.patient.dob, UNKNOWN);
        assert!(report.tests.is_empty());
    }

    #[tokio::test]
    async fn complete_correction_is_served_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let store = CorrectionStore::new(dir.path());
        let report = Report {
            patient: Patient {
                name: "Meera Iyer".into(),
                age: Some(45),
                sex: Sex::F,
                id: Some("MRN-0042".into()),
                dob: "12/05/1980".into(),
                visit_id: "V-7781".into(),
                date: "03/02/2024".into(),
            },
            tests: vec![
                TestResult {
                    name: "Glucose".into(),
                    value: "98".into(),
                    unit: "mg/dl".into(),
                    matched_tokens: vec!["Glucose".into(), "98".into(), "mg/dl".into()],
                    confidence: 0.92,
                },
                TestResult {
                    name: "Hemoglobin".into(),
                    value: "13.5".into(),
                    unit: "g/dl".into(),
                    matched_tokens: vec![],
                    confidence: 1.0,
                },
            ],
        };

        store
            .save("kft", &serde_json::to_value(&report).unwrap())
            .await
            .unwrap();
        assert_eq!(store.load("kft").await.unwrap(), Some(report.clone()));

        let (served, corrected) = store.apply("kft", ReportOutput::default()).await.unwrap();
        assert!(corrected);
        assert_eq!(served.report, report);
    }

    #[tokio::test]
    async fn correction_that_would_be_coerced_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CorrectionStore::new(dir.path());
        let correction = json!({
            "patient": {"dob": "1980-05-12", "age": "45 yrs"},
            "tests": [{"unit": "mg/dL"}]
        });

        match store.save("cbc", &correction).await {
            Err(DigitizeError::InvalidCorrection { document, fields }) => {
                assert_eq!(document, "cbc");
                assert!(fields.contains(&"patient.dob".to_string()), "{fields:?}");
                assert!(fields.contains(&"patient.age".to_string()), "{fields:?}");
                assert!(fields.contains(&"tests[0].unit".to_string()), "{fields:?}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!store.path_for("cbc").exists());
    }

    #[test]
    fn unknown_keys_and_stray_items_are_named() {
        let fields = noncanonical_fields(&json!({
            "patient": {"name": "A B", "nickname": "ab"},
            "tests": [7, {"name": "Urea", "confidence": 1}],
            "notes": "typo fixed"
        }));
        assert_eq!(fields, vec!["notes", "patient.nickname", "tests[0]"]);
    }

    #[tokio::test]
    async fn correction_replaces_computed_report_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let store = CorrectionStore::new(dir.path());

        let mut computed = ReportOutput::default();
        computed.report.patient.name = "Jon Smth".into();
        computed.patient_confidence.insert("name".into(), 0.4);

        let (served, corrected) = store.apply("lipid", computed.clone()).await.unwrap();
        assert!(!corrected);
        assert_eq!(served, computed);

        store
            .save("lipid", &json!({"patient": {"name": "John Smith"}, "tests": []}))
            .await
            .unwrap();
        let (served, corrected) = store.apply("lipid", computed).await.unwrap();
        assert!(corrected);
        assert_eq!(served.report.patient.name, "John Smith");
        assert!(served.patient_confidence.is_empty());
    }

    #[tokio::test]
    async fn last_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = CorrectionStore::new(dir.path());
        store.save("x", &json!({"patient": {"name": "First"}})).await.unwrap();
        store.save("x", &json!({"patient": {"name": "Second"}})).await.unwrap();
        assert_eq!(store.load("x").await.unwrap().unwrap().patient.name, "Second");
        assert!(!dir.path().join("x_corrected.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_correction_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CorrectionStore::new(dir.path());
        std::fs::write(store.path_for("bad"), "{ nope").unwrap();
        assert!(matches!(
            store.load("bad").await,
            Err(DigitizeError::CorruptCorrection { .. })
        ));
        assert!(store.save("arr", &json!([1, 2])).await.is_err());
    }

    #[tokio::test]
    async fn ids_cannot_escape_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = CorrectionStore::new(dir.path());
        for id in ["", "../x", "a/b", ".."] {
            assert!(matches!(
                store.load(id).await,
                Err(DigitizeError::InvalidInput { .. })
            ));
        }
    }

    #[tokio::test]
    async fn report_store_writes_base_name_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path().join("final_reports"));
        let path = store.save("kft", &ReportOutput::default()).await.unwrap();
        assert_eq!(path, dir.path().join("final_reports").join("kft.json"));
        let v: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(v["patient"]["name"], json!("UNKNOWN"));
    }
}
