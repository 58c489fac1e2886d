//! Integration tests over the public API, no vision engine required.
//!
//! Recognition is replayed from token dumps, so every test here is
//! deterministic and runs offline.

use labreport_digitizer::{
    digitize, digitize_from_bytes, digitize_many, digitize_sync, digitize_to_file, evaluate_dir,
    extract_report, save_annotations, BoundingBox, CorrectionStore, DigitizeConfig,
    DigitizeError, DigitizeProgressCallback, Evaluation, PageTokens, ReportStore, Sex, Token,
    TokenDumpRecognizer, UNKNOWN,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn tok(text: &str, x: f64, y: f64, conf: f64) -> Token {
    Token::new(text, BoundingBox::new(x, y, x + 0.08, y + 0.02), conf)
}

/// One report page, words deliberately out of reading order.
fn cbc_tokens() -> Vec<Token> {
    vec![
        tok("Hemoglobin", 0.1, 0.5, 0.9),
        tok("g/dl", 0.4, 0.5, 0.7),
        tok("Name:", 0.1, 0.1, 0.99),
        tok("13.5", 0.3, 0.5, 0.8),
        tok("Smith", 0.3, 0.1, 0.8),
        tok("45", 0.5, 0.1, 0.95),
        tok("John", 0.2, 0.1, 0.9),
        tok("Age:", 0.4, 0.1, 0.9),
    ]
}

fn dump_json(pages: &[Vec<Token>]) -> String {
    let pages: Vec<Value> = pages
        .iter()
        .map(|tokens| {
            tokens
                .iter()
                .map(|t| {
                    json!({
                        "text": t.text,
                        "bbox": [t.bbox.x0, t.bbox.y0, t.bbox.x1, t.bbox.y1],
                        "confidence": t.confidence,
                    })
                })
                .collect()
        })
        .collect();
    Value::Array(pages).to_string()
}

fn write_file(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path.to_string_lossy().into_owned()
}

/// Config whose stores live inside `dir`.
fn isolated_config(dir: &Path) -> DigitizeConfig {
    DigitizeConfig::builder()
        .correction_dir(dir.join("corrections"))
        .report_dir(dir.join("final_reports"))
        .build()
        .unwrap()
}

// ── Token dumps ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn token_dump_is_digitized_without_a_recognizer_call() {
    let tmp = TempDir::new().unwrap();
    let dump = write_file(tmp.path(), "cbc.json", &dump_json(&[cbc_tokens()]));
    let config = isolated_config(tmp.path());

    let doc = digitize(&[dump], &TokenDumpRecognizer::default(), &config)
        .await
        .unwrap();

    assert_eq!(doc.document_id, "cbc");
    assert!(!doc.corrected);
    assert_eq!(doc.raw_text, "Name: John Smith Age: 45\nHemoglobin 13.5 g/dl");
    assert_eq!(doc.stats.pages, 1);
    assert_eq!(doc.stats.tokens, 8);

    let report = &doc.report.report;
    assert_eq!(report.patient.name, "John Smith");
    assert_eq!(report.patient.age, Some(45));
    assert_eq!(report.patient.sex, Sex::Unknown);
    assert_eq!(report.patient.dob, UNKNOWN);
    assert_eq!(report.tests.len(), 1);
    assert_eq!(report.tests[0].name, "Hemoglobin");
    assert_eq!(report.tests[0].value, "13.5");
    assert_eq!(report.tests[0].unit, "g/dl");
}

#[tokio::test]
async fn malformed_dump_is_reported() {
    let tmp = TempDir::new().unwrap();
    let dump = write_file(tmp.path(), "broken.json", r#"[{"text": "Name:", "bbox": [0.1"#);
    let config = isolated_config(tmp.path());

    let err = digitize(&[dump], &TokenDumpRecognizer::default(), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, DigitizeError::MalformedTokens { .. }), "{err:?}");
}

#[tokio::test]
async fn missing_input_is_reported() {
    let tmp = TempDir::new().unwrap();
    let config = isolated_config(tmp.path());
    let missing = tmp.path().join("nope.png").to_string_lossy().into_owned();

    let err = digitize(&[missing], &TokenDumpRecognizer::default(), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, DigitizeError::FileNotFound { .. }), "{err:?}");
}

// ── Ordering and scoring ─────────────────────────────────────────────────────

#[test]
fn token_order_does_not_change_the_report() {
    let config = DigitizeConfig::default();
    let forward = extract_report(&[PageTokens { page: 1, tokens: cbc_tokens() }], &config);

    let mut reversed = cbc_tokens();
    reversed.reverse();
    let backward = extract_report(&[PageTokens { page: 1, tokens: reversed }], &config);

    assert_eq!(forward.text, backward.text);
    assert_eq!(forward.report, backward.report);
}

#[test]
fn confidences_stay_in_unit_range() {
    let mut tokens = cbc_tokens();
    tokens.push(tok("Glucose", 0.1, 0.6, 1.7));
    tokens.push(tok("90", 0.3, 0.6, -0.4));
    tokens.push(tok("mg/dl", 0.4, 0.6, 1.0));

    let out = extract_report(&[PageTokens { page: 1, tokens }], &DigitizeConfig::default());
    assert_eq!(out.report.report.tests.len(), 2);
    for test in &out.report.report.tests {
        assert!((0.0..=1.0).contains(&test.confidence), "{test:?}");
    }
    for (field, c) in &out.report.patient_confidence {
        assert!((0.0..=1.0).contains(c), "{field}: {c}");
    }
}

// ── Corrections and evaluation ───────────────────────────────────────────────

#[tokio::test]
async fn stored_correction_is_served_instead() {
    let tmp = TempDir::new().unwrap();
    let dump = write_file(tmp.path(), "cbc.json", &dump_json(&[cbc_tokens()]));
    let config = isolated_config(tmp.path());

    CorrectionStore::new(&config.correction_dir)
        .save("cbc", &json!({"patient": {"name": "Jonathan Smith", "sex": "M"}}))
        .await
        .unwrap();

    let doc = digitize(&[dump], &TokenDumpRecognizer::default(), &config)
        .await
        .unwrap();
    assert!(doc.corrected);
    assert_eq!(doc.report.report.patient.name, "Jonathan Smith");
    assert_eq!(doc.report.report.patient.sex, Sex::M);
    assert_eq!(doc.report.report.patient.age, None);
    assert!(doc.report.report.tests.is_empty());
    assert!(doc.report.patient_confidence.is_empty());
}

#[tokio::test]
async fn saved_report_evaluates_against_expected() {
    let tmp = TempDir::new().unwrap();
    let dump = write_file(tmp.path(), "cbc.json", &dump_json(&[cbc_tokens()]));
    let config = isolated_config(tmp.path());

    let doc = digitize(&[dump], &TokenDumpRecognizer::default(), &config)
        .await
        .unwrap();
    ReportStore::new(&config.report_dir)
        .save(&doc.document_id, &doc.report)
        .await
        .unwrap();

    let expected_dir = tmp.path().join("samples");
    std::fs::create_dir_all(&expected_dir).unwrap();
    let expected = json!({
        "patient": {"name": "john smith", "age": 45},
        "tests": [
            {"name": "Hemoglobin", "value": 13.5, "unit": "g/dL"},
            {"name": "Platelets", "value": "250", "unit": "10^3/ul"}
        ]
    });
    write_file(&expected_dir, "cbc_expected.json", &expected.to_string());
    write_file(&expected_dir, "kft_expected.json", &expected.to_string());

    let summary = evaluate_dir(&expected_dir, &config.report_dir).unwrap();
    assert!(summary["kft"].is_missing());
    match &summary["cbc"] {
        Evaluation::Scored(s) => {
            assert_eq!(s.patient_accuracy, 100.0);
            assert_eq!(s.test_accuracy, 50.0);
            assert!(s.test_results[0].is_match());
            assert!(!s.test_results[1].is_match());
        }
        other => panic!("expected a score, got {other:?}"),
    }
}

// ── Scans ────────────────────────────────────────────────────────────────────

fn white_png(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    image::RgbImage::from_pixel(100, 100, image::Rgb([255, 255, 255]))
        .save(&path)
        .unwrap();
    path
}

#[tokio::test]
async fn scan_pages_are_recognized_and_annotated() {
    let tmp = TempDir::new().unwrap();
    let scan = white_png(tmp.path(), "scan.png");
    let config = isolated_config(tmp.path());
    let recognizer = TokenDumpRecognizer::new(vec![cbc_tokens()]);

    let doc = digitize(&[scan.to_string_lossy()], &recognizer, &config)
        .await
        .unwrap();
    assert_eq!(doc.document_id, "scan");
    assert_eq!(doc.report.report.patient.name, "John Smith");
    assert!(doc.pages[0].image.is_some());

    let out_dir = tmp.path().join("annotated");
    let written = save_annotations(&doc, &out_dir).unwrap();
    assert_eq!(written, vec![out_dir.join("annotated_scan_p1.png")]);

    let annotated = image::open(&written[0]).unwrap().to_rgba8();
    // "Hemoglobin" box starts at (10, 50)
    assert_eq!(annotated.get_pixel(10, 50), &image::Rgba([0, 255, 0, 255]));
}

#[tokio::test]
async fn recognizer_short_of_pages_aborts_the_document() {
    let tmp = TempDir::new().unwrap();
    let p1 = white_png(tmp.path(), "lipid_p1.png");
    let p2 = white_png(tmp.path(), "lipid_p2.png");
    let config = isolated_config(tmp.path());
    let recognizer = TokenDumpRecognizer::new(vec![cbc_tokens()]);

    let inputs = [p1.to_string_lossy(), p2.to_string_lossy()];
    let err = digitize(&inputs, &recognizer, &config).await.unwrap_err();
    match err {
        DigitizeError::RecognitionFailed { document, page, .. } => {
            assert_eq!(document, "lipid_p1_bundle_2");
            assert_eq!(page, 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

// ── Progress and batches ─────────────────────────────────────────────────────

#[derive(Default)]
struct Counter {
    documents: AtomicUsize,
    pages: AtomicUsize,
    words: AtomicUsize,
    completed: AtomicUsize,
}

impl DigitizeProgressCallback for Counter {
    fn on_document_start(&self, _document_id: &str, total_pages: usize) {
        self.documents.fetch_add(1, Ordering::SeqCst);
        self.pages.fetch_add(total_pages, Ordering::SeqCst);
    }

    fn on_page_complete(&self, _page_num: usize, _total_pages: usize, token_count: usize) {
        self.words.fetch_add(token_count, Ordering::SeqCst);
    }

    fn on_document_complete(&self, _document_id: &str, _test_count: usize, _corrected: bool) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn progress_events_cover_every_page() {
    let tmp = TempDir::new().unwrap();
    let page2 = vec![tok("Glucose", 0.1, 0.1, 0.9), tok("90", 0.3, 0.1, 0.9)];
    let dump = write_file(tmp.path(), "multi.json", &dump_json(&[cbc_tokens(), page2]));

    let counter = Arc::new(Counter::default());
    let config = DigitizeConfig::builder()
        .correction_dir(tmp.path().join("corrections"))
        .progress_callback(counter.clone())
        .build()
        .unwrap();

    let doc = digitize(&[dump], &TokenDumpRecognizer::default(), &config)
        .await
        .unwrap();
    assert_eq!(doc.report.report.tests.len(), 2);
    assert_eq!(counter.documents.load(Ordering::SeqCst), 1);
    assert_eq!(counter.pages.load(Ordering::SeqCst), 2);
    assert_eq!(counter.words.load(Ordering::SeqCst), 10);
    assert_eq!(counter.completed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn batch_keeps_input_order_and_isolates_failures() {
    let tmp = TempDir::new().unwrap();
    let good = write_file(tmp.path(), "good.json", &dump_json(&[cbc_tokens()]));
    let bad = write_file(tmp.path(), "bad.json", "{ not json");
    let config = isolated_config(tmp.path());

    let results = digitize_many(
        &[vec![bad], vec![good]],
        &TokenDumpRecognizer::default(),
        &config,
        2,
    )
    .await;
    assert_eq!(results.len(), 2);
    assert!(results[0].is_err());
    assert_eq!(results[1].as_ref().unwrap().document_id, "good");
}

// ── Entry points ─────────────────────────────────────────────────────────────

#[test]
fn sync_entry_point_matches_async() {
    let tmp = TempDir::new().unwrap();
    let dump = write_file(tmp.path(), "cbc.json", &dump_json(&[cbc_tokens()]));
    let config = isolated_config(tmp.path());

    let doc = digitize_sync(&[dump], &TokenDumpRecognizer::default(), &config).unwrap();
    assert_eq!(doc.document_id, "cbc");
    assert_eq!(doc.report.report.patient.name, "John Smith");
    assert_eq!(doc.report.report.tests.len(), 1);
}

#[tokio::test]
async fn report_is_written_to_the_output_file() {
    let tmp = TempDir::new().unwrap();
    let dump = write_file(tmp.path(), "cbc.json", &dump_json(&[cbc_tokens()]));
    let config = isolated_config(tmp.path());
    let out = tmp.path().join("out").join("cbc_report.json");

    let stats = digitize_to_file(&[dump], &out, &TokenDumpRecognizer::default(), &config)
        .await
        .unwrap();
    assert_eq!(stats.pages, 1);
    assert_eq!(stats.tests, 1);

    let written: Value = serde_json::from_slice(&std::fs::read(&out).unwrap()).unwrap();
    assert_eq!(written["patient"]["name"], json!("John Smith"));
    assert_eq!(written["patient"]["age"], json!(45));
    assert_eq!(written["tests"][0]["name"], json!("Hemoglobin"));
    assert_eq!(written["tests"][0]["unit"], json!("g/dl"));
    assert!(written["patient_confidence"]["name"].is_number());
}

#[tokio::test]
async fn uploaded_bytes_are_digitized_under_their_file_stem() {
    let tmp = TempDir::new().unwrap();
    let config = isolated_config(tmp.path());
    let bytes = dump_json(&[cbc_tokens()]).into_bytes();

    let doc = digitize_from_bytes(&bytes, "cbc.json", &TokenDumpRecognizer::default(), &config)
        .await
        .unwrap();
    assert_eq!(doc.document_id, "cbc");
    assert!(!doc.corrected);
    assert_eq!(doc.report.report.tests[0].value, "13.5");

    CorrectionStore::new(&config.correction_dir)
        .save("cbc", &json!({"patient": {"name": "Jonathan Smith"}}))
        .await
        .unwrap();

    let doc = digitize_from_bytes(&bytes, "cbc.json", &TokenDumpRecognizer::default(), &config)
        .await
        .unwrap();
    assert!(doc.corrected);
    assert_eq!(doc.report.report.patient.name, "Jonathan Smith");
}

#[tokio::test]
async fn uploaded_bytes_need_a_file_name() {
    let tmp = TempDir::new().unwrap();
    let config = isolated_config(tmp.path());

    let err = digitize_from_bytes(b"[]", "..", &TokenDumpRecognizer::default(), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, DigitizeError::InvalidInput { .. }), "{err:?}");
}
