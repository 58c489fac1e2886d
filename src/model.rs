//! Data model shared by every pipeline stage.
//!
//! Recognition hands us [`Token`]s; the orderer groups them into [`Line`]s;
//! extraction and normalisation finally produce a [`Report`]. Every patient
//! field is always present: unrecognised values carry the [`UNKNOWN`]
//! sentinel (or `null` for `age` and `id`), never an absent key.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Placeholder for a patient field that was not recognised.
pub const UNKNOWN: &str = "UNKNOWN";

// ── Geometry ─────────────────────────────────────────────────────────────

/// Word bounding box, normalised to the page: `(x0, y0)` top-left,
/// `(x1, y1)` bottom-right, all in `[0, 1]`.
///
/// Deserialisation is lenient. `[x0,y0,x1,y1]`, `[[x0,y0],[x1,y1]]` and
/// `{"x0":..,"y0":..,"x1":..,"y1":..}` are accepted; anything else degrades
/// to [`BoundingBox::UNIT`] instead of failing the token.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BoundingBox {
    /// The whole page. Used when recognition geometry is unusable.
    pub const UNIT: BoundingBox = BoundingBox {
        x0: 0.0,
        y0: 0.0,
        x1: 1.0,
        y1: 1.0,
    };

    /// Build a box, clamping into the unit square and re-ordering corners.
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        if ![x0, y0, x1, y1].iter().all(|v| v.is_finite()) {
            return Self::UNIT;
        }
        let c = |v: f64| v.clamp(0.0, 1.0);
        let (x0, x1) = (c(x0.min(x1)), c(x0.max(x1)));
        let (y0, y1) = (c(y0.min(y1)), c(y0.max(y1)));
        Self { x0, y0, x1, y1 }
    }

    pub fn y_center(&self) -> f64 {
        (self.y0 + self.y1) / 2.0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    fn from_value(value: &Value) -> Option<Self> {
        let num = |v: &Value| v.as_f64();
        match value {
            Value::Array(items) if items.len() == 4 => Some(Self::new(
                num(&items[0])?,
                num(&items[1])?,
                num(&items[2])?,
                num(&items[3])?,
            )),
            Value::Array(items) if items.len() == 2 => {
                let a = items[0].as_array().filter(|p| p.len() == 2)?;
                let b = items[1].as_array().filter(|p| p.len() == 2)?;
                Some(Self::new(num(&a[0])?, num(&a[1])?, num(&b[0])?, num(&b[1])?))
            }
            Value::Object(map) => Some(Self::new(
                num(map.get("x0")?)?,
                num(map.get("y0")?)?,
                num(map.get("x1")?)?,
                num(map.get("y1")?)?,
            )),
            _ => None,
        }
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::UNIT
    }
}

impl From<Value> for BoundingBox {
    fn from(value: Value) -> Self {
        Self::from_value(&value).unwrap_or_else(|| {
            debug!("Malformed bounding box {value}, using unit box");
            Self::UNIT
        })
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x0, b.y0, b.x1, b.y1]
    }
}

// ── Recognition tokens ───────────────────────────────────────────────────

/// One recognised word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    #[serde(default, alias = "geometry")]
    pub bbox: BoundingBox,
    #[serde(default, deserialize_with = "lenient_confidence")]
    pub confidence: f64,
}

impl Token {
    pub fn new(text: impl Into<String>, bbox: BoundingBox, confidence: f64) -> Self {
        Self {
            text: text.into(),
            bbox,
            confidence: clamp_unit(confidence),
        }
    }
}

/// Confidence as a number or numeric string, clamped to `[0, 1]`; else 0.
fn lenient_confidence<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let raw = match &value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(raw.map(clamp_unit).unwrap_or(0.0))
}

/// Clamp to `[0, 1]`, mapping NaN to 0.
pub fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// All tokens recognised on one page of a submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageTokens {
    /// 1-indexed position of the page within the whole document.
    pub page: usize,
    pub tokens: Vec<Token>,
}

/// Tokens sharing one inferred visual line, left to right.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Line {
    pub tokens: Vec<Token>,
}

impl Line {
    /// Token texts joined by a single space.
    pub fn text(&self) -> String {
        self.tokens
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ── Report ───────────────────────────────────────────────────────────────

/// Patient sex as printed on the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Sex {
    M,
    F,
    #[default]
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

/// Patient demographics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub name: String,
    pub age: Option<u32>,
    pub sex: Sex,
    pub id: Option<String>,
    pub dob: String,
    pub visit_id: String,
    pub date: String,
}

impl Default for Patient {
    fn default() -> Self {
        Self {
            name: UNKNOWN.to_string(),
            age: None,
            sex: Sex::Unknown,
            id: None,
            dob: UNKNOWN.to_string(),
            visit_id: UNKNOWN.to_string(),
            date: UNKNOWN.to_string(),
        }
    }
}

/// One named lab result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub value: String,
    pub unit: String,
    /// Label words, value and unit exactly as matched; used for confidence
    /// lookup and image highlighting.
    pub matched_tokens: Vec<String>,
    pub confidence: f64,
}

/// The canonical structured record for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub patient: Patient,
    pub tests: Vec<TestResult>,
}

/// What callers receive and what the report store persists: the report plus
/// per-field patient confidences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportOutput {
    #[serde(flatten)]
    pub report: Report,
    #[serde(default)]
    pub patient_confidence: BTreeMap<String, f64>,
}
