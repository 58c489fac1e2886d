//! Configuration types for lab-report digitization.
//!
//! All digitization behaviour is controlled through [`DigitizeConfig`], built
//! via its [`DigitizeConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across threads and to diff two runs to
//! understand why their outputs differ.

use crate::error::DigitizeError;
use crate::pipeline::denoise::{DEFAULT_BOILERPLATE, DEFAULT_MAX_WORD_FREQUENCY};
use crate::pipeline::order::{DEFAULT_LINE_HEIGHT_FACTOR, DEFAULT_MIN_LINE_THRESHOLD};
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for digitizing lab reports.
///
/// Built via [`DigitizeConfig::builder()`] or using
/// [`DigitizeConfig::default()`].
///
/// # Example
/// ```rust
/// use labreport_digitizer::DigitizeConfig;
///
/// let config = DigitizeConfig::builder()
///     .max_word_frequency(8)
///     .correction_dir("/var/lib/lab/corrections")
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_word_frequency, 8);
/// ```
#[derive(Clone)]
pub struct DigitizeConfig {
    // ── Line ordering ────────────────────────────────────────────────────
    /// Multiplier on the page's median token height. Default: 0.6.
    ///
    /// Two tokens belong to the same line when their vertical centres differ
    /// by less than `line_height_factor × median height`.
    pub line_height_factor: f64,

    /// Lower bound on the line threshold in normalised page units. Default: 0.008.
    ///
    /// Keeps pages of tiny print from splitting every token onto its own line.
    pub min_line_threshold: f64,

    // ── Denoising ────────────────────────────────────────────────────────
    /// Page frequency above which a word is treated as noise. Default: 5.
    pub max_word_frequency: usize,

    /// Lower-case words always dropped before extraction.
    /// Default: `confidential, sample, copy, report, hospital`.
    pub boilerplate: HashSet<String>,

    // ── Recognition ──────────────────────────────────────────────────────
    /// Rendering DPI used when rasterising PDF pages. Range: 72–400. Default: 200.
    ///
    /// Lab reports print reference ranges in small type; 200 DPI keeps
    /// decimals legible to the vision engine. The result is still capped by
    /// `max_rendered_pixels`.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Vision model identifier, e.g. "gpt-4.1-mini". If None, uses provider default.
    pub model: Option<String>,

    /// Provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Word detection is transcription; any creativity is an error.
    pub temperature: f32,

    /// Maximum tokens the engine may generate per page. Default: 8192.
    ///
    /// Word lists with geometry are verbose: a dense CBC page runs to
    /// several hundred words, each costing ~20 output tokens.
    pub max_tokens: usize,

    /// Per-page recognition timeout in seconds. Default: 90.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Custom word-detection prompt. If None, uses the built-in prompt.
    pub system_prompt: Option<String>,

    // ── Storage ──────────────────────────────────────────────────────────
    /// Directory of operator corrections. Default: `data/corrections`.
    pub correction_dir: PathBuf,

    /// Directory of confirmed reports. Default: `data/final_reports`.
    pub report_dir: PathBuf,

    /// Optional per-page progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for DigitizeConfig {
    fn default() -> Self {
        Self {
            line_height_factor: DEFAULT_LINE_HEIGHT_FACTOR,
            min_line_threshold: DEFAULT_MIN_LINE_THRESHOLD,
            max_word_frequency: DEFAULT_MAX_WORD_FREQUENCY,
            boilerplate: DEFAULT_BOILERPLATE.iter().map(|w| w.to_string()).collect(),
            dpi: 200,
            max_rendered_pixels: 2000,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 8192,
            api_timeout_secs: 90,
            download_timeout_secs: 120,
            system_prompt: None,
            correction_dir: PathBuf::from("data/corrections"),
            report_dir: PathBuf::from("data/final_reports"),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for DigitizeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut boilerplate: Vec<&String> = self.boilerplate.iter().collect();
        boilerplate.sort();
        f.debug_struct("DigitizeConfig")
            .field("line_height_factor", &self.line_height_factor)
            .field("min_line_threshold", &self.min_line_threshold)
            .field("max_word_frequency", &self.max_word_frequency)
            .field("boilerplate", &boilerplate)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("correction_dir", &self.correction_dir)
            .field("report_dir", &self.report_dir)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl DigitizeConfig {
    /// Create a new builder for `DigitizeConfig`.
    pub fn builder() -> DigitizeConfigBuilder {
        DigitizeConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`DigitizeConfig`].
pub struct DigitizeConfigBuilder {
    config: DigitizeConfig,
}

impl fmt::Debug for DigitizeConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigitizeConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl DigitizeConfigBuilder {
    pub fn line_height_factor(mut self, factor: f64) -> Self {
        self.config.line_height_factor = factor;
        self
    }

    pub fn min_line_threshold(mut self, floor: f64) -> Self {
        self.config.min_line_threshold = floor;
        self
    }

    pub fn max_word_frequency(mut self, n: usize) -> Self {
        self.config.max_word_frequency = n;
        self
    }

    /// Replace the boilerplate list. Words are lower-cased.
    pub fn boilerplate<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.boilerplate = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn correction_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.correction_dir = dir.into();
        self
    }

    pub fn report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.report_dir = dir.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DigitizeConfig, DigitizeError> {
        let c = &self.config;
        if !(c.line_height_factor.is_finite() && c.line_height_factor > 0.0) {
            return Err(DigitizeError::InvalidConfig(format!(
                "line_height_factor must be a positive number, got {}",
                c.line_height_factor
            )));
        }
        if !(c.min_line_threshold.is_finite() && (0.0..1.0).contains(&c.min_line_threshold)) {
            return Err(DigitizeError::InvalidConfig(format!(
                "min_line_threshold must be in [0, 1), got {}",
                c.min_line_threshold
            )));
        }
        if c.max_word_frequency == 0 {
            return Err(DigitizeError::InvalidConfig(
                "max_word_frequency must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(DigitizeError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}
