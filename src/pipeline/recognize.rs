//! Word recognition: page image → positioned, scored tokens.
//!
//! Recognition is the only stage that talks to an external engine, so it sits
//! behind the [`Recognizer`] trait. Two implementations ship with the crate:
//!
//! | Recognizer | Source of tokens |
//! |------------|------------------|
//! | [`VisionRecognizer`] | a vision LLM asked to list every word with its box |
//! | [`TokenDumpRecognizer`] | a JSON token dump recorded earlier (replay, tests) |
//!
//! Whatever the source, tokens pass through [`sanitize_tokens`] before they
//! reach the pipeline: words are trimmed, empty words dropped, and words made
//! only of masking characters (`#`, `▯`, `X`, `x`, `-`) become `[REDACTED]`.
//!
//! ## No retry
//!
//! A recognition failure on any page aborts the whole document; a report is
//! never built from a subset of its pages.

use crate::config::DigitizeConfig;
use crate::error::{DigitizeError, PageError};
use crate::model::Token;
use crate::pipeline::encode::encode_page;
use crate::prompts::{PAGE_INSTRUCTION, WORD_DETECTION_PROMPT};
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Model used when neither the config nor the environment names one.
pub const DEFAULT_VISION_MODEL: &str = "gpt-4.1-nano";

/// Replacement text for masked-out words.
pub const REDACTED: &str = "[REDACTED]";

/// Turns one page image into tokens.
pub trait Recognizer: Send + Sync {
    /// Recognize page `page_num` (1-indexed within the document).
    fn recognize_page(
        &self,
        page_num: usize,
        image: &DynamicImage,
    ) -> impl Future<Output = Result<Vec<Token>, PageError>> + Send;
}

// ── Token cleanup ────────────────────────────────────────────────────────

static RE_MASKED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[#▯Xx\-]+$").unwrap());

/// Trim, drop empty words and redact masked words.
pub fn sanitize_tokens(tokens: Vec<Token>) -> Vec<Token> {
    tokens
        .into_iter()
        .filter_map(|mut t| {
            let text = t.text.trim();
            if text.is_empty() {
                return None;
            }
            t.text = if RE_MASKED.is_match(text) {
                REDACTED.to_string()
            } else {
                text.to_string()
            };
            Some(t)
        })
        .collect()
}

// ── Token JSON ───────────────────────────────────────────────────────────

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*```[A-Za-z]*\s*\n(.*?)\n?```\s*$").unwrap());

/// Parse recognition output into per-page token lists.
///
/// Accepted shapes, optionally wrapped in a markdown code fence:
/// - `[token, …]`: one page
/// - `[[token, …], …]`: one list per page
/// - `{"words": […]}` or `{"tokens": […]}`: one page
/// - `{"pages": [...]}`: each entry a token list or an object as above
///
/// Entries without a string `text` are skipped with a warning; malformed
/// geometry and confidence are repaired by [`Token`]'s deserializer.
pub fn parse_token_json(raw: &str) -> Result<Vec<Vec<Token>>, String> {
    let body = RE_FENCED
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw);

    let value: Value = serde_json::from_str(body.trim()).map_err(|e| e.to_string())?;

    match &value {
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_array) => {
            items.iter().map(page_tokens).collect()
        }
        Value::Object(map) if map.contains_key("pages") => match map.get("pages") {
            Some(Value::Array(pages)) => pages.iter().map(page_tokens).collect(),
            _ => Err("\"pages\" is not an array".to_string()),
        },
        _ => Ok(vec![page_tokens(&value)?]),
    }
}

/// Tokens of one page: a token array or an object holding one.
fn page_tokens(value: &Value) -> Result<Vec<Token>, String> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("words").or_else(|| map.get("tokens")) {
            Some(Value::Array(items)) => items,
            _ => return Err("object has no \"words\" or \"tokens\" array".to_string()),
        },
        other => return Err(format!("expected a token list, found {}", json_kind(other))),
    };

    let tokens = items
        .iter()
        .filter_map(|item| match serde_json::from_value::<Token>(item.clone()) {
            Ok(t) => Some(t),
            Err(e) => {
                warn!("Skipping unparsable token {}: {}", item, e);
                None
            }
        })
        .collect();
    Ok(sanitize_tokens(tokens))
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Read a token dump file into per-page token lists.
pub fn load_token_dump(path: &Path, document: &str) -> Result<Vec<Vec<Token>>, DigitizeError> {
    let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => DigitizeError::PermissionDenied {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::NotFound => DigitizeError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => DigitizeError::MalformedTokens {
            document: document.to_string(),
            detail: format!("{}: {}", path.display(), e),
        },
    })?;

    let pages = parse_token_json(&raw).map_err(|detail| DigitizeError::MalformedTokens {
        document: document.to_string(),
        detail: format!("{}: {}", path.display(), detail),
    })?;
    debug!(
        "Loaded token dump {}: {} page(s), {} token(s)",
        path.display(),
        pages.len(),
        pages.iter().map(Vec::len).sum::<usize>()
    );
    Ok(pages)
}

// ── Replay ───────────────────────────────────────────────────────────────

/// Serves recorded tokens instead of calling an engine.
///
/// Page `n` of the document is answered with page `n` of the dump; the page
/// image is ignored. Asking for a page the dump does not have is a
/// recognition failure.
#[derive(Debug, Clone, Default)]
pub struct TokenDumpRecognizer {
    pages: Vec<Vec<Token>>,
}

impl TokenDumpRecognizer {
    pub fn new(pages: Vec<Vec<Token>>) -> Self {
        Self {
            pages: pages.into_iter().map(sanitize_tokens).collect(),
        }
    }

    /// Load a dump from disk.
    pub fn from_file(path: &Path) -> Result<Self, DigitizeError> {
        let document = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            pages: load_token_dump(path, &document)?,
        })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

impl Recognizer for TokenDumpRecognizer {
    async fn recognize_page(
        &self,
        page_num: usize,
        _image: &DynamicImage,
    ) -> Result<Vec<Token>, PageError> {
        page_num
            .checked_sub(1)
            .and_then(|i| self.pages.get(i))
            .cloned()
            .ok_or_else(|| PageError::RecognitionFailed {
                page: page_num,
                detail: format!("token dump has {} page(s)", self.pages.len()),
            })
    }
}

// ── Vision engine ────────────────────────────────────────────────────────

/// Recognizes words by asking a vision LLM for a JSON word list.
pub struct VisionRecognizer {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
    timeout: Duration,
}

impl std::fmt::Debug for VisionRecognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionRecognizer")
            .field("provider", &"<dyn LLMProvider>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl VisionRecognizer {
    /// Build a recognizer for an already constructed provider.
    pub fn new(provider: Arc<dyn LLMProvider>, config: &DigitizeConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| WORD_DETECTION_PROMPT.to_string()),
            options: build_options(config),
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Resolve the provider from the config and environment.
    pub fn from_config(config: &DigitizeConfig) -> Result<Self, DigitizeError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }
}

impl Recognizer for VisionRecognizer {
    async fn recognize_page(
        &self,
        page_num: usize,
        image: &DynamicImage,
    ) -> Result<Vec<Token>, PageError> {
        let start = Instant::now();
        let image_data = encode_page(image).map_err(|e| PageError::RenderFailed {
            page: page_num,
            detail: format!("Image encoding failed: {}", e),
        })?;

        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(PAGE_INSTRUCTION, vec![image_data]),
        ];

        let response =
            tokio::time::timeout(self.timeout, self.provider.chat(&messages, Some(&self.options)))
                .await
                .map_err(|_| PageError::Timeout {
                    page: page_num,
                    secs: self.timeout.as_secs(),
                })?
                .map_err(|e| PageError::RecognitionFailed {
                    page: page_num,
                    detail: e.to_string(),
                })?;

        debug!(
            "Page {}: {} input tokens, {} output tokens, {:?}",
            page_num,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        let pages = parse_token_json(&response.content).map_err(|detail| {
            PageError::RecognitionFailed {
                page: page_num,
                detail: format!("unusable word list: {}", detail),
            }
        })?;
        Ok(pages.into_iter().flatten().collect())
    }
}

/// Build `CompletionOptions` from the digitize config.
fn build_options(config: &DigitizeConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, DigitizeError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        DigitizeError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) plus `config.model`.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Auto-detection** via [`ProviderFactory::from_env`].
fn resolve_provider(config: &DigitizeConfig) -> Result<Arc<dyn LLMProvider>, DigitizeError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_VISION_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_vision_provider(&prov, &env_model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_vision_provider("openai", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| DigitizeError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --tokens to replay a dump.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
