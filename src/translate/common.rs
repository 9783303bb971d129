use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::language::display_name;

pub const DEFAULT_SOURCE_LANG: &str = "auto";
pub const DEFAULT_TARGET_LANG: &str = "zh";
pub const DEFAULT_PROVIDER: &str = "llama-cpp";

fn default_source_lang() -> String {
    DEFAULT_SOURCE_LANG.to_string()
}

fn default_target_lang() -> String {
    DEFAULT_TARGET_LANG.to_string()
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

/// One translation request as received from the HTTP layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub text: String,
    #[serde(default = "default_source_lang")]
    pub source_lang: String,
    #[serde(default = "default_target_lang")]
    pub target_lang: String,
    /// Provider wire name, parsed at dispatch time
    #[serde(default = "default_provider")]
    pub provider: String,
}

impl TranslationRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_lang: default_source_lang(),
            target_lang: default_target_lang(),
            provider: default_provider(),
        }
    }

    pub fn with_languages(mut self, source_lang: impl Into<String>, target_lang: impl Into<String>) -> Self {
        self.source_lang = source_lang.into();
        self.target_lang = target_lang.into();
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }
}

/// What a backend produces on success.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub text: String,
    /// Source language as reported by the backend
    pub source_lang: String,
}

/// Normalized outcome of a translation. Exactly one of `translated_text` and
/// `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    pub source_lang: String,
    pub target_lang: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranslationResult {
    pub fn succeeded(request: &TranslationRequest, translation: Translation) -> Self {
        Self {
            success: true,
            translated_text: Some(translation.text),
            source_lang: translation.source_lang,
            target_lang: request.target_lang.clone(),
            error: None,
        }
    }

    pub fn failed(request: &TranslationRequest, error: impl Display) -> Self {
        Self {
            success: false,
            translated_text: None,
            source_lang: request.source_lang.clone(),
            target_lang: request.target_lang.clone(),
            error: Some(error.to_string()),
        }
    }
}

/// Results of a batch, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTranslationResult {
    pub success: bool,
    pub results: Vec<TranslationResult>,
}

/// Instruction prompt for translation-tuned models (Hunyuan-MT style).
pub fn build_translation_prompt(text: &str, target_lang: &str) -> String {
    format!(
        "将以下文本翻译为{}，注意只需要输出翻译后的结果，不要额外解释：\n\n{}",
        display_name(target_lang),
        text
    )
}
