use std::path::PathBuf;
use thiserror::Error;

/// Failures reading, validating or persisting the configuration document.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to save config (primary: {primary}; fallback: {fallback})")]
    Unwritable { primary: String, fallback: String },
}

/// Failures creating or driving the local inference engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to load model {path}: {reason}")]
    InitFailed { path: PathBuf, reason: String },

    #[error("No .gguf model found in {dir}")]
    NoModelAvailable { dir: PathBuf },

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Local inference unavailable: {0}")]
    Unsupported(String),
}

/// Failures inside a translation backend. These never leave the dispatcher;
/// they are folded into a failed `TranslationResult`.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Baidu translation API is not configured: set baidu_appid and baidu_appkey")]
    MissingCredentials,

    #[error("Baidu translation API error {code}: {message}")]
    VendorError { code: String, message: String },

    #[error("Request to translation API failed: {0}")]
    Transport(String),

    #[error("Malformed translation API response: {0}")]
    MalformedResponse(String),

    #[error("Text to translate is empty")]
    EmptyText,

    #[error("Background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Error, Debug)]
pub enum TranslatorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Model directory does not exist: {0}")]
    ModelDirMissing(String),

    #[error("Model file does not exist: {0}")]
    ModelNotFound(String),

    #[error("Invalid inference mode '{0}'. Valid modes: cpu")]
    InvalidMode(String),
}

pub type Result<T> = std::result::Result<T, TranslatorError>;
