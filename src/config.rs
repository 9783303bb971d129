use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::engine::InferenceMode;
use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "config.json";
const USER_APP_DIR: &str = "TranslatorApp";
const LEGACY_MODEL_PATH_KEY: &str = "model_path";

// Default values for settings missing from the document
fn default_model_dir() -> String {
    "./models".to_string()
}

fn default_context_length() -> u32 {
    2048
}

fn default_threads() -> u32 {
    4
}

fn default_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f64 {
    0.1
}

fn default_baidu_endpoint() -> String {
    "http://api.fanyi.baidu.com/api/trans/vip/translate".to_string()
}

fn default_inference_mode() -> String {
    "cpu".to_string()
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_timeout() -> u64 {
    5000
}

fn default_theme_color() -> String {
    "#6366f1".to_string()
}

// The desktop shell writes `null` for cleared fields
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Typed view over the configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding .gguf model files, absolute or relative to the install root
    #[serde(default = "default_model_dir", deserialize_with = "null_as_default")]
    pub model_dir: String,
    /// Active model filename inside `model_dir`; empty or null means "first .gguf found"
    #[serde(default, deserialize_with = "null_as_default")]
    pub current_model: String,
    /// Context window of the loaded model (tokens)
    #[serde(default = "default_context_length")]
    pub context_length: u32,
    /// CPU threads used by the engine
    #[serde(default = "default_threads")]
    pub threads: u32,
    /// Upper bound on generated tokens per request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature, 0.0 ..= 2.0
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Baidu translation App ID
    #[serde(default)]
    pub baidu_appid: String,
    /// Baidu translation App Key
    #[serde(default)]
    pub baidu_appkey: String,
    /// Baidu translation endpoint
    #[serde(default = "default_baidu_endpoint")]
    pub baidu_endpoint: String,
    /// Inference mode of the local engine (only "cpu")
    #[serde(default = "default_inference_mode")]
    pub inference_mode: String,
    // UI shell settings, carried so the desktop shell can round-trip them
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub auto_copy: bool,
    #[serde(default)]
    pub dark_mode: bool,
    #[serde(default = "default_theme_color")]
    pub theme_color: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            current_model: String::new(),
            context_length: default_context_length(),
            threads: default_threads(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            baidu_appid: String::new(),
            baidu_appkey: String::new(),
            baidu_endpoint: default_baidu_endpoint(),
            inference_mode: default_inference_mode(),
            api_base_url: default_api_base_url(),
            timeout: default_timeout(),
            auto_copy: false,
            dark_mode: false,
            theme_color: default_theme_color(),
        }
    }
}

/// The keys the cloud backend reads. Parsed on its own so a bad local-engine
/// value never breaks the cloud path.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CloudSettings {
    #[serde(default, deserialize_with = "null_as_default")]
    pub baidu_appid: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub baidu_appkey: String,
    #[serde(default, deserialize_with = "null_as_default")]
    baidu_endpoint: String,
}

impl CloudSettings {
    /// Both credential fields as stored, or `None` when either is blank.
    pub fn credentials(&self) -> Option<CloudCredentials> {
        if self.baidu_appid.trim().is_empty() || self.baidu_appkey.trim().is_empty() {
            return None;
        }
        Some(CloudCredentials {
            app_id: self.baidu_appid.clone(),
            app_key: self.baidu_appkey.clone(),
        })
    }

    pub fn endpoint(&self) -> String {
        if self.baidu_endpoint.trim().is_empty() {
            default_baidu_endpoint()
        } else {
            self.baidu_endpoint.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudCredentials {
    pub app_id: String,
    pub app_key: String,
}

/// Snapshot of the settings that drive the local engine, with `model_dir`
/// already resolved to an absolute path.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub model_dir: PathBuf,
    pub current_model: String,
    pub context_length: u32,
    pub threads: u32,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// The persisted JSON object. Keys the schema does not know about are kept
/// verbatim so a load/save cycle never drops data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigDocument(Map<String, Value>);

impl Default for ConfigDocument {
    fn default() -> Self {
        match serde_json::to_value(Settings::default()) {
            Ok(Value::Object(map)) => Self(map),
            _ => Self(Map::new()),
        }
    }
}

impl From<Map<String, Value>> for ConfigDocument {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl ConfigDocument {
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        match serde_json::from_str::<Value>(content) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(_) => Err(ConfigError::Invalid(
                "configuration must be a JSON object".to_string(),
            )),
            Err(e) => Err(ConfigError::Invalid(format!("Failed to parse config: {}", e))),
        }
    }

    /// Two-space indented JSON with non-ASCII characters kept literal.
    pub fn to_pretty_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(&self.0)
            .map_err(|e| ConfigError::Invalid(format!("Failed to serialize config: {}", e)))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Shallow merge: every key of `patch` overwrites the same key here.
    pub fn merge(&mut self, patch: Map<String, Value>) {
        for (key, value) in patch {
            self.0.insert(key, value);
        }
    }

    pub fn settings(&self) -> Result<Settings, ConfigError> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn cloud_settings(&self) -> Result<CloudSettings, ConfigError> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// `model_dir` as written, or the default when absent, blank or not a string.
    pub fn model_dir(&self) -> String {
        match self.0.get("model_dir") {
            Some(Value::String(dir)) if !dir.trim().is_empty() => dir.clone(),
            _ => default_model_dir(),
        }
    }

    pub fn set_current_model(&mut self, name: &str) {
        self.set("current_model", Value::String(name.to_string()));
    }

    /// Split a legacy `model_path` into `model_dir` + `current_model`.
    /// Returns true when the document changed.
    fn migrate_legacy_model_path(&mut self, install_root: &Path) -> bool {
        if self.0.contains_key("model_dir") {
            return false;
        }
        let Some(Value::String(model_path)) = self.0.get(LEGACY_MODEL_PATH_KEY).cloned() else {
            return false;
        };

        let legacy = Path::new(&model_path);
        let file_name = legacy
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parent = legacy.parent().unwrap_or(Path::new(""));
        let model_dir = if parent.is_absolute() {
            parent.to_path_buf()
        } else {
            normalize_path(&install_root.join(parent))
        };

        info!(
            "Migrating legacy model_path '{}' to model_dir '{}' + current_model '{}'",
            model_path,
            model_dir.display(),
            file_name
        );

        self.0.remove(LEGACY_MODEL_PATH_KEY);
        self.set(
            "model_dir",
            Value::String(model_dir.to_string_lossy().into_owned()),
        );
        self.set("current_model", Value::String(file_name));
        true
    }
}

/// Where a saved document landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigLocation {
    Primary,
    UserData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedConfig {
    pub location: ConfigLocation,
    pub path: PathBuf,
}

/// Layered configuration source: project-local file, then the per-user data
/// directory, then built-in defaults.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    install_root: PathBuf,
    primary_path: PathBuf,
    user_path: Option<PathBuf>,
}

impl ConfigStore {
    /// Store rooted at `install_root`, using `<install_root>/config.json` and
    /// the platform data directory as fallback.
    pub fn new<P: AsRef<Path>>(install_root: P) -> Self {
        let install_root = absolutize(install_root.as_ref());
        let primary_path = install_root.join(CONFIG_FILE_NAME);
        let user_path = dirs::data_dir().map(|d| d.join(USER_APP_DIR).join(CONFIG_FILE_NAME));
        Self {
            install_root,
            primary_path,
            user_path,
        }
    }

    pub fn with_paths<P: AsRef<Path>>(
        install_root: P,
        primary_path: PathBuf,
        user_path: Option<PathBuf>,
    ) -> Self {
        Self {
            install_root: absolutize(install_root.as_ref()),
            primary_path,
            user_path,
        }
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    pub fn primary_path(&self) -> &Path {
        &self.primary_path
    }

    pub fn user_path(&self) -> Option<&Path> {
        self.user_path.as_deref()
    }

    /// Current document. Never fails: unreadable files are logged and skipped.
    pub fn get_config(&self) -> ConfigDocument {
        if self.primary_path.exists() {
            match read_document(&self.primary_path) {
                Ok(doc) => return self.finish_load(doc),
                Err(e) => warn!("{}", e),
            }
        }

        if let Some(user_path) = &self.user_path {
            if user_path.exists() {
                match read_document(user_path) {
                    Ok(doc) => return self.finish_load(doc),
                    Err(e) => warn!("{}", e),
                }
            }
        }

        debug!("No configuration file found, using built-in defaults");
        ConfigDocument::default()
    }

    fn finish_load(&self, mut doc: ConfigDocument) -> ConfigDocument {
        if doc.migrate_legacy_model_path(&self.install_root) {
            if let Err(e) = self.update_config(&doc) {
                warn!("Failed to persist migrated configuration: {}", e);
            }
        }
        doc
    }

    /// Atomically write `doc` to the primary location, falling back to the
    /// per-user location.
    pub fn update_config(&self, doc: &ConfigDocument) -> Result<SavedConfig, ConfigError> {
        let content = doc.to_pretty_json()?;

        let primary_err = match write_atomically(&self.primary_path, &content) {
            Ok(()) => {
                debug!("Saved configuration to {}", self.primary_path.display());
                return Ok(SavedConfig {
                    location: ConfigLocation::Primary,
                    path: self.primary_path.clone(),
                });
            }
            Err(e) => {
                error!(
                    "Failed to save configuration to {}: {}",
                    self.primary_path.display(),
                    e
                );
                format!("{}: {}", self.primary_path.display(), e)
            }
        };

        let Some(user_path) = &self.user_path else {
            return Err(ConfigError::Unwritable {
                primary: primary_err,
                fallback: "no per-user data directory on this platform".to_string(),
            });
        };

        match write_atomically(user_path, &content) {
            Ok(()) => {
                info!("Saved configuration to user data directory {}", user_path.display());
                Ok(SavedConfig {
                    location: ConfigLocation::UserData,
                    path: user_path.clone(),
                })
            }
            Err(e) => {
                error!(
                    "Failed to save configuration to {}: {}",
                    user_path.display(),
                    e
                );
                Err(ConfigError::Unwritable {
                    primary: primary_err,
                    fallback: format!("{}: {}", user_path.display(), e),
                })
            }
        }
    }

    /// `model_dir` as an absolute path; relative values hang off the install root.
    pub fn resolve_model_dir(&self, model_dir: &str) -> PathBuf {
        let dir = Path::new(model_dir);
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            normalize_path(&self.install_root.join(dir))
        }
    }

    /// Validated engine snapshot of `doc`.
    pub fn engine_config(&self, doc: &ConfigDocument) -> Result<EngineConfig, ConfigError> {
        let settings = doc.settings()?;

        if settings.context_length == 0 {
            return Err(ConfigError::Invalid("context_length must be greater than 0".to_string()));
        }
        if settings.threads == 0 {
            return Err(ConfigError::Invalid("threads must be greater than 0".to_string()));
        }
        if settings.max_tokens == 0 {
            return Err(ConfigError::Invalid("max_tokens must be greater than 0".to_string()));
        }
        if !(0.0..=2.0).contains(&settings.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature must be within 0.0..=2.0, got {}",
                settings.temperature
            )));
        }

        Ok(EngineConfig {
            model_dir: self.resolve_model_dir(&doc.model_dir()),
            current_model: settings.current_model.trim().to_string(),
            context_length: settings.context_length,
            threads: settings.threads,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature as f32,
        })
    }
}

/// The configuration as seen by one dispatch. Taken once per request so a
/// concurrent save cannot change settings halfway through.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    store: ConfigStore,
    document: ConfigDocument,
}

impl ConfigSnapshot {
    pub fn capture(store: &ConfigStore) -> Self {
        Self {
            store: store.clone(),
            document: store.get_config(),
        }
    }

    pub fn document(&self) -> &ConfigDocument {
        &self.document
    }

    pub fn cloud_settings(&self) -> Result<CloudSettings, ConfigError> {
        self.document.cloud_settings()
    }

    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        self.store.engine_config(&self.document)
    }

    pub fn inference_mode(&self) -> InferenceMode {
        let Some(Value::String(mode)) = self.document.get("inference_mode") else {
            return InferenceMode::default();
        };
        mode.parse().unwrap_or_else(|_| {
            warn!("Unknown inference_mode '{}' in config, using cpu", mode);
            InferenceMode::default()
        })
    }
}

fn read_document(path: &Path) -> Result<ConfigDocument, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    ConfigDocument::from_json_str(&content).map_err(|e| ConfigError::Unreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Write to a temp file beside `path`, then rename over it.
fn write_atomically(path: &Path, content: &str) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return normalize_path(path);
    }
    match std::env::current_dir() {
        Ok(cwd) => normalize_path(&cwd.join(path)),
        Err(_) => normalize_path(path),
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
