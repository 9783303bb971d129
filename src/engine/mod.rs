// Local inference engine lifecycle
//
// The engine handle is a large in-memory model. `EngineManager` owns at most
// one of them and rebuilds it only when the settings it was loaded with
// change or when it is explicitly invalidated:
//
//   Absent --get_or_create--> Ready(fingerprint)
//   Ready  --invalidate / fingerprint change--> Invalidated (handle released)
//   Invalidated --get_or_create--> Ready(new fingerprint)
//   any --release--> Absent
//
// The manager sits behind the generation lock, so every transition also
// publishes an `EngineStatus` snapshot that can be read without that lock.
//
// Engines are produced by an `EngineFactory` so the manager can be driven by
// a fake engine in tests. The native llama.cpp engine lives in `llama`.

#[cfg(feature = "llama")]
pub mod llama;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::EngineConfig;
use crate::error::{EngineError, TranslatorError};

/// File extension of loadable model files.
pub const MODEL_EXTENSION: &str = "gguf";

/// Generation stops at the first of these substrings.
pub const STOP_SEQUENCES: [&str; 2] = ["\n\n", "###"];

/// How the local engine runs. Only CPU inference is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceMode {
    Cpu,
}

impl InferenceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InferenceMode::Cpu => "cpu",
        }
    }

    /// Layers offloaded to the GPU.
    pub fn gpu_layers(&self) -> u32 {
        match self {
            InferenceMode::Cpu => 0,
        }
    }
}

impl Default for InferenceMode {
    fn default() -> Self {
        InferenceMode::Cpu
    }
}

impl fmt::Display for InferenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InferenceMode {
    type Err = TranslatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(InferenceMode::Cpu),
            _ => Err(TranslatorError::InvalidMode(s.to_string())),
        }
    }
}

/// The settings an engine handle is bound to. Any change means reload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EngineFingerprint {
    pub model_dir: PathBuf,
    pub current_model: String,
    pub context_length: u32,
    pub threads: u32,
}

/// Everything needed to construct an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSpec {
    pub fingerprint: EngineFingerprint,
    pub model_path: PathBuf,
    pub gpu_layers: u32,
}

impl EngineSpec {
    /// Resolve the model file for `config`. With no `current_model`, the first
    /// .gguf file in directory listing order is used.
    pub fn resolve(config: &EngineConfig, mode: InferenceMode) -> Result<Self, EngineError> {
        let current_model = if config.current_model.is_empty() {
            let first = model_files(&config.model_dir)
                .into_iter()
                .next()
                .ok_or_else(|| EngineError::NoModelAvailable {
                    dir: config.model_dir.clone(),
                })?;
            let name = file_name_of(&first);
            debug!("No current model configured, using first model found: {}", name);
            name
        } else {
            config.current_model.clone()
        };

        let model_path = config.model_dir.join(&current_model);
        if !model_path.is_file() {
            warn!("Model file not found: {}", model_path.display());
            return Err(EngineError::InitFailed {
                path: model_path,
                reason: "model file does not exist; download a GGUF translation model".to_string(),
            });
        }

        Ok(Self {
            fingerprint: EngineFingerprint {
                model_dir: config.model_dir.clone(),
                current_model,
                context_length: config.context_length,
                threads: config.threads,
            },
            model_path,
            gpu_layers: mode.gpu_layers(),
        })
    }
}

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub stop: Vec<String>,
}

impl SamplingParams {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stop: STOP_SEQUENCES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Returned by a token sink to continue or end generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFlow {
    Continue,
    Stop,
}

/// A loaded model capable of text completion.
pub trait TextEngine: Send {
    /// Generate a completion of `prompt`, feeding each decoded piece to `sink`
    /// until end of generation, `params.max_tokens`, or `TokenFlow::Stop`.
    fn generate(
        &mut self,
        prompt: &str,
        params: &SamplingParams,
        sink: &mut dyn FnMut(&str) -> TokenFlow,
    ) -> Result<(), EngineError>;

    /// Free native resources ahead of drop.
    fn release(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Constructs engine handles.
pub trait EngineFactory: Send + Sync {
    fn create(&self, spec: &EngineSpec) -> Result<Box<dyn TextEngine>, EngineError>;
}

/// Run a streamed generation and return the assembled text, cut at the first
/// stop sequence.
pub fn complete(
    engine: &mut dyn TextEngine,
    prompt: &str,
    params: &SamplingParams,
) -> Result<String, EngineError> {
    let mut output = String::new();
    engine.generate(prompt, params, &mut |piece| {
        output.push_str(piece);
        match earliest_stop(&output, &params.stop) {
            Some(cut) => {
                output.truncate(cut);
                TokenFlow::Stop
            }
            None => TokenFlow::Continue,
        }
    })?;
    Ok(output)
}

fn earliest_stop(text: &str, stops: &[String]) -> Option<usize> {
    stops
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min()
}

enum EngineState {
    Absent,
    Ready {
        fingerprint: EngineFingerprint,
        handle: Box<dyn TextEngine>,
    },
    /// The handle is gone; the fingerprint is kept for status reports.
    Invalidated { fingerprint: EngineFingerprint },
}

/// Engine state reported to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub state: &'static str,
    pub model: Option<String>,
    pub builds: u64,
    pub gpu_layers_used: u32,
    pub using_gpu: bool,
    pub using_cpu: bool,
}

impl EngineStatus {
    fn absent() -> Self {
        Self {
            state: "absent",
            model: None,
            builds: 0,
            gpu_layers_used: InferenceMode::Cpu.gpu_layers(),
            using_gpu: false,
            using_cpu: true,
        }
    }
}

/// Last status published by an `EngineManager`. Reading it never waits on a
/// generation in progress.
#[derive(Debug, Clone)]
pub struct StatusBoard(Arc<Mutex<EngineStatus>>);

impl StatusBoard {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(EngineStatus::absent())))
    }

    pub fn current(&self) -> EngineStatus {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn publish(&self, status: EngineStatus) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }
}

/// Owner of the single process-wide engine handle.
pub struct EngineManager {
    factory: Arc<dyn EngineFactory>,
    state: EngineState,
    builds: u64,
    board: StatusBoard,
}

impl EngineManager {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            state: EngineState::Absent,
            builds: 0,
            board: StatusBoard::new(),
        }
    }

    /// Lock-free view of this manager's status.
    pub fn status_board(&self) -> StatusBoard {
        self.board.clone()
    }

    /// The engine bound to `spec`, reusing the current one when its fingerprint
    /// matches and it has not been invalidated.
    pub fn get_or_create(&mut self, spec: &EngineSpec) -> Result<&mut dyn TextEngine, EngineError> {
        let reusable = matches!(
            &self.state,
            EngineState::Ready { fingerprint, .. } if *fingerprint == spec.fingerprint
        );

        if !reusable {
            if matches!(self.state, EngineState::Ready { .. }) {
                info!("Engine configuration changed, reloading model");
                self.invalidate();
            }
            self.release();

            info!(
                "Creating CPU engine, model: {}, context: {}, threads: {}",
                spec.model_path.display(),
                spec.fingerprint.context_length,
                spec.fingerprint.threads
            );
            let handle = self.factory.create(spec)?;
            self.builds += 1;
            self.state = EngineState::Ready {
                fingerprint: spec.fingerprint.clone(),
                handle,
            };
            self.board.publish(self.status());
        }

        match &mut self.state {
            EngineState::Ready { handle, .. } => Ok(handle.as_mut()),
            _ => Err(EngineError::Generation("engine is not ready".to_string())),
        }
    }

    /// Free the loaded model now and force the next `get_or_create` to rebuild.
    pub fn invalidate(&mut self) {
        self.state = match std::mem::replace(&mut self.state, EngineState::Absent) {
            EngineState::Ready { fingerprint, handle } => {
                info!("Engine for {} invalidated", fingerprint.current_model);
                release_handle(&fingerprint, handle);
                EngineState::Invalidated { fingerprint }
            }
            other => other,
        };
        self.board.publish(self.status());
    }

    /// Drop the current handle, if any.
    pub fn release(&mut self) {
        if let EngineState::Ready { fingerprint, handle } =
            std::mem::replace(&mut self.state, EngineState::Absent)
        {
            release_handle(&fingerprint, handle);
        }
        self.board.publish(self.status());
    }

    pub fn status(&self) -> EngineStatus {
        let (state, model) = match &self.state {
            EngineState::Absent => ("absent", None),
            EngineState::Ready { fingerprint, .. } => ("ready", Some(fingerprint.current_model.clone())),
            EngineState::Invalidated { fingerprint, .. } => {
                ("invalidated", Some(fingerprint.current_model.clone()))
            }
        };
        EngineStatus {
            state,
            model,
            builds: self.builds,
            gpu_layers_used: InferenceMode::Cpu.gpu_layers(),
            using_gpu: false,
            using_cpu: true,
        }
    }

    /// Number of engines constructed so far.
    pub fn builds(&self) -> u64 {
        self.builds
    }
}

impl Drop for EngineManager {
    fn drop(&mut self) {
        self.release();
    }
}

fn release_handle(fingerprint: &EngineFingerprint, mut handle: Box<dyn TextEngine>) {
    info!("Releasing engine for {}", fingerprint.current_model);
    if let Err(e) = handle.release() {
        warn!("Failed to release engine cleanly: {}", e);
    }
}

/// Engine factory for this build: llama.cpp when compiled with the `llama`
/// feature, otherwise one that reports local inference as unavailable.
pub fn default_factory() -> Arc<dyn EngineFactory> {
    #[cfg(feature = "llama")]
    {
        Arc::new(llama::LlamaEngineFactory)
    }
    #[cfg(not(feature = "llama"))]
    {
        Arc::new(UnavailableEngineFactory)
    }
}

/// Factory used when the crate is built without native inference.
pub struct UnavailableEngineFactory;

impl EngineFactory for UnavailableEngineFactory {
    fn create(&self, _spec: &EngineSpec) -> Result<Box<dyn TextEngine>, EngineError> {
        Err(EngineError::Unsupported(
            "built without llama.cpp support; rebuild with `--features llama`".to_string(),
        ))
    }
}

/// Model files directly inside `dir`, in directory listing order.
pub fn model_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .follow_links(true)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .map(|ext| ext == MODEL_EXTENSION)
                .unwrap_or(false)
        })
        .collect()
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
