use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{ConfigStore, SavedConfig};
use crate::engine::{EngineManager, file_name_of, model_files};
use crate::error::{Result, TranslatorError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub size_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelListing {
    pub model_dir: PathBuf,
    pub models: Vec<ModelDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSwitch {
    pub model: String,
    pub model_path: PathBuf,
    pub saved: SavedConfig,
}

/// Installed models and the active-model selection.
pub struct ModelCatalog {
    store: Arc<ConfigStore>,
    engine: Arc<Mutex<EngineManager>>,
}

impl ModelCatalog {
    pub fn new(store: Arc<ConfigStore>, engine: Arc<Mutex<EngineManager>>) -> Self {
        Self { store, engine }
    }

    fn model_dir(&self) -> PathBuf {
        self.store.resolve_model_dir(&self.store.get_config().model_dir())
    }

    /// Model files in the configured directory, sorted by name. The directory
    /// is not created when missing.
    pub fn list_models(&self) -> Result<ModelListing> {
        let model_dir = self.model_dir();
        if !model_dir.is_dir() {
            return Err(TranslatorError::ModelDirMissing(model_dir.display().to_string()));
        }

        let mut models = Vec::new();
        for path in model_files(&model_dir) {
            match std::fs::metadata(&path) {
                Ok(meta) => models.push(describe(&path, meta.len())),
                Err(e) => warn!("Skipping unreadable model {}: {}", path.display(), e),
            }
        }
        models.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(ModelListing { model_dir, models })
    }

    /// Make `name` the active model. The engine is invalidated, not reloaded;
    /// the next local translation loads the new model.
    pub async fn switch_model(&self, name: &str) -> Result<ModelSwitch> {
        let model_dir = self.model_dir();
        let model_path = model_dir.join(name);

        let is_plain_name = Path::new(name).file_name().map(|n| n == name).unwrap_or(false);
        if !is_plain_name || !model_path.is_file() {
            return Err(TranslatorError::ModelNotFound(model_path.display().to_string()));
        }

        let mut doc = self.store.get_config();
        doc.set_current_model(name);
        let saved = self.store.update_config(&doc)?;

        self.engine.lock().await.invalidate();
        info!("Switched to model: {}", name);

        Ok(ModelSwitch {
            model: name.to_string(),
            model_path,
            saved,
        })
    }
}

fn describe(path: &Path, size_bytes: u64) -> ModelDescriptor {
    let size_mb = (size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0;
    ModelDescriptor {
        name: file_name_of(path),
        path: path.to_path_buf(),
        size_bytes,
        size_mb,
    }
}
