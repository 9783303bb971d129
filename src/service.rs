use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::catalog::{ModelCatalog, ModelListing, ModelSwitch};
use crate::config::{ConfigDocument, ConfigSnapshot, ConfigStore, SavedConfig};
use crate::engine::{
    EngineFactory, EngineManager, EngineStatus, InferenceMode, StatusBoard, default_factory,
};
use crate::error::{ConfigError, Result};
use crate::translate::cloud::CloudBackend;
use crate::translate::local::LocalBackend;
use crate::translate::{
    BatchTranslationResult, ProviderDispatcher, TranslationBackend, TranslationRequest,
    TranslationResult,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub engine: EngineStatus,
}

/// Application context: owns the configuration store and the engine, and
/// exposes the calls the HTTP layer maps its endpoints onto.
pub struct TranslationService {
    store: Arc<ConfigStore>,
    engine: Arc<Mutex<EngineManager>>,
    status: StatusBoard,
    dispatcher: ProviderDispatcher,
    catalog: ModelCatalog,
}

impl TranslationService {
    /// Service rooted at `install_root` with the engine and cloud client of
    /// this build.
    pub fn new<P: AsRef<Path>>(install_root: P) -> Result<Self> {
        let store = Arc::new(ConfigStore::new(install_root));
        let cloud = Arc::new(CloudBackend::new()?);
        Ok(Self::from_parts(store, default_factory(), cloud))
    }

    pub fn from_parts(
        store: Arc<ConfigStore>,
        factory: Arc<dyn EngineFactory>,
        cloud: Arc<dyn TranslationBackend>,
    ) -> Self {
        let manager = EngineManager::new(factory);
        let status = manager.status_board();
        let engine = Arc::new(Mutex::new(manager));
        let local = Arc::new(LocalBackend::new(engine.clone()));
        let dispatcher = ProviderDispatcher::new(store.clone(), local, cloud);
        let catalog = ModelCatalog::new(store.clone(), engine.clone());

        info!("Translation service ready, config: {}", store.primary_path().display());
        Self {
            store,
            engine,
            status,
            dispatcher,
            catalog,
        }
    }

    pub async fn translate(&self, request: &TranslationRequest) -> TranslationResult {
        self.dispatcher.translate(request).await
    }

    pub async fn batch_translate(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
        provider: &str,
    ) -> BatchTranslationResult {
        self.dispatcher
            .batch_translate(texts, source_lang, target_lang, provider)
            .await
    }

    pub fn get_config(&self) -> ConfigDocument {
        self.store.get_config()
    }

    pub fn update_config(&self, doc: &ConfigDocument) -> std::result::Result<SavedConfig, ConfigError> {
        self.store.update_config(doc)
    }

    pub fn list_models(&self) -> Result<ModelListing> {
        self.catalog.list_models()
    }

    pub async fn switch_model(&self, name: &str) -> Result<ModelSwitch> {
        self.catalog.switch_model(name).await
    }

    pub fn inference_mode(&self) -> InferenceMode {
        ConfigSnapshot::capture(&self.store).inference_mode()
    }

    /// Persist `mode` and invalidate the engine if it differs from the stored
    /// one. Returns whether anything changed.
    pub async fn set_inference_mode(&self, mode: &str) -> Result<bool> {
        let mode: InferenceMode = mode.parse()?;
        let mut doc = self.store.get_config();
        let current = doc
            .get("inference_mode")
            .and_then(Value::as_str)
            .unwrap_or(InferenceMode::default().as_str());
        if current == mode.as_str() {
            info!("Inference mode is already {}", mode);
            return Ok(false);
        }

        doc.set("inference_mode", Value::String(mode.as_str().to_string()));
        self.store.update_config(&doc)?;
        self.engine.lock().await.invalidate();
        info!("Inference mode set to {}", mode);
        Ok(true)
    }

    /// Does not wait for a local generation in progress.
    pub fn engine_status(&self) -> EngineStatus {
        self.status.current()
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "ok",
            engine: self.engine_status(),
        }
    }

    /// Release the engine; the service stays usable and reloads on demand.
    pub async fn shutdown(&self) {
        self.engine.lock().await.release();
        info!("Translation service resources released");
    }
}
