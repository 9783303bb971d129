use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{TranslationBackend, common::{Translation, TranslationRequest, build_translation_prompt}};
use crate::config::ConfigSnapshot;
use crate::engine::{EngineManager, EngineSpec, SamplingParams, complete};
use crate::error::{BackendError, EngineError};

/// Translation with the local llama.cpp engine.
///
/// The engine is shared process-wide and is not reentrant: each request
/// holds the manager lock for the whole generation, and generation runs on
/// the blocking pool so it never stalls the async executor.
pub struct LocalBackend {
    engine: Arc<Mutex<EngineManager>>,
}

impl LocalBackend {
    pub fn new(engine: Arc<Mutex<EngineManager>>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl TranslationBackend for LocalBackend {
    async fn execute(
        &self,
        request: &TranslationRequest,
        config: &ConfigSnapshot,
    ) -> Result<Translation, BackendError> {
        let config = config.clone();
        let text = request.text.clone();
        let target_lang = request.target_lang.clone();

        let mut manager = self.engine.clone().lock_owned().await;

        // Model resolution scans the model directory, so it runs with the
        // generation on the blocking pool
        let text = tokio::task::spawn_blocking(move || -> Result<String, BackendError> {
            let engine_config = config.engine_config()?;
            let spec = EngineSpec::resolve(&engine_config, config.inference_mode())?;
            let params = SamplingParams::from_config(&engine_config);
            let prompt = build_translation_prompt(&text, &target_lang);

            info!(
                "Starting CPU translation with {} ({} chars -> {})",
                spec.fingerprint.current_model,
                text.chars().count(),
                target_lang
            );
            let engine = manager.get_or_create(&spec)?;
            Ok(complete(engine, &prompt, &params)?)
        })
        .await
        .map_err(|e| EngineError::Generation(format!("inference task failed: {}", e)))??;

        debug!("Local translation result: {}", text);
        Ok(Translation {
            text,
            source_lang: request.source_lang.clone(),
        })
    }
}
