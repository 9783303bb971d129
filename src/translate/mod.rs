// Translation backends
//
// Each provider implements `TranslationBackend`. `ProviderDispatcher` picks
// the backend for a request by exhaustive match over `ProviderKind` and folds
// every outcome, success or failure, into a `TranslationResult`:
// - LocalEngine: llama.cpp model loaded from the model directory
// - CloudApi: Baidu general translation API
//
// To add a provider, add a `ProviderKind` variant and the compiler points at
// every match that needs a backend for it.

pub mod common;
pub mod local;
pub mod cloud;

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

pub use common::*;
use crate::config::{ConfigSnapshot, ConfigStore};
use crate::error::BackendError;

/// Closed set of translation providers. The wire form is `as_str()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Local llama.cpp model
    LocalEngine,
    /// Baidu translation API
    CloudApi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::LocalEngine => "llama-cpp",
            ProviderKind::CloudApi => "baidu",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "llama-cpp" | "local" => Ok(ProviderKind::LocalEngine),
            "baidu" | "cloud" => Ok(ProviderKind::CloudApi),
            _ => Err(BackendError::UnsupportedProvider(s.to_string())),
        }
    }
}

/// A translation strategy.
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    async fn execute(
        &self,
        request: &TranslationRequest,
        config: &ConfigSnapshot,
    ) -> Result<Translation, BackendError>;
}

/// Routes requests to backends. Never returns an error: failures become
/// `success: false` results.
pub struct ProviderDispatcher {
    store: Arc<ConfigStore>,
    local: Arc<dyn TranslationBackend>,
    cloud: Arc<dyn TranslationBackend>,
}

impl ProviderDispatcher {
    pub fn new(
        store: Arc<ConfigStore>,
        local: Arc<dyn TranslationBackend>,
        cloud: Arc<dyn TranslationBackend>,
    ) -> Self {
        Self { store, local, cloud }
    }

    fn backend(&self, kind: ProviderKind) -> &dyn TranslationBackend {
        match kind {
            ProviderKind::LocalEngine => self.local.as_ref(),
            ProviderKind::CloudApi => self.cloud.as_ref(),
        }
    }

    pub async fn translate(&self, request: &TranslationRequest) -> TranslationResult {
        match self.execute(request).await {
            Ok(translation) => TranslationResult::succeeded(request, translation),
            Err(e) => {
                warn!("Translation via '{}' failed: {}", request.provider, e);
                TranslationResult::failed(request, e)
            }
        }
    }

    async fn execute(&self, request: &TranslationRequest) -> Result<Translation, BackendError> {
        let kind: ProviderKind = request.provider.parse()?;
        if request.text.trim().is_empty() {
            return Err(BackendError::EmptyText);
        }
        // Reading (and possibly migrating) the config file is blocking I/O
        let store = self.store.clone();
        let snapshot = tokio::task::spawn_blocking(move || ConfigSnapshot::capture(&store))
            .await
            .map_err(|e| BackendError::Task(e.to_string()))?;
        self.backend(kind).execute(request, &snapshot).await
    }

    /// Translate `texts` one after another. Item failures stay in their slot
    /// and do not stop the batch.
    pub async fn batch_translate(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
        provider: &str,
    ) -> BatchTranslationResult {
        info!("Batch translating {} texts via '{}'", texts.len(), provider);

        let mut results = Vec::with_capacity(texts.len());
        for (idx, text) in texts.iter().enumerate() {
            let request = TranslationRequest::new(text.as_str())
                .with_languages(source_lang, target_lang)
                .with_provider(provider);
            let result = self.translate(&request).await;
            if !result.success {
                warn!("Batch item {}/{} failed", idx + 1, texts.len());
            }
            results.push(result);
        }

        BatchTranslationResult {
            success: true,
            results,
        }
    }
}
