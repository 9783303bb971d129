//! Native llama.cpp engine (CPU only).

use std::num::NonZeroU32;
use std::sync::OnceLock;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use tracing::debug;

use super::{EngineFactory, EngineSpec, SamplingParams, TextEngine, TokenFlow};
use crate::error::EngineError;

const SAMPLER_SEED: u32 = 1234;
const BATCH_CAPACITY: usize = 512;

// llama.cpp may only be initialised once per process. Callers hold the
// engine manager lock, so initialisation is never contended.
static BACKEND: OnceLock<LlamaBackend> = OnceLock::new();

fn backend() -> Result<&'static LlamaBackend, EngineError> {
    if let Some(backend) = BACKEND.get() {
        return Ok(backend);
    }
    let mut backend = LlamaBackend::init()
        .map_err(|e| EngineError::Unsupported(format!("llama.cpp backend init failed: {}", e)))?;
    backend.void_logs();
    Ok(BACKEND.get_or_init(|| backend))
}

pub struct LlamaEngineFactory;

impl EngineFactory for LlamaEngineFactory {
    fn create(&self, spec: &EngineSpec) -> Result<Box<dyn TextEngine>, EngineError> {
        Ok(Box::new(LlamaEngine::load(spec)?))
    }
}

/// A loaded GGUF model. A fresh context is created per generation call so the
/// KV cache never leaks between requests.
pub struct LlamaEngine {
    model: LlamaModel,
    n_ctx: u32,
    threads: i32,
}

impl LlamaEngine {
    pub fn load(spec: &EngineSpec) -> Result<Self, EngineError> {
        let backend = backend()?;
        let params = LlamaModelParams::default().with_n_gpu_layers(spec.gpu_layers);
        let model = LlamaModel::load_from_file(backend, &spec.model_path, &params).map_err(|e| {
            EngineError::InitFailed {
                path: spec.model_path.clone(),
                reason: e.to_string(),
            }
        })?;

        debug!(
            "Loaded {} (trained context {})",
            spec.model_path.display(),
            model.n_ctx_train()
        );

        Ok(Self {
            model,
            n_ctx: spec.fingerprint.context_length,
            threads: spec.fingerprint.threads as i32,
        })
    }
}

impl TextEngine for LlamaEngine {
    fn generate(
        &mut self,
        prompt: &str,
        params: &SamplingParams,
        sink: &mut dyn FnMut(&str) -> TokenFlow,
    ) -> Result<(), EngineError> {
        let backend = backend()?;
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(self.n_ctx))
            .with_n_threads(self.threads)
            .with_n_threads_batch(self.threads);
        let mut ctx = self
            .model
            .new_context(backend, ctx_params)
            .map_err(|e| EngineError::Generation(format!("create context: {}", e)))?;

        let prompt_tokens = self
            .model
            .str_to_token(prompt, AddBos::Always)
            .map_err(|e| EngineError::Generation(format!("tokenize prompt: {}", e)))?;
        let n_ctx = ctx.n_ctx() as usize;
        if prompt_tokens.is_empty() || prompt_tokens.len() + 1 >= n_ctx {
            return Err(EngineError::Generation(format!(
                "prompt too long: {} tokens for a context of {}",
                prompt_tokens.len(),
                n_ctx
            )));
        }

        // Feed the prompt in n_batch sized chunks; only the last token needs logits.
        let n_batch = (ctx.n_batch() as usize).max(1);
        let last_index = prompt_tokens.len() - 1;
        for (chunk_index, chunk) in prompt_tokens.chunks(n_batch).enumerate() {
            let mut batch = LlamaBatch::new(chunk.len().max(BATCH_CAPACITY), 1);
            for (i, token) in chunk.iter().copied().enumerate() {
                let pos = chunk_index * n_batch + i;
                batch
                    .add(token, pos as i32, &[0], pos == last_index)
                    .map_err(|e| EngineError::Generation(format!("batch prompt: {}", e)))?;
            }
            ctx.decode(&mut batch)
                .map_err(|e| EngineError::Generation(format!("decode prompt: {}", e)))?;
        }

        let mut sampler = if params.temperature <= 0.0 {
            LlamaSampler::greedy()
        } else {
            LlamaSampler::chain_simple([
                LlamaSampler::temp(params.temperature),
                LlamaSampler::dist(SAMPLER_SEED),
            ])
        };

        let budget = (params.max_tokens as usize).min(n_ctx - prompt_tokens.len() - 1);
        let mut pending: Vec<u8> = Vec::new();
        let mut batch = LlamaBatch::new(BATCH_CAPACITY, 1);
        let mut n_cur = prompt_tokens.len() as i32;

        for _ in 0..budget {
            let token = sampler.sample(&ctx, -1);
            if self.model.is_eog_token(token) {
                break;
            }

            let bytes = self
                .model
                .token_to_bytes(token, Special::Tokenize)
                .map_err(|e| EngineError::Generation(format!("detokenize: {}", e)))?;
            pending.extend_from_slice(&bytes);
            if let Some(piece) = take_complete_utf8(&mut pending) {
                if sink(&piece) == TokenFlow::Stop {
                    return Ok(());
                }
            }

            batch.clear();
            batch
                .add(token, n_cur, &[0], true)
                .map_err(|e| EngineError::Generation(format!("batch token: {}", e)))?;
            n_cur += 1;
            ctx.decode(&mut batch)
                .map_err(|e| EngineError::Generation(format!("decode: {}", e)))?;
        }

        if !pending.is_empty() {
            sink(&String::from_utf8_lossy(&pending));
        }
        Ok(())
    }
}

/// Drain the longest valid UTF-8 prefix of `pending`. Multi-byte characters
/// split across tokens stay buffered; invalid bytes are replaced.
fn take_complete_utf8(pending: &mut Vec<u8>) -> Option<String> {
    let valid = match std::str::from_utf8(pending) {
        Ok(_) => pending.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            return Some(text);
        }
    };
    if valid == 0 {
        return None;
    }
    let rest = pending.split_off(valid);
    let text = String::from_utf8_lossy(pending).into_owned();
    *pending = rest;
    Some(text)
}
