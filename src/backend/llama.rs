// llama.cpp inference adapter.
//
// `model_id` is a path to a GGUF file. GGUF weights carry their own
// quantization, so `compression` is only checked, never applied.

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use log::{debug, info};

use super::{batch_ranges, LoadedModel, ModelBackend, ModelConfig, SamplingParams, TokenId};

const SUPPORTED_COMPRESSIONS: &[&str] = &["4bit", "8bit"];
const BATCH_SIZE: usize = 512;

/// Owns the process-wide llama.cpp backend. Create once per process.
pub struct LlamaCppBackend {
    backend: Arc<LlamaBackend>,
    gpu_layers: u32,
}

impl std::fmt::Debug for LlamaCppBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlamaCppBackend")
            .field("gpu_layers", &self.gpu_layers)
            .finish_non_exhaustive()
    }
}

impl LlamaCppBackend {
    pub fn new() -> anyhow::Result<Self> {
        let backend = LlamaBackend::init().context("Failed to init backend")?;
        let gpu_layers = std::env::var("SIDECAR_GPU_LAYERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(Self {
            backend: Arc::new(backend),
            gpu_layers,
        })
    }
}

impl ModelBackend for LlamaCppBackend {
    fn load(&mut self, config: &ModelConfig) -> anyhow::Result<Box<dyn LoadedModel>> {
        if let Some(mode) = config.compression.as_deref() {
            if !SUPPORTED_COMPRESSIONS.contains(&mode) {
                anyhow::bail!("Unsupported compression '{mode}'. Choose from 4bit, 8bit or none.");
            }
            info!("[SESSION] compression '{mode}' requested; GGUF quantization is used as stored");
        }

        let path = Path::new(&config.model_id);
        if !path.exists() {
            anyhow::bail!("Model file not found: {}", config.model_id);
        }

        let params = LlamaModelParams::default().with_n_gpu_layers(self.gpu_layers);
        let model = LlamaModel::load_from_file(&self.backend, path, &params)
            .with_context(|| format!("llama.cpp could not load {}", config.model_id))?;

        Ok(Box::new(LlamaCppModel {
            backend: Arc::clone(&self.backend),
            model,
            max_length: config.max_length,
        }))
    }
}

struct LlamaCppModel {
    backend: Arc<LlamaBackend>,
    model: LlamaModel,
    max_length: u32,
}

impl LoadedModel for LlamaCppModel {
    fn tokenize(&self, prompt: &str, max_length: u32) -> anyhow::Result<Vec<TokenId>> {
        let mut tokens = self.model.str_to_token(prompt, AddBos::Always)?;
        tokens.truncate(max_length as usize);
        Ok(tokens.into_iter().map(|t| t.0).collect())
    }

    fn generate(&mut self, input_ids: &[TokenId], params: &SamplingParams) -> anyhow::Result<Vec<TokenId>> {
        if input_ids.is_empty() {
            anyhow::bail!("prompt produced no tokens");
        }

        let needed = input_ids.len() as u32 + params.max_new_tokens;
        let n_ctx = NonZeroU32::new(needed.max(self.max_length)).context("context size must be non-zero")?;
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(Some(n_ctx))
            .with_n_batch(BATCH_SIZE as u32);
        let mut ctx = self.model.new_context(&self.backend, ctx_params)?;

        // Prompt goes in BATCH_SIZE tokens at a time; only the last position
        // needs logits.
        let mut batch = LlamaBatch::new(BATCH_SIZE, 1);
        let last = input_ids.len() - 1;
        for range in batch_ranges(input_ids.len(), BATCH_SIZE) {
            batch.clear();
            for pos in range.clone() {
                batch.add(LlamaToken::new(input_ids[pos]), pos as i32, &[0], pos == last)?;
            }
            ctx.decode(&mut batch)
                .with_context(|| format!("prompt decode failed at tokens {}..{}", range.start, range.end))?;
        }

        let mut sampler = if params.do_sample {
            LlamaSampler::chain_simple([
                LlamaSampler::top_p(params.top_p, 1),
                LlamaSampler::temp(params.temperature),
                LlamaSampler::dist(seed()),
            ])
        } else {
            LlamaSampler::greedy()
        };

        let mut output = input_ids.to_vec();
        let mut position = input_ids.len() as i32;
        for _ in 0..params.max_new_tokens {
            let token = sampler.sample(&ctx, batch.n_tokens() - 1);
            if self.model.is_eog_token(token) {
                break;
            }
            output.push(token.0);

            batch.clear();
            batch.add(token, position, &[0], true)?;
            position += 1;
            ctx.decode(&mut batch)?;
        }

        debug!(
            "[SESSION] generated {} new tokens",
            output.len() - input_ids.len()
        );
        Ok(output)
    }

    fn decode(&self, ids: &[TokenId]) -> anyhow::Result<String> {
        let bos = self.model.token_bos();
        let mut text = String::new();
        for &id in ids {
            let token = LlamaToken::new(id);
            if token == bos || self.model.is_eog_token(token) {
                continue;
            }
            text.push_str(&self.model.token_to_str(token, Special::Plaintext)?);
        }
        Ok(text)
    }
}

fn seed() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(1234, |d| d.subsec_nanos())
}
