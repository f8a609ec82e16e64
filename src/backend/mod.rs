//! Inference collaborator seam.
//!
//! The session only ever sees these traits. Which adapter backs them is a
//! build-time choice:
//! - `llama` feature: llama.cpp through `llama-cpp-2`
//! - `mock` feature: deterministic echo model for host E2E tests
//! - neither: [`DisabledBackend`], which fails every load with a clear reason

#[cfg(feature = "llama")]
pub mod llama;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

/// Token id as produced by the collaborator's tokenizer.
pub type TokenId = i32;

/// What the session was asked to load.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub model_id: String,
    /// `None` means full precision. Other values are passed through as-is.
    pub compression: Option<String>,
    /// Maximum sequence length; also the default tokenizer truncation.
    pub max_length: u32,
}

/// Sampling settings for one `generate` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub max_new_tokens: u32,
    pub do_sample: bool,
    pub top_p: f32,
    pub temperature: f32,
}

/// Loads models. Called once per successful `init`.
pub trait ModelBackend {
    fn load(&mut self, config: &ModelConfig) -> anyhow::Result<Box<dyn LoadedModel>>;
}

/// A loaded model handle, owned exclusively by the session.
pub trait LoadedModel {
    /// Tokenize `prompt`, truncating to at most `max_length` tokens.
    fn tokenize(&self, prompt: &str, max_length: u32) -> anyhow::Result<Vec<TokenId>>;

    /// Run generation. Returns prompt ids followed by the continuation.
    fn generate(&mut self, input_ids: &[TokenId], params: &SamplingParams) -> anyhow::Result<Vec<TokenId>>;

    /// Decode ids to text, skipping special tokens.
    fn decode(&self, ids: &[TokenId]) -> anyhow::Result<String>;
}

/// Tokenize, generate and decode in one go. The result still contains the
/// prompt text (if the tokenizer round-trips it).
pub fn generate_text(
    model: &mut dyn LoadedModel,
    prompt: &str,
    max_length: u32,
    params: &SamplingParams,
) -> anyhow::Result<String> {
    let input_ids = model.tokenize(prompt, max_length)?;
    let output_ids = model.generate(&input_ids, params)?;
    model.decode(&output_ids)
}

/// Split `len` prompt positions into consecutive ranges of at most `cap`,
/// so no single decode call exceeds the context's batch size.
#[cfg_attr(not(feature = "llama"), allow(dead_code))]
pub(crate) fn batch_ranges(len: usize, cap: usize) -> impl Iterator<Item = std::ops::Range<usize>> {
    let cap = cap.max(1);
    (0..len.div_ceil(cap)).map(move |i| i * cap..len.min((i + 1) * cap))
}

/// Backend used when no inference adapter was compiled in.
#[derive(Debug, Clone)]
pub struct DisabledBackend {
    reason: String,
}

impl DisabledBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl ModelBackend for DisabledBackend {
    fn load(&mut self, config: &ModelConfig) -> anyhow::Result<Box<dyn LoadedModel>> {
        anyhow::bail!("cannot load {}: {}", config.model_id, self.reason)
    }
}

/// Pick the adapter for this build.
#[cfg(feature = "llama")]
pub fn default_backend() -> Box<dyn ModelBackend> {
    match llama::LlamaCppBackend::new() {
        Ok(backend) => Box::new(backend),
        Err(e) => {
            log::error!("[SESSION] llama.cpp backend failed to initialize: {e}");
            Box::new(DisabledBackend::new(format!("llama.cpp backend unavailable: {e}")))
        }
    }
}

/// Pick the adapter for this build.
#[cfg(all(feature = "mock", not(feature = "llama")))]
pub fn default_backend() -> Box<dyn ModelBackend> {
    Box::new(mock::EchoBackend::default())
}

/// Pick the adapter for this build.
#[cfg(not(any(feature = "llama", feature = "mock")))]
pub fn default_backend() -> Box<dyn ModelBackend> {
    Box::new(DisabledBackend::new(
        "no inference backend compiled in (rebuild with --features llama)",
    ))
}
