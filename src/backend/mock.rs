// Mock implementation for host E2E tests.
// Tokens are Unicode scalar values; the "model" appends a fixed reply.

use super::{LoadedModel, ModelBackend, ModelConfig, SamplingParams, TokenId};

const SUPPORTED_COMPRESSIONS: &[&str] = &["4bit", "8bit"];

/// Loads [`EchoModel`]s. Rejects the same inputs a real loader would:
/// an empty model id or an unsupported compression mode.
#[derive(Debug, Clone)]
pub struct EchoBackend {
    reply: String,
}

impl EchoBackend {
    pub fn new(reply: impl Into<String>) -> Self {
        Self { reply: reply.into() }
    }
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self::new(" [echo]")
    }
}

impl ModelBackend for EchoBackend {
    fn load(&mut self, config: &ModelConfig) -> anyhow::Result<Box<dyn LoadedModel>> {
        if config.model_id.trim().is_empty() {
            anyhow::bail!("model id is empty");
        }
        if let Some(mode) = config.compression.as_deref() {
            if !SUPPORTED_COMPRESSIONS.contains(&mode) {
                anyhow::bail!("Unsupported compression '{mode}'. Choose from 4bit, 8bit or none.");
            }
        }
        Ok(Box::new(EchoModel {
            reply: self.reply.chars().map(|c| c as TokenId).collect(),
        }))
    }
}

#[derive(Debug)]
pub struct EchoModel {
    reply: Vec<TokenId>,
}

impl LoadedModel for EchoModel {
    fn tokenize(&self, prompt: &str, max_length: u32) -> anyhow::Result<Vec<TokenId>> {
        Ok(prompt
            .chars()
            .take(max_length as usize)
            .map(|c| c as TokenId)
            .collect())
    }

    fn generate(&mut self, input_ids: &[TokenId], params: &SamplingParams) -> anyhow::Result<Vec<TokenId>> {
        let mut output = input_ids.to_vec();
        output.extend(self.reply.iter().take(params.max_new_tokens as usize));
        Ok(output)
    }

    fn decode(&self, ids: &[TokenId]) -> anyhow::Result<String> {
        ids.iter()
            .map(|&id| {
                u32::try_from(id)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| anyhow::anyhow!("invalid token id {id}"))
            })
            .collect()
    }
}
