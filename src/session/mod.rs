//! Long-lived model session.
//!
//! One session per process. It reads one request, fully processes it
//! (including any blocking collaborator call) and only then reads the next,
//! so `init` and `generate` never overlap.

pub mod chunker;
pub mod server;

use std::fmt;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};

use log::{info, warn};
use sidecar_protocol::{GenerateRequest, InitRequest, LineWriter, SessionEvent, SessionRequest};

use crate::backend::{self, LoadedModel, ModelBackend, ModelConfig, SamplingParams};
use crate::config::SessionDefaults;
use crate::error::{panic_message, SidecarError};
use chunker::Chunks;

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Loading,
    Ready,
    Generating,
    Stopped,
    /// A load failed. Not terminal: a later `init` may retry.
    Error,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Loading => "loading",
            Phase::Ready => "ready",
            Phase::Generating => "generating",
            Phase::Stopped => "stopped",
            Phase::Error => "error",
        };
        f.write_str(name)
    }
}

/// Whether the read loop should keep going after a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub struct Session {
    backend: Box<dyn ModelBackend>,
    defaults: SessionDefaults,
    phase: Phase,
    model: Option<Box<dyn LoadedModel>>,
    config: Option<ModelConfig>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("phase", &self.phase)
            .field("config", &self.config)
            .field("model_loaded", &self.model.is_some())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(backend: Box<dyn ModelBackend>, defaults: SessionDefaults) -> Self {
        Self {
            backend,
            defaults,
            phase: Phase::Uninitialized,
            model: None,
            config: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Configuration of the loaded model, if any.
    pub fn config(&self) -> Option<&ModelConfig> {
        self.config.as_ref()
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Process one request, writing every resulting event to `out`.
    ///
    /// Failures are reported as a single `error` event and the session
    /// carries on; only a broken output pipe is returned as `Err`.
    pub fn handle<W: Write>(
        &mut self,
        request: SessionRequest,
        out: &mut LineWriter<W>,
    ) -> std::io::Result<Flow> {
        let result = match request {
            SessionRequest::Init(init) => self.init(init, out),
            SessionRequest::Generate(generate) => self.generate(generate, out),
            SessionRequest::Stop => {
                info!("[SESSION] Stop requested");
                self.model = None;
                self.config = None;
                self.phase = Phase::Stopped;
                out.send(&SessionEvent::Stopped)?;
                return Ok(Flow::Stop);
            }
            SessionRequest::Unknown { action } => {
                Err(SidecarError::Validation(format!("Unknown action: {action}")))
            }
        };

        match result {
            Ok(()) => Ok(Flow::Continue),
            Err(SidecarError::Io(e)) => Err(e),
            Err(e) => {
                self.report(&e, out)?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Send `error` for a failure that did not come from a request handler
    /// (e.g. an undecodable line).
    pub fn report<W: Write>(&self, error: &SidecarError, out: &mut LineWriter<W>) -> std::io::Result<()> {
        if error.is_collaborator() {
            warn!("[SESSION] {error}");
        } else {
            info!("[SESSION] Rejected: {error}");
        }
        out.send(&SessionEvent::error(error.to_string()))
    }

    fn init<W: Write>(&mut self, request: InitRequest, out: &mut LineWriter<W>) -> Result<(), SidecarError> {
        if let Some(loaded) = self.config.as_ref().filter(|_| self.model.is_some()) {
            return Err(SidecarError::Validation(format!(
                "Model already loaded: {}",
                loaded.model_id
            )));
        }
        if !matches!(self.phase, Phase::Uninitialized | Phase::Error) {
            return Err(SidecarError::Validation(format!(
                "Cannot init while {}",
                self.phase
            )));
        }

        let config = ModelConfig {
            model_id: request.model_id.unwrap_or_else(|| self.defaults.model_id.clone()),
            compression: request
                .compression
                .filter(|c| !c.is_empty() && c != "none"),
            max_length: request.max_length.unwrap_or(self.defaults.max_length),
        };

        out.send(&SessionEvent::status(format!(
            "Loading model {} ...",
            config.model_id
        )))?;
        info!(
            "[SESSION] Loading model: {} (compression: {:?}, max_length: {})",
            config.model_id, config.compression, config.max_length
        );

        self.phase = Phase::Loading;
        let backend = &mut self.backend;
        let loaded = panic::catch_unwind(AssertUnwindSafe(|| backend.load(&config)))
            .unwrap_or_else(|payload| {
                Err(anyhow::anyhow!(
                    "loader panicked: {}",
                    panic_message(payload.as_ref())
                ))
            });

        match loaded {
            Ok(model) => {
                info!("[SESSION] Model loaded successfully");
                self.model = Some(model);
                self.config = Some(config);
                self.phase = Phase::Ready;
                out.send(&SessionEvent::Ready)?;
                Ok(())
            }
            Err(e) => {
                self.model = None;
                self.config = None;
                self.phase = Phase::Error;
                Err(SidecarError::Load(e))
            }
        }
    }

    fn generate<W: Write>(
        &mut self,
        request: GenerateRequest,
        out: &mut LineWriter<W>,
    ) -> Result<(), SidecarError> {
        let (Some(model), Some(config)) = (self.model.as_mut(), self.config.as_ref()) else {
            return Err(SidecarError::Validation(
                "Model not loaded. Send init first.".to_string(),
            ));
        };
        if self.phase != Phase::Ready {
            return Err(SidecarError::Validation(format!(
                "Cannot generate while {}",
                self.phase
            )));
        }

        let max_length = request.max_length.unwrap_or(config.max_length);
        let params = SamplingParams {
            max_new_tokens: request.max_new_tokens.unwrap_or(self.defaults.max_new_tokens),
            do_sample: true,
            top_p: self.defaults.top_p,
            temperature: request.temperature.unwrap_or(self.defaults.temperature),
        };
        let prompt = request.prompt;

        info!(
            "[SESSION] Starting generation: prompt_len={}, max_new_tokens={}, temperature={}",
            prompt.len(),
            params.max_new_tokens,
            params.temperature
        );

        self.phase = Phase::Generating;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            backend::generate_text(model.as_mut(), &prompt, max_length, &params)
        }))
        .unwrap_or_else(|payload| {
            Err(anyhow::anyhow!(
                "model panicked: {}",
                panic_message(payload.as_ref())
            ))
        });
        self.phase = Phase::Ready;

        let full_text = result.map_err(SidecarError::Generate)?;
        let generated = strip_prompt(&full_text, &prompt);

        for event in Chunks::new(generated, self.defaults.chunk_size) {
            out.send(&event)?;
        }
        Ok(())
    }
}

/// Drop the echoed prompt from the decoded output.
///
/// If the tokenizer normalised the leading text so the output no longer
/// starts with the exact prompt, the whole output is returned unchanged and
/// the prompt may appear in the stream.
pub fn strip_prompt<'a>(full_text: &'a str, prompt: &str) -> &'a str {
    full_text.strip_prefix(prompt).unwrap_or(full_text)
}
