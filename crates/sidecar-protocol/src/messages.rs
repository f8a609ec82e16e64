//! Message types for host ↔ sidecar communication.

use serde::{Deserialize, Serialize};

/// Request sent from the host to the session process via stdin.
///
/// Decoding goes through [`crate::decode_request`] so that an unrecognised
/// `action` still produces a value the session can report on.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SessionRequest {
    /// Load a model. Only legal while no model is loaded.
    Init(InitRequest),
    /// Run one generation against the loaded model.
    Generate(GenerateRequest),
    /// End the session.
    Stop,
    /// Any `action` value the session does not understand.
    #[serde(skip)]
    Unknown {
        /// The raw action, rendered as text (`null` when absent).
        action: String,
    },
}

/// Parameters of an `init` action. Missing fields fall back to the
/// session's configured defaults.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct InitRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// `4bit`, `8bit`, `none` or absent. Not validated here.
    #[serde(default)]
    pub compression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
}

/// Parameters of a `generate` action.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Per-call override of the tokenizer truncation length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
}

/// Event written by the session process to stdout.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Human-readable progress note (e.g. before a blocking load).
    Status { message: String },
    /// Model loaded; `generate` is now accepted.
    Ready,
    /// One piece of generated text.
    Chunk { text: String },
    /// Generation finished; carries the full generated text.
    Done { text: String },
    /// Something went wrong. The session keeps running.
    Error { message: String },
    /// Acknowledges `stop`. Nothing follows it.
    Stopped,
}

impl SessionEvent {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Event written by the single-shot downloader to stdout.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadEvent {
    /// Periodic liveness/progress sample. Sizes and speed are preformatted.
    Progress {
        progress: u8,
        speed: String,
        downloaded: String,
        total: String,
    },
    /// Download finished; `path` is the local snapshot directory.
    Complete { path: String },
    /// Download failed. The process exits non-zero after this.
    Error { message: String },
}

impl DownloadEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
