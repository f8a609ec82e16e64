//! Defaults and command-line configuration for both process roles.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser};

// Protocol defaults applied when a request omits a field.
pub const DEFAULT_MODEL_ID: &str = "Qwen/Qwen2.5-7B-Instruct";
pub const DEFAULT_MAX_LENGTH: u32 = 128;
pub const DEFAULT_MAX_NEW_TOKENS: u32 = 64;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_TOP_P: f32 = 0.9;

/// Characters per emulated streaming chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 4;

/// Disk-usage sampling interval for the downloader.
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 1000;

/// Values the session falls back to when a request leaves a field out.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDefaults {
    pub model_id: String,
    pub max_length: u32,
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub chunk_size: usize,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            max_length: DEFAULT_MAX_LENGTH,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Logging flags shared by both binaries.
#[derive(Args, Debug, Clone, Default)]
pub struct LogArgs {
    /// Log level: off, error, warn, info, debug, trace.
    #[arg(long, env = "SIDECAR_LOG", default_value = "info")]
    pub log_level: String,

    /// Also append logs to this file.
    #[arg(long, env = "SIDECAR_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Write a timestamped log file into this directory.
    #[arg(long, env = "SIDECAR_LOG_DIR", conflicts_with = "log_file")]
    pub log_dir: Option<PathBuf>,
}

/// `sidecar_session` arguments. The protocol itself arrives on stdin.
#[derive(Parser, Debug)]
#[command(name = "sidecar_session", about = "Long-lived model session over JSON Lines stdio")]
pub struct SessionArgs {
    /// Characters per streamed chunk.
    #[arg(long, env = "SIDECAR_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Model used when `init` omits `model_id`.
    #[arg(long, env = "SIDECAR_DEFAULT_MODEL", default_value = DEFAULT_MODEL_ID)]
    pub default_model: String,

    #[command(flatten)]
    pub log: LogArgs,
}

impl SessionArgs {
    pub fn defaults(&self) -> SessionDefaults {
        SessionDefaults {
            model_id: self.default_model.clone(),
            chunk_size: self.chunk_size.max(1),
            ..SessionDefaults::default()
        }
    }
}

/// `sidecar_download <MODEL_ID> [TARGET_DIR]`.
#[derive(Parser, Debug)]
#[command(name = "sidecar_download", about = "Download model weights, reporting progress as JSON Lines")]
pub struct DownloadArgs {
    /// Hub repository id, e.g. `Qwen/Qwen2.5-7B-Instruct`.
    pub model_id: String,

    /// Download into `<TARGET_DIR>/<model_id with '/' replaced by '_'>`
    /// instead of the shared hub cache.
    pub target_dir: Option<PathBuf>,

    /// Progress sampling interval in milliseconds.
    #[arg(long, env = "SIDECAR_INTERVAL_MS", default_value_t = DEFAULT_SAMPLE_INTERVAL_MS)]
    pub interval_ms: u64,

    #[command(flatten)]
    pub log: LogArgs,
}

impl DownloadArgs {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}
