//! Process-boundary layer between a host application and a local model.
//!
//! Two process roles share one pattern: run a blocking collaborator call
//! and keep the host informed over a JSON Lines pipe.
//! - `sidecar_session`: long-lived; `init` → `generate`* → `stop`
//! - `sidecar_download`: single-shot; fetches weights while sampling disk usage

pub mod backend;
pub mod client;
pub mod config;
pub mod download;
pub mod error;
pub mod logger;
pub mod session;

pub use error::SidecarError;
