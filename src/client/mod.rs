//! Host side of the session protocol: spawn a sidecar, drive it, stop it.

pub mod process_manager;
pub mod session_client;

use std::path::PathBuf;
use std::time::Duration;

use sidecar_protocol::SessionEvent;

pub use process_manager::ProcessManager;
pub use session_client::SessionClient;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to spawn {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Sidecar {0} not available")]
    PipeUnavailable(&'static str),

    #[error("Sidecar input already closed")]
    Closed,

    #[error("No response from sidecar within {0:?}")]
    Timeout(Duration),

    #[error("Sidecar exited")]
    Exited,

    /// An `error` line from the sidecar.
    #[error("{0}")]
    Remote(String),

    #[error("Unexpected sidecar message: {0:?}")]
    Unexpected(SessionEvent),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
