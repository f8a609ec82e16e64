//! Child process lifecycle for a sidecar.
//!
//! Spawns the sidecar binary with piped stdin/stdout. Its stderr is
//! inherited, so sidecar logs land in the host's stderr.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};

use super::ClientError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Owns one sidecar child process. Dropping it kills the child.
#[derive(Debug)]
pub struct ProcessManager {
    child: Mutex<Option<Child>>,
    program: PathBuf,
}

impl ProcessManager {
    /// Spawn `program` with `args`.
    pub fn spawn<I, S>(program: &Path, args: I) -> Result<Self, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        info!("[CLIENT] Spawning sidecar: {}", program.display());

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ClientError::Spawn {
                program: program.to_path_buf(),
                source,
            })?;

        Ok(Self {
            child: Mutex::new(Some(child)),
            program: program.to_path_buf(),
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn take_stdin(&self) -> Option<ChildStdin> {
        self.child
            .lock()
            .ok()
            .and_then(|mut guard| guard.as_mut().and_then(|c| c.stdin.take()))
    }

    pub fn take_stdout(&self) -> Option<ChildStdout> {
        self.child
            .lock()
            .ok()
            .and_then(|mut guard| guard.as_mut().and_then(|c| c.stdout.take()))
    }

    /// Exit status if the child has exited (and been reaped), without blocking.
    pub fn try_wait(&self) -> Option<ExitStatus> {
        let mut guard = self.child.lock().ok()?;
        let child = guard.as_mut()?;
        match child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                warn!("[CLIENT] try_wait failed: {e}");
                None
            }
        }
    }

    pub fn is_alive(&self) -> bool {
        self.child.lock().is_ok_and(|guard| guard.is_some()) && self.try_wait().is_none()
    }

    /// Poll for exit for up to `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.try_wait() {
                return Some(status);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Kill the child immediately and reap it.
    pub fn kill(&self) {
        if let Ok(mut guard) = self.child.lock() {
            if let Some(mut child) = guard.take() {
                if matches!(child.try_wait(), Ok(None)) {
                    info!("[CLIENT] Killing sidecar process");
                    let _ = child.kill();
                }
                let _ = child.wait();
            }
        }
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        self.kill();
    }
}
