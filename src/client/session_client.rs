//! Typed host-side handle to a running `sidecar_session` process.
//!
//! A reader thread decodes the child's stdout into [`SessionEvent`]s and
//! forwards them over a channel; requests are written straight to stdin.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{ChildStdin, ChildStdout, ExitStatus};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use sidecar_protocol::{decode_event, GenerateRequest, InitRequest, LineWriter, SessionEvent, SessionRequest};

use super::process_manager::ProcessManager;
use super::ClientError;

#[derive(Debug)]
pub struct SessionClient {
    process: ProcessManager,
    stdin: Option<LineWriter<ChildStdin>>,
    events: Receiver<SessionEvent>,
    reader: Option<JoinHandle<()>>,
}

impl SessionClient {
    /// Spawn the session binary and attach to its pipes.
    pub fn spawn<I, S>(program: &Path, args: I) -> Result<Self, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let process = ProcessManager::spawn(program, args)?;
        let stdin = process.take_stdin().ok_or(ClientError::PipeUnavailable("stdin"))?;
        let stdout = process.take_stdout().ok_or(ClientError::PipeUnavailable("stdout"))?;

        let (tx, rx) = unbounded();
        let reader = thread::Builder::new()
            .name("sidecar-stdout".to_string())
            .spawn(move || read_events(stdout, tx))
            .map_err(ClientError::Io)?;

        Ok(Self {
            process,
            stdin: Some(LineWriter::new(stdin)),
            events: rx,
            reader: Some(reader),
        })
    }

    /// Write one raw line to the sidecar, bypassing the request encoder.
    pub fn send_line(&mut self, line: &str) -> Result<(), ClientError> {
        use std::io::Write;
        let stdin = self.stdin.as_mut().ok_or(ClientError::Closed)?;
        let inner = stdin.get_mut();
        inner.write_all(line.as_bytes())?;
        inner.write_all(b"\n")?;
        inner.flush()?;
        Ok(())
    }

    pub fn send(&mut self, request: &SessionRequest) -> Result<(), ClientError> {
        let stdin = self.stdin.as_mut().ok_or(ClientError::Closed)?;
        stdin.send(request)?;
        Ok(())
    }

    /// Next event, waiting at most `timeout`.
    pub fn next_event(&self, timeout: Duration) -> Result<SessionEvent, ClientError> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Ok(event),
            Err(RecvTimeoutError::Timeout) => Err(ClientError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(ClientError::Exited),
        }
    }

    /// Send `init` and wait for `ready`. `status` lines are collected and
    /// returned; an `error` fails the call.
    pub fn init(&mut self, request: InitRequest, timeout: Duration) -> Result<Vec<String>, ClientError> {
        self.send(&SessionRequest::Init(request))?;

        let mut statuses = Vec::new();
        loop {
            match self.next_event(timeout)? {
                SessionEvent::Status { message } => {
                    info!("[CLIENT] {message}");
                    statuses.push(message);
                }
                SessionEvent::Ready => return Ok(statuses),
                SessionEvent::Error { message } => return Err(ClientError::Remote(message)),
                other => return Err(ClientError::Unexpected(other)),
            }
        }
    }

    /// Send `generate`, feed each chunk to `on_chunk`, and return the full
    /// text from `done`.
    pub fn generate<F>(
        &mut self,
        request: GenerateRequest,
        timeout: Duration,
        mut on_chunk: F,
    ) -> Result<String, ClientError>
    where
        F: FnMut(&str),
    {
        self.send(&SessionRequest::Generate(request))?;

        loop {
            match self.next_event(timeout)? {
                SessionEvent::Chunk { text } => on_chunk(&text),
                SessionEvent::Done { text } => return Ok(text),
                SessionEvent::Error { message } => return Err(ClientError::Remote(message)),
                other => return Err(ClientError::Unexpected(other)),
            }
        }
    }

    /// Ask the sidecar to stop and wait up to `grace` for it to exit,
    /// killing it otherwise.
    pub fn stop(mut self, grace: Duration) -> Result<(), ClientError> {
        let sent = self.send(&SessionRequest::Stop);
        if let Err(e) = &sent {
            warn!("[CLIENT] Could not send stop: {e}");
        }

        let acknowledged = sent.is_ok()
            && matches!(self.next_event(grace), Ok(SessionEvent::Stopped));
        // Closing stdin also ends the loop of a sidecar that missed `stop`.
        self.stdin = None;

        if self.process.wait_timeout(grace).is_none() {
            warn!("[CLIENT] Sidecar did not exit within {grace:?}, killing");
            self.process.kill();
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }

        if acknowledged {
            Ok(())
        } else {
            Err(ClientError::Exited)
        }
    }

    pub fn is_alive(&self) -> bool {
        self.process.is_alive()
    }

    /// Close the sidecar's stdin. A healthy session treats this as end of
    /// input and exits on its own.
    pub fn close_input(&mut self) {
        self.stdin = None;
    }

    /// Wait up to `timeout` for the sidecar to exit, without killing it.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ExitStatus> {
        self.process.wait_timeout(timeout)
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.stdin = None;
        self.process.kill();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

fn read_events(stdout: ChildStdout, tx: Sender<SessionEvent>) {
    let reader = BufReader::new(stdout);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("[CLIENT] Sidecar stdout read error: {e}");
                break;
            }
        };
        match decode_event(&line) {
            Ok(Some(event)) => {
                debug!("[CLIENT] <- {event:?}");
                if tx.send(event).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => warn!("[CLIENT] Ignoring undecodable line: {e}"),
        }
    }
    debug!("[CLIENT] Stdout reader exiting");
}
