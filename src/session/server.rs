//! Session read loop.
//!
//! Runs as a child process spawned by the host. Reads JSON requests from
//! stdin, dispatches them to the [`Session`], and writes JSON events to
//! stdout. All log output goes to stderr (inherited by the parent).

use std::io::{self, BufRead, Write};

use log::{debug, info};
use sidecar_protocol::{decode_request_bytes, LineWriter};

use super::{Flow, Session};
use crate::error::SidecarError;

/// Why the read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The host sent `stop`.
    Stopped,
    /// The host closed the pipe.
    EndOfInput,
}

/// Serve requests until `stop` or end of input.
///
/// Returns `Err` only when stdout is gone or stdin fails at the OS level.
pub fn run<R: BufRead, W: Write>(
    session: &mut Session,
    mut reader: R,
    writer: W,
) -> io::Result<ExitReason> {
    let mut out = LineWriter::new(writer);
    let mut buf = Vec::new();

    info!("[SESSION] Ready, waiting for commands...");

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            info!("[SESSION] End of input, shutting down");
            return Ok(ExitReason::EndOfInput);
        }

        let request = match decode_request_bytes(&buf) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(e) => {
                session.report(&SidecarError::from(e), &mut out)?;
                continue;
            }
        };

        debug!("[SESSION] Received {request:?}");
        if session.handle(request, &mut out)? == Flow::Stop {
            return Ok(ExitReason::Stopped);
        }
    }
}
