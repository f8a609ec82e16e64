//! `sidecar_session`: long-lived model session.
//!
//! Requests arrive on stdin as JSON lines, events leave on stdout. Logs go
//! to stderr so they never interleave with the protocol.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use model_sidecar::backend::default_backend;
use model_sidecar::config::SessionArgs;
use model_sidecar::logger;
use model_sidecar::session::{server, Session};

fn main() -> ExitCode {
    let args = SessionArgs::parse();
    if let Err(e) = logger::init("session", &args.log) {
        eprintln!("[SESSION] Failed to initialise logging: {e}");
    }

    info!("[SESSION] Starting session process (pid={})", std::process::id());
    let mut session = Session::new(default_backend(), args.defaults());

    match server::run(&mut session, io::stdin().lock(), io::stdout().lock()) {
        Ok(reason) => {
            info!("[SESSION] Exiting ({reason:?})");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("[SESSION] Pipe failure: {e}");
            ExitCode::FAILURE
        }
    }
}
