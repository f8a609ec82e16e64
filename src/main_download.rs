//! `sidecar_download <MODEL_ID> [TARGET_DIR]`: fetch a model's weights,
//! reporting sampled progress on stdout as JSON lines.

use std::io;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use log::{error, info};
use sidecar_protocol::{DownloadEvent, LineWriter};

use model_sidecar::config::DownloadArgs;
use model_sidecar::download::{hub, DownloadCoordinator, DownloadTask, HubFetcher};
use model_sidecar::logger;

const USAGE: &str = "Usage: sidecar_download <MODEL_ID> [TARGET_DIR]";

fn main() -> ExitCode {
    let mut out = LineWriter::new(io::stdout().lock());

    let args = match DownloadArgs::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("{e}");
            let _ = out.send(&DownloadEvent::error(USAGE));
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logger::init("download", &args.log) {
        eprintln!("[DOWNLOAD] Failed to initialise logging: {e}");
    }
    info!("[DOWNLOAD] Starting download process (pid={})", std::process::id());

    let monitored = hub::monitored_dir(args.target_dir.as_deref(), &args.model_id);
    let task = DownloadTask::new(args.model_id.clone(), args.target_dir.clone(), monitored);
    let coordinator = DownloadCoordinator::new(args.interval());

    match coordinator.run(task, &HubFetcher::from_env(), &mut out) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("[DOWNLOAD] Exiting with failure: {e}");
            ExitCode::FAILURE
        }
    }
}
