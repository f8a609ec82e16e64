//! Runs one blocking download on a worker thread while the calling thread
//! samples disk usage and reports progress.
//!
//! Thread design:
//! - worker (scoped, joined before return): `ArtifactFetcher::download`
//! - caller: selects between the sampling ticker and the worker's result

use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, tick};
use log::{debug, error, info, warn};
use sidecar_protocol::{DownloadEvent, LineWriter};

use super::sampler::{dir_size, ProgressSample, ProgressSampler};
use crate::error::{panic_message, SidecarError};

/// Fetches model artifacts. Implementations block until done.
pub trait ArtifactFetcher: Sync {
    /// Best-effort total size of the model's published files, in bytes.
    fn total_size(&self, model_id: &str) -> anyhow::Result<u64>;

    /// Download everything for `task.model_id`; returns the local path.
    fn download(&self, task: &DownloadTask) -> anyhow::Result<PathBuf>;
}

/// One single-shot download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadTask {
    pub model_id: String,
    pub target_dir: Option<PathBuf>,
    /// Directory whose size is sampled for progress.
    pub monitored_dir: PathBuf,
    /// Filled in by the coordinator; 0 while unknown.
    pub total_size: u64,
}

impl DownloadTask {
    pub fn new(model_id: impl Into<String>, target_dir: Option<PathBuf>, monitored_dir: PathBuf) -> Self {
        Self {
            model_id: model_id.into(),
            target_dir,
            monitored_dir,
            total_size: 0,
        }
    }
}

/// Drives a [`DownloadTask`] to completion and writes the download protocol.
#[derive(Debug, Clone)]
pub struct DownloadCoordinator {
    interval: Duration,
}

impl DownloadCoordinator {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Run the download. On success the final 100% `progress` and
    /// `complete` have been written; on a collaborator failure one `error`
    /// has been written and `SidecarError::Download` is returned.
    pub fn run<F: ArtifactFetcher, W: Write>(
        &self,
        mut task: DownloadTask,
        fetcher: &F,
        out: &mut LineWriter<W>,
    ) -> Result<PathBuf, SidecarError> {
        out.send(&DownloadEvent::Progress {
            progress: 0,
            speed: "Starting...".to_string(),
            downloaded: "0 B".to_string(),
            total: "Calculating...".to_string(),
        })?;

        task.total_size = match fetcher.total_size(&task.model_id) {
            Ok(size) => size,
            Err(e) => {
                warn!("[DOWNLOAD] Could not determine total size for {}: {e}", task.model_id);
                0
            }
        };
        info!(
            "[DOWNLOAD] Starting {} (total estimate: {} bytes, monitoring {})",
            task.model_id,
            task.total_size,
            task.monitored_dir.display()
        );

        match self.download_with_progress(&task, fetcher, out)? {
            Ok(path) => {
                out.send(&ProgressSample::complete(task.total_size).to_event())?;
                out.send(&DownloadEvent::Complete {
                    path: path.to_string_lossy().into_owned(),
                })?;
                info!("[DOWNLOAD] Complete: {}", path.display());
                Ok(path)
            }
            Err(e) => {
                error!("[DOWNLOAD] Failed: {e:#}");
                out.send(&DownloadEvent::error(format!("{e:#}")))?;
                Err(SidecarError::Download(e))
            }
        }
    }

    /// Outer `Result` is the output pipe; inner is the download itself.
    fn download_with_progress<F: ArtifactFetcher, W: Write>(
        &self,
        task: &DownloadTask,
        fetcher: &F,
        out: &mut LineWriter<W>,
    ) -> Result<anyhow::Result<PathBuf>, SidecarError> {
        let (done_tx, done_rx) = bounded::<anyhow::Result<PathBuf>>(1);

        thread::scope(|scope| -> Result<anyhow::Result<PathBuf>, SidecarError> {
            let worker = thread::Builder::new()
                .name("download-worker".to_string())
                .spawn_scoped(scope, move || {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| fetcher.download(task)))
                        .unwrap_or_else(|payload| {
                            Err(anyhow::anyhow!(
                                "download worker panicked: {}",
                                panic_message(payload.as_ref())
                            ))
                        });
                    let _ = done_tx.send(result);
                })?;

            let outcome = self.sample_until_done(task, &done_rx, out);

            if worker.join().is_err() {
                warn!("[DOWNLOAD] Worker thread panicked after reporting");
            }
            outcome
        })
    }

    fn sample_until_done<W: Write>(
        &self,
        task: &DownloadTask,
        done_rx: &crossbeam_channel::Receiver<anyhow::Result<PathBuf>>,
        out: &mut LineWriter<W>,
    ) -> Result<anyhow::Result<PathBuf>, SidecarError> {
        let ticker = tick(self.interval);
        let mut sampler = ProgressSampler::new(task.total_size, Instant::now());

        loop {
            select! {
                recv(done_rx) -> result => {
                    return Ok(result.unwrap_or_else(|_| {
                        Err(anyhow::anyhow!("download worker exited without a result"))
                    }));
                }
                recv(ticker) -> now => {
                    let now = now.unwrap_or_else(|_| Instant::now());
                    let sample = sampler.tick(dir_size(&task.monitored_dir), now);
                    debug!("[DOWNLOAD] {sample:?}");
                    out.send(&sample.to_event())?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Writes `chunks` files of `chunk_bytes` into the monitored dir, pausing
    /// between each so several sampling ticks observe partial progress.
    struct SlowFetcher {
        total: anyhow::Result<u64>,
        chunks: usize,
        chunk_bytes: usize,
        pause: Duration,
        fail_with: Option<&'static str>,
        finished: AtomicBool,
    }

    impl SlowFetcher {
        fn new(chunks: usize, chunk_bytes: usize) -> Self {
            Self {
                total: Ok((chunks * chunk_bytes) as u64),
                chunks,
                chunk_bytes,
                pause: Duration::from_millis(30),
                fail_with: None,
                finished: AtomicBool::new(false),
            }
        }
    }

    impl ArtifactFetcher for SlowFetcher {
        fn total_size(&self, _model_id: &str) -> anyhow::Result<u64> {
            match &self.total {
                Ok(total) => Ok(*total),
                Err(e) => Err(anyhow::anyhow!("{e}")),
            }
        }

        fn download(&self, task: &DownloadTask) -> anyhow::Result<PathBuf> {
            fs::create_dir_all(&task.monitored_dir)?;
            for i in 0..self.chunks {
                thread::sleep(self.pause);
                fs::write(
                    task.monitored_dir.join(format!("part-{i}.bin")),
                    vec![7u8; self.chunk_bytes],
                )?;
            }
            thread::sleep(self.pause);
            self.finished.store(true, Ordering::SeqCst);
            if let Some(message) = self.fail_with {
                anyhow::bail!(message);
            }
            Ok(task.monitored_dir.join("snapshot"))
        }
    }

    fn events(out: LineWriter<Vec<u8>>) -> Vec<DownloadEvent> {
        String::from_utf8(out.into_inner())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn progress_values(events: &[DownloadEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                DownloadEvent::Progress { progress, .. } => Some(*progress),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_progress_is_monotonic_and_completes_once() {
        let dir = tempfile::tempdir().unwrap();
        let monitored = dir.path().join("org_model");
        let task = DownloadTask::new("org/model", Some(dir.path().to_path_buf()), monitored.clone());
        let fetcher = SlowFetcher::new(8, 1024);
        let coordinator = DownloadCoordinator::new(Duration::from_millis(10));

        let mut out = LineWriter::new(Vec::new());
        let path = coordinator.run(task, &fetcher, &mut out).unwrap();
        assert_eq!(path, monitored.join("snapshot"));
        assert!(fetcher.finished.load(Ordering::SeqCst));

        let events = events(out);
        let progress = progress_values(&events);
        assert!(progress.len() > 3, "expected several samples, got {progress:?}");
        assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
        assert_eq!(progress.iter().filter(|&&p| p == 100).count(), 1);
        assert_eq!(*progress.last().unwrap(), 100);
        assert!(progress[..progress.len() - 1].iter().all(|&p| p <= 99));

        assert_eq!(
            events[0],
            DownloadEvent::Progress {
                progress: 0,
                speed: "Starting...".to_string(),
                downloaded: "0 B".to_string(),
                total: "Calculating...".to_string(),
            }
        );
        assert_eq!(
            events[events.len() - 2],
            DownloadEvent::Progress {
                progress: 100,
                speed: "0 B/s".to_string(),
                downloaded: "8 KB".to_string(),
                total: "8 KB".to_string(),
            }
        );
        assert_eq!(
            events.last(),
            Some(&DownloadEvent::Complete {
                path: monitored.join("snapshot").to_string_lossy().into_owned(),
            })
        );
    }

    #[test]
    fn test_unknown_total_reports_zero_progress() {
        let dir = tempfile::tempdir().unwrap();
        let monitored = dir.path().join("m");
        let task = DownloadTask::new("m", None, monitored);
        let mut fetcher = SlowFetcher::new(4, 512);
        fetcher.total = Err(anyhow::anyhow!("manifest unavailable"));
        let coordinator = DownloadCoordinator::new(Duration::from_millis(10));

        let mut out = LineWriter::new(Vec::new());
        coordinator.run(task, &fetcher, &mut out).unwrap();

        let events = events(out);
        let in_flight = &events[1..events.len() - 2];
        assert!(!in_flight.is_empty());
        for event in in_flight {
            match event {
                DownloadEvent::Progress { progress, total, .. } => {
                    assert_eq!(*progress, 0);
                    assert_eq!(total, "Unknown");
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_failure_emits_single_error_and_no_completion() {
        let dir = tempfile::tempdir().unwrap();
        let task = DownloadTask::new("org/missing", None, dir.path().join("x"));
        let mut fetcher = SlowFetcher::new(2, 64);
        fetcher.fail_with = Some("Repository Not Found for url");
        let coordinator = DownloadCoordinator::new(Duration::from_millis(10));

        let mut out = LineWriter::new(Vec::new());
        let err = coordinator.run(task, &fetcher, &mut out).unwrap_err();
        assert!(matches!(err, SidecarError::Download(_)));

        let events = events(out);
        assert_eq!(
            events.last(),
            Some(&DownloadEvent::error("Repository Not Found for url"))
        );
        assert_eq!(
            events.iter().filter(|e| matches!(e, DownloadEvent::Error { .. })).count(),
            1
        );
        assert!(!events.iter().any(|e| matches!(e, DownloadEvent::Complete { .. })));
        assert!(!progress_values(&events).contains(&100));
    }

    #[test]
    fn test_error_message_keeps_the_underlying_cause() {
        struct RefusingFetcher;
        impl ArtifactFetcher for RefusingFetcher {
            fn total_size(&self, _model_id: &str) -> anyhow::Result<u64> {
                Ok(10)
            }
            fn download(&self, _task: &DownloadTask) -> anyhow::Result<PathBuf> {
                use anyhow::Context;
                Err(anyhow::anyhow!("connection refused")).context("Failed to download model.safetensors")
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let task = DownloadTask::new("m", None, dir.path().to_path_buf());
        let mut out = LineWriter::new(Vec::new());
        let result = DownloadCoordinator::new(Duration::from_millis(10)).run(task, &RefusingFetcher, &mut out);
        assert!(result.is_err());

        assert_eq!(
            events(out).last(),
            Some(&DownloadEvent::error(
                "Failed to download model.safetensors: connection refused"
            ))
        );
    }

    #[test]
    fn test_worker_panic_becomes_error() {
        struct PanickingFetcher;
        impl ArtifactFetcher for PanickingFetcher {
            fn total_size(&self, _model_id: &str) -> anyhow::Result<u64> {
                Ok(10)
            }
            fn download(&self, _task: &DownloadTask) -> anyhow::Result<PathBuf> {
                panic!("disk exploded");
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let task = DownloadTask::new("m", None, dir.path().to_path_buf());
        let mut out = LineWriter::new(Vec::new());
        let result = DownloadCoordinator::new(Duration::from_millis(10)).run(task, &PanickingFetcher, &mut out);
        assert!(result.is_err());

        let events = events(out);
        match events.last() {
            Some(DownloadEvent::Error { message }) => {
                assert_eq!(message, "download worker panicked: disk exploded");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
