//! Disk-usage progress sampling.
//!
//! Progress is inferred by measuring how many bytes have landed in the
//! monitored directory, not reported by the downloader itself.

use std::io;
use std::path::Path;
use std::time::Instant;

use log::debug;
use sidecar_protocol::{format_size, format_speed, DownloadEvent};
use walkdir::WalkDir;

/// Highest percentage reported before the download is confirmed complete.
pub const MAX_IN_FLIGHT_PROGRESS: u8 = 99;

/// Sum the sizes of all regular files below `path`. Symlinks are not
/// followed, so hub snapshot links don't count their blobs twice.
pub fn dir_size(path: &Path) -> io::Result<u64> {
    let mut total = 0;
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(io::Error::from)?.len();
        }
    }
    Ok(total)
}

/// One derived progress figure. Not stored beyond the next tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    /// 0..=99 while in flight.
    pub progress: u8,
    pub speed_bytes_per_sec: f64,
    pub downloaded: u64,
    /// 0 when unknown.
    pub total: u64,
}

impl ProgressSample {
    /// The single 100% sample sent once the download has succeeded.
    pub fn complete(total: u64) -> Self {
        Self {
            progress: 100,
            speed_bytes_per_sec: 0.0,
            downloaded: total,
            total,
        }
    }

    pub fn to_event(&self) -> DownloadEvent {
        DownloadEvent::Progress {
            progress: self.progress,
            speed: format_speed(self.speed_bytes_per_sec),
            downloaded: format_size(self.downloaded),
            total: if self.total > 0 || self.progress == 100 {
                format_size(self.total)
            } else {
                "Unknown".to_string()
            },
        }
    }
}

/// Turns successive byte measurements into [`ProgressSample`]s.
///
/// Keeps only the previous measurement. Reported progress never goes
/// backwards, even if partial files vanish between ticks.
#[derive(Debug)]
pub struct ProgressSampler {
    total: u64,
    last_bytes: u64,
    last_instant: Instant,
    last_progress: u8,
}

impl ProgressSampler {
    pub fn new(total: u64, started: Instant) -> Self {
        Self {
            total,
            last_bytes: 0,
            last_instant: started,
            last_progress: 0,
        }
    }

    /// Derive a sample from a fresh measurement. A failed measurement
    /// reuses the previous byte count.
    pub fn tick(&mut self, measured: io::Result<u64>, now: Instant) -> ProgressSample {
        let current = match measured {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("[DOWNLOAD] size measurement failed, reusing last value: {e}");
                self.last_bytes
            }
        };

        let elapsed = now.saturating_duration_since(self.last_instant).as_secs_f64();
        let speed = if elapsed > 0.0 {
            current.saturating_sub(self.last_bytes) as f64 / elapsed
        } else {
            0.0
        };

        let progress = if self.total > 0 {
            let percent = (current as f64 / self.total as f64 * 100.0).round();
            percent.clamp(0.0, f64::from(MAX_IN_FLIGHT_PROGRESS)) as u8
        } else {
            0
        };
        let progress = progress.max(self.last_progress);

        self.last_bytes = current;
        self.last_instant = now;
        self.last_progress = progress;

        ProgressSample {
            progress,
            speed_bytes_per_sec: speed,
            downloaded: current,
            total: self.total,
        }
    }
}
