// Human-readable sizes and rates for progress lines.

const KB: f64 = 1024.0;
const MB: f64 = 1024.0 * 1024.0;
const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Format a byte count: `B` and `KB` as integers, `MB` and `GB` with one decimal.
pub fn format_size(bytes: u64) -> String {
    let value = bytes as f64;
    if value >= GB {
        format!("{:.1} GB", value / GB)
    } else if value >= MB {
        format!("{:.1} MB", value / MB)
    } else if value >= KB {
        format!("{:.0} KB", value / KB)
    } else {
        format!("{bytes} B")
    }
}

/// Format a transfer rate. There is no GB/s tier.
pub fn format_speed(bytes_per_sec: f64) -> String {
    let value = bytes_per_sec.max(0.0);
    if value >= MB {
        format!("{:.1} MB/s", value / MB)
    } else if value >= KB {
        format!("{:.0} KB/s", value / KB)
    } else {
        format!("{value:.0} B/s")
    }
}
