//! log4rs setup for the sidecar binaries.
//!
//! stdout carries the protocol, so console logging always targets stderr
//! (inherited by the host process).

use std::path::PathBuf;

use chrono::Local;
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::config::LogArgs;

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} - {l} - {m}{n}";

/// Parse a level name, falling back to `Info` for anything unrecognised.
pub fn parse_level(name: &str) -> LevelFilter {
    name.trim().parse().unwrap_or(LevelFilter::Info)
}

/// Resolve where the file appender (if any) should write.
/// `--log-dir` gets a per-run file named `<role>-<timestamp>.log`.
pub fn log_file_path(role: &str, args: &LogArgs) -> Option<PathBuf> {
    if let Some(path) = &args.log_file {
        return Some(path.clone());
    }
    args.log_dir.as_ref().map(|dir| {
        let timestamp = Local::now().format("%Y-%m-%d-%H_%M").to_string();
        dir.join(format!("{role}-{timestamp}.log"))
    })
}

fn build_config(role: &str, args: &LogArgs) -> Result<Config, Box<dyn std::error::Error>> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();

    let mut builder = Config::builder().appender(Appender::builder().build("stderr", Box::new(stderr)));
    let mut root = Root::builder().appender("stderr");

    if let Some(path) = log_file_path(role, args) {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file_appender = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(PATTERN)))
            .build(&path)?;
        builder = builder.appender(Appender::builder().build("file", Box::new(file_appender)));
        root = root.appender("file");
    }

    Ok(builder.build(root.build(parse_level(&args.log_level)))?)
}

/// Install the global logger. Call once, early in `main`.
pub fn init(role: &str, args: &LogArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(role, args)?;
    log4rs::init_config(config)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level(" WARN "), LevelFilter::Warn);
        assert_eq!(parse_level("off"), LevelFilter::Off);
        assert_eq!(parse_level("chatty"), LevelFilter::Info);
    }

    #[test]
    fn test_log_dir_gets_timestamped_file() {
        let args = LogArgs {
            log_dir: Some(PathBuf::from("logs")),
            ..LogArgs::default()
        };
        let path = log_file_path("download", &args).unwrap();
        assert!(path.starts_with("logs"));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("download-"), "{name}");
        assert!(name.ends_with(".log"), "{name}");
    }

    #[test]
    fn test_no_file_by_default() {
        assert!(log_file_path("session", &LogArgs::default()).is_none());
    }

    #[test]
    fn test_config_with_file_appender_builds() {
        let dir = tempfile::tempdir().unwrap();
        let args = LogArgs {
            log_level: "debug".to_string(),
            log_file: Some(dir.path().join("nested").join("session.log")),
            log_dir: None,
        };
        build_config("session", &args).unwrap();
        assert!(dir.path().join("nested").exists());
    }
}
