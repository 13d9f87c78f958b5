//! Logging setup.
//!
//! stdout belongs to the protocol, so the console appender writes to stderr.
//! An optional timestamped log file is added when `log_dir` is configured.

use std::str::FromStr;

use chrono::Local;
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::config::WorkerConfig;

const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} - {l} - {m}{n}";

pub fn parse_level(level: &str) -> LevelFilter {
    LevelFilter::from_str(level.trim()).unwrap_or(LevelFilter::Info)
}

/// Path of the log file for a session started now.
pub fn log_file_path(log_dir: &str) -> String {
    let timestamp = Local::now().format("%Y-%m-%d-%H_%M").to_string();
    format!("{log_dir}/{timestamp}.log")
}

fn build_config(config: &WorkerConfig) -> Result<Config, Box<dyn std::error::Error>> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();

    let mut builder =
        Config::builder().appender(Appender::builder().build("stderr", Box::new(stderr)));
    let mut root = Root::builder().appender("stderr");

    if let Some(ref log_dir) = config.log_dir {
        std::fs::create_dir_all(log_dir)?;
        let file_appender = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
            .build(log_file_path(log_dir))?;
        builder = builder.appender(Appender::builder().build("file", Box::new(file_appender)));
        root = root.appender("file");
    }

    Ok(builder.build(root.build(parse_level(&config.log_level)))?)
}

pub fn setup_logging(config: &WorkerConfig) -> Result<(), Box<dyn std::error::Error>> {
    log4rs::init_config(build_config(config)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level(" WARN "), LevelFilter::Warn);
        assert_eq!(parse_level("nonsense"), LevelFilter::Info);
    }

    #[test]
    fn test_log_file_path_shape() {
        let path = log_file_path("logs");
        assert!(path.starts_with("logs/"));
        assert!(path.ends_with(".log"));
    }

    #[test]
    fn test_build_config_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkerConfig {
            log_dir: Some(dir.path().join("nested").to_string_lossy().to_string()),
            ..WorkerConfig::default()
        };
        assert!(build_config(&config).is_ok());
        assert!(dir.path().join("nested").is_dir());
    }
}
