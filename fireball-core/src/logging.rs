//! Logging for the fireball binaries
//!
//! Each binary writes its own daily-rolled file under the XDG state
//! directory (`~/.local/state/fireball/fireball-load.log.YYYY-MM-DD`), so a
//! long cleaning run and a concurrent `fireball-check` never interleave.
//! Stdout stays reserved for the run summaries the binaries print.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Start file logging for one binary.
///
/// `RUST_LOG` wins over `[logging] level`. A level string that does not parse
/// is a configuration error rather than a silently empty filter.
pub fn init(config: &LoggingConfig, binary: &str) -> Result<LoggingGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            Error::Config(format!("invalid [logging] level {:?}: {e}", config.level))
        })?,
    };

    let log_dir = Config::log_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(log_file_prefix(binary))
        .max_log_files(config.max_files.max(1))
        .build(&log_dir)
        .map_err(|e| Error::Config(format!("failed to create log appender: {e}")))?;
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!(
        binary,
        pid = std::process::id(),
        log_file = %log_file_path(binary).display(),
        level = %config.level,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Test logging to the captured test writer, filtered by `RUST_LOG`.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Flushes pending log lines when dropped; hold it for the life of `main`.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// File name prefix for a binary's log; the appender appends the date.
pub fn log_file_prefix(binary: &str) -> String {
    format!("{binary}.log")
}

/// Undated path of a binary's log file.
pub fn log_file_path(binary: &str) -> PathBuf {
    Config::log_dir().join(log_file_prefix(binary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_is_per_binary() {
        let load = log_file_path("fireball-load");
        let check = log_file_path("fireball-check");
        assert!(load.ends_with("fireball-load.log"));
        assert_ne!(load, check);
        assert_eq!(load.parent(), check.parent());
    }

    #[test]
    fn test_bad_level_is_config_error() {
        let config = LoggingConfig {
            level: "fireball=loud".to_string(),
            ..Default::default()
        };
        std::env::remove_var("RUST_LOG");
        match init(&config, "fireball-test") {
            Err(Error::Config(message)) => assert!(message.contains("fireball=loud")),
            Err(other) => panic!("expected config error, got {other}"),
            Ok(_) => panic!("invalid level should be rejected"),
        }
    }
}
