//! Tracing subscriber setup.
//!
//! stderr always receives events, filtered by `RUST_LOG` (default `warn`, so
//! the operator only sees log lines when something goes wrong). Setting
//! `BLT_LOG=1` adds a plain-text file at `<home>/logs/blt.log` and lowers the
//! default filter to `info`.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const FILE_LOG_VAR: &str = "BLT_LOG";
const FILE_NAME: &str = "blt.log";

/// Keeps the file writer alive; buffered lines are flushed when dropped.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber. Call once from `main` and hold the guard
/// until exit.
pub fn init(log_dir: &Path) -> LogGuard {
    let to_file = file_logging_requested(std::env::var(FILE_LOG_VAR).ok().as_deref());

    let (file_layer, file_guard) = if to_file {
        let _ = std::fs::create_dir_all(log_dir);
        let appender = tracing_appender::rolling::never(log_dir, FILE_NAME);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(to_file)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .init();

    LogGuard {
        _file_guard: file_guard,
    }
}

fn file_logging_requested(value: Option<&str>) -> bool {
    value.map(str::trim) == Some("1")
}

fn default_directive(to_file: bool) -> &'static str {
    if to_file { "info" } else { "warn" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_enables_file_logging() {
        assert!(file_logging_requested(Some("1")));
        assert!(file_logging_requested(Some(" 1\n")));
        assert!(!file_logging_requested(Some("0")));
        assert!(!file_logging_requested(Some("true")));
        assert!(!file_logging_requested(None));
    }

    #[test]
    fn file_logging_lowers_default_level() {
        assert_eq!(default_directive(true), "info");
        assert_eq!(default_directive(false), "warn");
    }
}
