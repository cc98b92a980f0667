//! Tracing subscriber setup.

use crate::config::{LogFormat, LoggingSection};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

/// `RUST_LOG` when set and valid, otherwise `default_level`.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber: stderr in the configured format, plus a
/// daily-rolling JSON file when `file` is set.
///
/// Keep the returned guard alive for the life of the process or buffered file
/// output is lost. Calling this twice leaves the first subscriber in place.
pub fn init(logging: &LoggingSection, file: Option<&Path>, verbose: bool) -> Option<WorkerGuard> {
    let level = if verbose { "debug" } else { logging.level.as_str() };

    let stderr = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let (file_layer, guard) = match file {
        Some(path) => {
            let dir = path.parent().unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "baton.log".into());
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(stderr)
        .with(file_layer)
        .with(env_filter(level))
        .try_init();
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        let logging = LoggingSection::default();
        assert!(init(&logging, None, false).is_none());
        assert!(init(&logging, None, true).is_none());
        tracing::info!("still logging");
    }

    #[test]
    fn test_file_output_returns_guard() {
        let dir = tempfile::tempdir().unwrap();
        let logging = LoggingSection {
            format: LogFormat::Json,
            ..LoggingSection::default()
        };
        let guard = init(&logging, Some(&dir.path().join("baton.log")), false);
        assert!(guard.is_some());
    }
}
