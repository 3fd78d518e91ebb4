use std::io;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::domain::models::LoggingConfig;

const LOG_FILE_NAME: &str = "settle.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Logger implementation using tracing
pub struct LoggerImpl {
    _guard: Option<WorkerGuard>,
}

impl LoggerImpl {
    /// Initialize the process-wide subscriber.
    ///
    /// Console output goes to stderr so that stdout stays free for reports.
    /// `verbosity` (the number of `-v` flags) raises the configured level;
    /// `RUST_LOG` overrides both.
    pub fn init(config: &LoggingConfig, verbosity: u8) -> Result<Self> {
        let level = raise_level(parse_log_level(&config.level)?, verbosity);
        let filter = || {
            EnvFilter::builder()
                .with_default_directive(LevelFilter::from_level(level).into())
                .from_env_lossy()
        };

        let mut layers: Vec<BoxedLayer> = Vec::new();

        let console: BoxedLayer = if config.format == "json" {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(io::stderr)
                .with_current_span(true)
                .with_target(true)
                .with_filter(filter())
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .with_filter(filter())
                .boxed()
        };
        layers.push(console);

        let guard = if let Some(ref log_dir) = config.log_dir {
            let file_appender = match config.rotation.as_str() {
                "hourly" => rolling::hourly(log_dir, LOG_FILE_NAME),
                "never" => rolling::never(log_dir, LOG_FILE_NAME),
                _ => rolling::daily(log_dir, LOG_FILE_NAME),
            };
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

            // Files are always JSON for structured analysis.
            layers.push(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(non_blocking_file)
                    .with_ansi(false)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_filter(filter())
                    .boxed(),
            );
            Some(guard)
        } else {
            None
        };

        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .context("Failed to install tracing subscriber")?;

        tracing::debug!(
            level = %level,
            format = %config.format,
            file_output = config.log_dir.is_some(),
            "logger initialized"
        );

        Ok(Self { _guard: guard })
    }
}

/// Parse log level string to Level
fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("Invalid log level: {level}"),
    }
}

/// One `-v` means at least debug, two or more mean trace.
fn raise_level(configured: Level, verbosity: u8) -> Level {
    match verbosity {
        0 => configured,
        1 if configured == Level::TRACE => Level::TRACE,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("debug"), Ok(Level::DEBUG)));
        assert!(matches!(parse_log_level("info"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));
        assert!(matches!(parse_log_level("error"), Ok(Level::ERROR)));
        assert!(matches!(parse_log_level("TRACE"), Ok(Level::TRACE)));
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_raise_level() {
        assert_eq!(raise_level(Level::WARN, 0), Level::WARN);
        assert_eq!(raise_level(Level::WARN, 1), Level::DEBUG);
        assert_eq!(raise_level(Level::TRACE, 1), Level::TRACE);
        assert_eq!(raise_level(Level::INFO, 3), Level::TRACE);
    }
}
