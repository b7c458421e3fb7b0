//! Tracing setup for binaries, benches and tests.
//!
//! The crate itself only emits `tracing` events (stage lifecycle at debug,
//! fail-softs at warn); this module is the convenience layer for turning
//! them on without every consumer hand-rolling a subscriber.

use once_cell::sync::OnceCell;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Output format of the bundled subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, multi-line.
    Pretty,
    /// Single-line.
    Compact,
    /// Structured JSON.
    Json,
}

/// Subscriber configuration, builder style.
#[derive(Debug, Clone)]
pub struct LogConfig {
    level: Level,
    format: LogFormat,
    filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: Level::INFO,
            format: LogFormat::Compact,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Extra env-filter directives, e.g. `"pipeflow=trace"`.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Install the global subscriber once; later calls are no-ops, so every
/// test can ask for logging without fighting over the registry. Loses to a
/// subscriber someone else installed first.
pub fn init_logging(config: LogConfig) {
    INSTALLED.get_or_init(|| {
        let mut filter = EnvFilter::from_default_env().add_directive(config.level.into());
        if let Some(directives) = &config.filter {
            for directive in directives.split(',') {
                match directive.parse() {
                    Ok(directive) => filter = filter.add_directive(directive),
                    Err(_) => eprintln!("ignoring malformed log directive: {directive}"),
                }
            }
        }

        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        let _ = match config.format {
            LogFormat::Pretty => builder.pretty().try_init(),
            LogFormat::Compact => builder.compact().try_init(),
            LogFormat::Json => builder.json().try_init(),
        };
    });
}

/// Debug-level logging for tests and local runs.
pub fn init_test_logging() {
    init_logging(
        LogConfig::new()
            .with_level(Level::DEBUG)
            .with_filter("pipeflow=debug"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder_accumulates() {
        let config = LogConfig::new()
            .with_level(Level::TRACE)
            .with_format(LogFormat::Json)
            .with_filter("pipeflow=trace");

        assert_eq!(config.level, Level::TRACE);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.filter.as_deref(), Some("pipeflow=trace"));
    }

    #[test]
    fn init_is_idempotent() {
        init_test_logging();
        init_test_logging();
    }
}
