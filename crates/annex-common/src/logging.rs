//! Logging configuration and subscriber setup.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Registry,
};

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line output with colors where the terminal allows.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// Newline-delimited JSON objects.
    Json,
}

/// Subscriber settings for binaries and test harnesses.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level used when neither `filter` nor `RUST_LOG` is set.
    pub level: Level,
    /// Output format.
    pub format: LogFormat,
    /// Emit file and line of the callsite.
    pub include_location: bool,
    /// Emit enter/exit records for spans.
    pub include_span_events: bool,
    /// Write through the test writer so `cargo test` captures output.
    pub test_writer: bool,
    /// Custom filter string (e.g., "annex_events=trace,annex_dom=debug").
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            include_location: false,
            include_span_events: false,
            test_writer: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Debug level with callsite locations.
    pub fn debug() -> Self {
        Self {
            level: Level::DEBUG,
            include_location: true,
            ..Default::default()
        }
    }

    /// Everything, including span enter/exit.
    pub fn trace() -> Self {
        Self {
            level: Level::TRACE,
            include_location: true,
            include_span_events: true,
            ..Default::default()
        }
    }

    /// Info level as JSON.
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Json,
            ..Default::default()
        }
    }

    /// Compact output captured by the test harness.
    pub fn test() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Compact,
            test_writer: true,
            ..Default::default()
        }
    }

    /// Override the level with an `EnvFilter` directive string.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string());
        match self.filter {
            Some(ref custom) => EnvFilter::try_new(custom).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_span_events {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// Panics if a global subscriber is already installed; use
/// [`try_init_logging`] where that can happen (tests, embedding hosts).
pub fn init_logging(config: LogConfig) {
    if let Err(err) = try_init_logging(config) {
        panic!("failed to install tracing subscriber: {err}");
    }
}

/// Same as [`init_logging`], returning an error instead of panicking when a
/// subscriber has already been installed.
pub fn try_init_logging(config: LogConfig) -> Result<(), TryInitError> {
    let registry = Registry::default().with(config.env_filter());
    let span_events = config.span_events();

    match config.format {
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .with_target(true)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_span_events(span_events);
            if config.test_writer {
                registry.with(layer.with_test_writer()).try_init()
            } else {
                registry.with(layer).try_init()
            }
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_target(true)
                .with_span_events(span_events);
            if config.test_writer {
                registry.with(layer.with_test_writer()).try_init()
            } else {
                registry.with(layer).try_init()
            }
        }
        LogFormat::Json => {
            let layer = fmt::layer().json().with_span_events(span_events);
            registry.with(layer).try_init()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(!config.test_writer);
    }

    #[test]
    fn test_log_config_presets() {
        assert!(LogConfig::debug().include_location);
        assert!(LogConfig::trace().include_span_events);
        assert_eq!(LogConfig::production().format, LogFormat::Json);
        assert!(LogConfig::test().test_writer);
    }

    #[test]
    fn test_log_config_with_filter() {
        let config = LogConfig::default().with_filter("annex_events=trace");
        assert_eq!(config.filter.as_deref(), Some("annex_events=trace"));
    }

    #[test]
    fn test_try_init_twice_is_harmless() {
        let _ = try_init_logging(LogConfig::test());
        assert!(try_init_logging(LogConfig::test()).is_err());
    }
}
