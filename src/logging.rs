//! Structured logging for the Grove
//!
//! `tracing` + `tracing-subscriber` with JSON or pretty output, matching the
//! rest of the ambient stack. Mutating entry points and proof queries open
//! their own spans carrying `species`/`index`/`root` fields; this module is
//! only responsible for installing the global subscriber.

use std::sync::Once;

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::LogFormat;

/// Minimum log level to emit, ordered least to most severe so a configured
/// threshold can be compared directly against an event's level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

/// Recognized spellings, falling back to `Info` for anything unmatched.
const LEVEL_NAMES: &[(&str, LogLevel)] = &[
    ("trace", LogLevel::Trace),
    ("debug", LogLevel::Debug),
    ("info", LogLevel::Info),
    ("warn", LogLevel::Warn),
    ("warning", LogLevel::Warn),
    ("error", LogLevel::Error),
];

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        let lower = s.to_lowercase();
        LEVEL_NAMES
            .iter()
            .find(|(name, _)| *name == lower)
            .map(|(_, level)| *level)
            .unwrap_or_default()
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}

static INIT: Once = Once::new();

/// Install the global tracing subscriber. Idempotent: a second call is a
/// no-op rather than a panic, since the test suite initializes logging
/// repeatedly across independent test binaries.
pub fn init(level: LogLevel, format: LogFormat) -> Result<(), LoggingError> {
    let mut result = Ok(());
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("grove={}", level)));

        let outcome = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true)
                        .with_span_events(FmtSpan::CLOSE),
                )
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .pretty()
                        .with_target(true)
                        .with_file(true)
                        .with_line_number(true)
                        .with_span_events(FmtSpan::CLOSE),
                )
                .try_init(),
        };

        result = outcome.map_err(|e| LoggingError::InitFailed(e.to_string()));
    });

    result
}

/// Install the global subscriber from a [`crate::config::GroveRuntimeConfig`].
pub fn init_from_config(
    runtime: &crate::config::GroveRuntimeConfig,
) -> Result<(), LoggingError> {
    init(runtime.log_level, runtime.log_format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_parsing() {
        assert_eq!(LogLevel::from("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::from("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from("unknown"), LogLevel::Info);
    }

    #[test]
    fn init_is_idempotent() {
        assert!(init(LogLevel::Info, LogFormat::Pretty).is_ok());
        assert!(init(LogLevel::Debug, LogFormat::Json).is_ok());
    }
}
