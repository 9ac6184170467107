//! Structured logging using the tracing crate
//!
//! ## Log Format Options
//!
//! Selected with the `LOG_FORMAT` environment variable:
//!
//! - `json` - one JSON object per line, for log collectors
//! - `pretty` - multi-line, coloured, for development
//! - `compact` - single-line, coloured, for terminals
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO, DEBUG, TRACE - defaults to INFO (DEBUG with `--verbose`)
//! - `LOG_FORMAT`: json, pretty, compact - defaults to json
//! - `LOG_SPANS`: include span open/close events - defaults to false
//! - `RUST_LOG`: overrides filtering entirely
//!
//! Classifiable daemon events carry an `event` field (`connect`,
//! `subscribe_failed`, `handler_failed`, ...) so they can be filtered without
//! matching on message text.

use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    /// Parse log format from string, defaulting to JSON
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Parse a level name (pure function)
pub fn parse_level(s: &str) -> Option<Level> {
    match s.trim().to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}

/// Level used when `LOG_LEVEL` is absent or unparseable (pure function)
pub fn effective_level(configured: Option<&str>, verbose: bool) -> Level {
    match configured.and_then(parse_level) {
        Some(level) => level,
        None if verbose => Level::DEBUG,
        None => Level::INFO,
    }
}

/// Filter for the daemon level with noisy dependencies held at WARN
fn build_filter(level: Level) -> EnvFilter {
    if let Ok(rust_log) = env::var("RUST_LOG") {
        return EnvFilter::new(rust_log);
    }

    ["rumqttc=warn", "tokio=warn"]
        .iter()
        .filter_map(|directive| directive.parse().ok())
        .fold(EnvFilter::new(level.to_string()), |filter, directive| {
            filter.add_directive(directive)
        })
}

/// Initialize logging with manual configuration
///
/// Does nothing if a global subscriber is already installed.
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let span_events = if include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let subscriber = tracing_subscriber::registry().with(build_filter(level));

    let _ = match format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_span_events(span_events))
            .try_init(),
        LogFormat::Pretty => subscriber
            .with(fmt::layer().pretty().with_ansi(true).with_span_events(span_events))
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
                    .with_span_events(span_events),
            )
            .try_init(),
    };
}

/// Initialize logging from environment variables
pub fn init_default_logging(verbose: bool) {
    let level = effective_level(env::var("LOG_LEVEL").ok().as_deref(), verbose);
    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_default());
    let include_spans = env::var("LOG_SPANS")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    init_logging(level, format, include_spans);
}

/// Span covering one broker session
#[macro_export]
macro_rules! session_span {
    ($($field:tt)*) => {
        tracing::info_span!("broker_session", $($field)*)
    };
}

/// Span covering the dispatch of one frame
#[macro_export]
macro_rules! frame_span {
    ($($field:tt)*) => {
        tracing::debug_span!("frame_dispatch", $($field)*)
    };
}

pub use {frame_span, session_span};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("Pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("xml"), LogFormat::Json);
        assert_eq!(LogFormat::parse(""), LogFormat::Json);
    }

    #[test]
    fn test_effective_level() {
        assert_eq!(effective_level(None, false), Level::INFO);
        assert_eq!(effective_level(None, true), Level::DEBUG);
        assert_eq!(effective_level(Some("warn"), true), Level::WARN);
        assert_eq!(effective_level(Some("bogus"), false), Level::INFO);
        assert_eq!(effective_level(Some(" trace "), false), Level::TRACE);
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        init_logging(Level::INFO, LogFormat::Compact, false);
        init_logging(Level::DEBUG, LogFormat::Json, true);
    }
}
