//! Tests for logging configuration and level selection
//!
//! Only the pure functions are exercised; installing a global subscriber is
//! left to the binary.

use msg2handler::observability::logging::{effective_level, parse_level, LogFormat};
use tracing::Level;

#[test]
fn test_log_format_parse_is_case_insensitive() {
    assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("Compact"), LogFormat::Compact);
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    // Collectors expect JSON when nothing sensible was asked for
    for input in ["", "xml", "syslog", "123"] {
        assert_eq!(LogFormat::parse(input), LogFormat::Json, "input {input:?}");
    }
}

#[test]
fn test_parse_level_accepts_names_only() {
    assert_eq!(parse_level("error"), Some(Level::ERROR));
    assert_eq!(parse_level(" WARN "), Some(Level::WARN));
    assert_eq!(parse_level("trace"), Some(Level::TRACE));
    assert_eq!(parse_level("3"), None);
    assert_eq!(parse_level("verbose"), None);
}

#[test]
fn test_verbose_raises_default_level() {
    assert_eq!(effective_level(None, false), Level::INFO);
    assert_eq!(effective_level(None, true), Level::DEBUG);
    assert_eq!(effective_level(Some("bogus"), true), Level::DEBUG);
}

#[test]
fn test_explicit_level_wins_over_verbose() {
    assert_eq!(effective_level(Some("WARN"), true), Level::WARN);
    assert_eq!(effective_level(Some("trace"), false), Level::TRACE);
}
