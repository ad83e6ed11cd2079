//! Tests for logging configuration and format parsing

use devfleet::observability::logging::{default_filter, init_logging, parse_level, LogFormat};
use devfleet::observability::{device_span, lifecycle_span};
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[test]
fn test_log_format_parse_is_case_insensitive() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("Compact"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_trims_whitespace() {
    assert_eq!(LogFormat::parse("  pretty  "), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("compact\n"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    for input in ["invalid", "", "xml", "yaml", "123"] {
        assert_eq!(LogFormat::parse(input), LogFormat::Json, "input: {input:?}");
    }
}

#[test]
fn test_level_parsing_defaults_to_info() {
    assert_eq!(parse_level("trace"), Level::TRACE);
    assert_eq!(parse_level("Error"), Level::ERROR);
    assert_eq!(parse_level("loud"), Level::INFO);
}

#[test]
fn test_default_filter_quiets_dependencies() {
    for level in [Level::ERROR, Level::INFO, Level::TRACE] {
        let filter = default_filter(level);
        assert!(filter.starts_with(&level.to_string().to_lowercase()));
        assert!(filter.contains("rumqttc=warn"));
        assert!(filter.contains("rustls=warn"));
        assert!(EnvFilter::try_new(&filter).is_ok(), "filter: {filter}");
    }
}

#[test]
fn test_init_logging_twice_does_not_panic() {
    init_logging(Level::DEBUG, LogFormat::Compact, false);
    init_logging(Level::INFO, LogFormat::Json, true);

    let span = device_span!(dev_id = "D1", session_id = "s-1");
    let _guard = span.enter();
    tracing::info!("inside device span");

    let sweep = lifecycle_span!(step = "reconnect_sweep");
    sweep.in_scope(|| tracing::debug!("inside lifecycle span"));
}
