//! Configuration loading and validation tests
//!
//! Tests focus on observable behavior: what a file plus command-line
//! overrides turns into, and which mistakes are rejected before startup.


use msg2handler::config::{ConfigError, ConfigOverrides, DaemonConfig};
use msg2handler::handlers::BuiltinHandlers;
use msg2handler::routing::HandlerRegistry;
use msg2handler::transport::EndpointResolver;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use test_helpers::write_config;

#[test]
fn test_config_loads_handlers_in_file_order() {
    let file = write_config(
        r#"
[broker]
uri = "mqtt://broker.example.org:1883"

[[handlers]]
topic = "grid.probe.metricOutput.EGEE.*"
handler = "log"

[[handlers]]
topic = "grid.probe.metricOutput.EGEE.ops"
handler = "log"
params = { label = "ops" }
"#,
    );

    let config = DaemonConfig::load(Some(file.path())).unwrap();

    let topics: Vec<&str> = config.handlers.iter().map(|h| h.topic.as_str()).collect();
    assert_eq!(
        topics,
        vec!["grid.probe.metricOutput.EGEE.*", "grid.probe.metricOutput.EGEE.ops"]
    );
    assert!(config.validate().is_ok());
}

#[test]
fn test_missing_file_is_an_error() {
    let result = DaemonConfig::load(Some(Path::new("/nonexistent/msg-to-handler.toml")));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_an_error() {
    let file = write_config("[broker\nuri = ");
    assert!(matches!(
        DaemonConfig::load(Some(file.path())),
        Err(ConfigError::TomlParse(_))
    ));
}

#[test]
fn test_validation_requires_a_broker() {
    let file = write_config(
        r#"
[[handlers]]
topic = "a.b"
handler = "log"
"#,
    );
    let config = DaemonConfig::load(Some(file.path())).unwrap();
    assert!(matches!(config.validate(), Err(ConfigError::NoBrokerEndpoint)));
}

#[test]
fn test_command_line_adds_default_queue_handler_last() {
    let dir = TempDir::new().unwrap();
    let file = write_config(
        r#"
[broker]
uri = "mqtt://from-file:1883"

[[handlers]]
topic = "a.b"
handler = "log"
"#,
    );

    let mut config = DaemonConfig::load(Some(file.path())).unwrap();
    config
        .apply_overrides(&ConfigOverrides {
            destination: Some("grid.probe.metricOutput.EGEE.*".to_string()),
            dirq: Some(dir.path().join("queue")),
            broker_uri: Some("mqtts://from-cli".to_string()),
            verbose: true,
            ..Default::default()
        })
        .unwrap();

    assert!(config.verbose);
    assert_eq!(config.broker.uri.as_deref(), Some("mqtts://from-cli"));
    assert_eq!(config.handlers.len(), 2);
    assert_eq!(config.handlers[1].handler, "dirq");
    assert_eq!(config.handlers[1].topic, "grid.probe.metricOutput.EGEE.*");

    let (registry, failures) = HandlerRegistry::load(&config.handlers, &BuiltinHandlers);
    assert!(failures.is_empty(), "{failures:?}");
    assert_eq!(registry.len(), 2);
    assert!(dir.path().join("queue").is_dir());
}

#[test]
fn test_destination_without_queue_is_rejected() {
    let mut config = DaemonConfig::default();
    let result = config.apply_overrides(&ConfigOverrides {
        destination: Some("a.b".to_string()),
        ..Default::default()
    });
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_broker_cache_supplies_candidates() {
    let dir = TempDir::new().unwrap();
    let cache = dir.path().join("brokers");
    fs::write(
        &cache,
        "mqtt://one.example.org:1883\n\nnot a uri\nmqtts://two.example.org\n",
    )
    .unwrap();

    let mut config = DaemonConfig::default();
    config
        .apply_overrides(&ConfigOverrides {
            broker_cache: Some(cache),
            ..Default::default()
        })
        .unwrap();
    assert!(config.validate().is_ok());

    let mut resolver = EndpointResolver::from_config(&config.broker).unwrap();
    assert_eq!(resolver.candidates().len(), 2);
    assert_eq!(resolver.next_endpoint().host(), "one.example.org");
    let second = resolver.next_endpoint();
    assert_eq!(second.host(), "two.example.org");
    assert_eq!(second.port(), 8883);
    assert_eq!(resolver.next_endpoint().host(), "one.example.org");
}

#[test]
fn test_invalid_entries_fail_individually() {
    let file = write_config(
        r#"
[broker]
uri = "mqtt://localhost"

[[handlers]]
topic = "a.b"
handler = "log"

[[handlers]]
topic = "a.c"
handler = "carrier-pigeon"

[[handlers]]
topic = ""
handler = "log"

[[handlers]]
topic = "a.d"
handler = "passive"
"#,
    );
    let config = DaemonConfig::load(Some(file.path())).unwrap();

    let (registry, failures) = HandlerRegistry::load(&config.handlers, &BuiltinHandlers);
    assert_eq!(registry.len(), 1);
    assert_eq!(failures.len(), 3);
    assert_eq!(registry.topics(), vec!["a.b".to_string()]);
}
