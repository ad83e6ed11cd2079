//! Fleet file loading and validation tests

use devfleet::config::{
    ConfigError, ConnectionMethod, DeviceDescriptor, FleetConfig, MethodSelector,
};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

fn load(content: &str) -> Result<FleetConfig, ConfigError> {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    FleetConfig::load_from_file(temp_file.path())
}

#[test]
fn test_fleet_file_loads_devices_in_order() {
    let config = load(
        r#"
[manager]
connect_attempts = 5
sweep_interval_ms = 8000

[[device]]
dev_id = "D1"
dev_type = "sensor"
endpoint = "broker.local"
connection_method = "BASIC_WITH_USER_CREDENTIAL"
username = "user"
password = "secret"
subscribe_topic = "fleet/d1/in"
status = true

[[device]]
dev_id = "D2"
endpoint = "broker.local"
port = 8883
connection_method = 4
cert_dir = "/etc/devfleet/certs"
ca_cert = "ca.pem"
client_cert = "d2.pem"
client_key = "d2.key"
"#,
    )
    .unwrap();

    assert_eq!(config.manager.connect_attempts, 5);
    assert_eq!(config.manager.sweep_interval().as_millis(), 8000);
    assert_eq!(config.devices.len(), 2);

    let d1 = &config.devices[0];
    assert_eq!(d1.dev_id, "D1");
    assert_eq!(d1.port, 1883);
    assert!(d1.status);
    assert_eq!(
        d1.connection_method.method(),
        Some(ConnectionMethod::BasicWithUserCredential)
    );
    assert_eq!(d1.publish_topic, None);

    let d2 = &config.devices[1];
    assert!(!d2.status);
    assert_eq!(d2.connection_method, MethodSelector::Code(4));
    assert_eq!(d2.connection_method.method(), Some(ConnectionMethod::Mtls));
    assert_eq!(
        d2.client_key_path().unwrap(),
        Path::new("/etc/devfleet/certs").join("d2.key")
    );
}

#[test]
fn test_manager_defaults_apply_when_section_is_absent() {
    let config = load(
        r#"
[[device]]
dev_id = "D1"
endpoint = "localhost"
connection_method = "BASIC"
"#,
    )
    .unwrap();

    assert_eq!(config.manager.connect_attempts, 3);
    assert_eq!(config.manager.retry_backoff().as_secs(), 3);
    assert_eq!(config.manager.queue_poll().as_secs(), 1);
    assert_eq!(config.manager.idle_poll().as_secs(), 2);
    assert_eq!(config.manager.sweep_interval().as_secs(), 5);
    assert_eq!(config.manager.keep_alive().as_secs(), 60);
}

#[test]
fn test_unknown_method_still_loads() {
    let config = load(
        r#"
[[device]]
dev_id = "D1"
endpoint = "localhost"
connection_method = "CARRIER_PIGEON"
"#,
    )
    .unwrap();

    assert_eq!(config.devices[0].connection_method.method(), None);
    assert_eq!(
        config.devices[0].connection_method.to_string(),
        "CARRIER_PIGEON"
    );
}

#[test]
fn test_duplicate_dev_id_is_rejected() {
    let result = load(
        r#"
[[device]]
dev_id = "D1"
endpoint = "a"
connection_method = "BASIC"

[[device]]
dev_id = "D1"
endpoint = "b"
connection_method = "BASIC"
"#,
    );

    match result {
        Err(ConfigError::InvalidConfig(message)) => assert!(message.contains("D1")),
        other => panic!("Expected InvalidConfig, got {other:?}"),
    }
}

#[test]
fn test_empty_dev_id_is_rejected() {
    let result = load(
        r#"
[[device]]
dev_id = "  "
endpoint = "localhost"
connection_method = "BASIC"
"#,
    );

    assert!(matches!(result, Err(ConfigError::InvalidDeviceId(_))));
}

#[test]
fn test_zero_connect_attempts_is_rejected() {
    let result = load(
        r#"
[manager]
connect_attempts = 0
"#,
    );

    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let result = load("[[device]\ndev_id = ");
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_file_is_a_read_error() {
    let result = FleetConfig::load_from_file(Path::new("/nonexistent/devfleet.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_descriptor_json_parsing() {
    let descriptor = DeviceDescriptor::from_json(
        r#"{"dev_id": "D9", "endpoint": "localhost", "connection_method": 6, "access_token": "t"}"#,
    )
    .unwrap();
    assert_eq!(descriptor.connection_method.method(), Some(ConnectionMethod::Thingsboard));
    assert_eq!(descriptor.client_id(), "D9");

    assert!(matches!(
        DeviceDescriptor::from_json(r#"{"dev_id": "", "endpoint": "x", "connection_method": 0}"#),
        Err(ConfigError::InvalidDeviceId(_))
    ));
    assert!(matches!(
        DeviceDescriptor::from_json("not json"),
        Err(ConfigError::JsonParse(_))
    ));
}

#[test]
fn test_config_round_trips_through_pretty_toml() {
    let config = load(
        r#"
[[device]]
dev_id = "D1"
endpoint = "localhost"
connection_method = "BASIC"
status = true
"#,
    )
    .unwrap();

    let rendered = toml::to_string_pretty(&config).unwrap();
    assert_eq!(FleetConfig::from_toml_str(&rendered).unwrap(), config);
}
