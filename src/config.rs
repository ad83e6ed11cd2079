//! Fleet configuration: manager timings and device descriptors
//!
//! The fleet file is TOML with a `[manager]` section and any number of
//! `[[device]]` tables. Single descriptors can also be parsed from JSON, which
//! is how devices are added to a running manager.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Top-level fleet configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FleetConfig {
    #[serde(default)]
    pub manager: ManagerSection,
    /// Every known device, enabled or not, in file order
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceDescriptor>,
}

/// Timing and retry knobs for the connection-lifecycle manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagerSection {
    /// Connection attempts per queued session before giving up (default: 3)
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Fixed pause between attempts on the same session
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Bounded wait on the connect queue so shutdown is noticed promptly
    #[serde(default = "default_queue_poll_ms")]
    pub queue_poll_ms: u64,
    /// Reconnect loop poll interval while nothing is disconnected
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    /// Pause after each reconnect sweep
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// MQTT keepalive in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// How long one attempt waits for the broker's ConnAck
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_connect_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    3000
}

fn default_queue_poll_ms() -> u64 {
    1000
}

fn default_idle_poll_ms() -> u64 {
    2000
}

fn default_sweep_interval_ms() -> u64 {
    5000
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            connect_attempts: default_connect_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            queue_poll_ms: default_queue_poll_ms(),
            idle_poll_ms: default_idle_poll_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ManagerSection {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn queue_poll(&self) -> Duration {
        Duration::from_millis(self.queue_poll_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "manager.connect_attempts must be at least 1".to_string(),
            ));
        }
        if self.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "manager.keep_alive_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Authentication and TLS scheme for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionMethod {
    Basic,
    BasicWithUserCredential,
    BasicTls,
    BasicTlsWithUserCredential,
    Mtls,
    MtlsWithUserCredential,
    Thingsboard,
}

impl ConnectionMethod {
    pub const ALL: [ConnectionMethod; 7] = [
        ConnectionMethod::Basic,
        ConnectionMethod::BasicWithUserCredential,
        ConnectionMethod::BasicTls,
        ConnectionMethod::BasicTlsWithUserCredential,
        ConnectionMethod::Mtls,
        ConnectionMethod::MtlsWithUserCredential,
        ConnectionMethod::Thingsboard,
    ];

    /// Numeric code used by fleet files that select methods by number
    pub fn code(self) -> i64 {
        match self {
            ConnectionMethod::Basic => 0,
            ConnectionMethod::BasicWithUserCredential => 1,
            ConnectionMethod::BasicTls => 2,
            ConnectionMethod::BasicTlsWithUserCredential => 3,
            ConnectionMethod::Mtls => 4,
            ConnectionMethod::MtlsWithUserCredential => 5,
            ConnectionMethod::Thingsboard => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ConnectionMethod::Basic => "BASIC",
            ConnectionMethod::BasicWithUserCredential => "BASIC_WITH_USER_CREDENTIAL",
            ConnectionMethod::BasicTls => "BASIC_TLS",
            ConnectionMethod::BasicTlsWithUserCredential => "BASIC_TLS_WITH_USER_CREDENTIAL",
            ConnectionMethod::Mtls => "MTLS",
            ConnectionMethod::MtlsWithUserCredential => "MTLS_WITH_USER_CREDENTIAL",
            ConnectionMethod::Thingsboard => "THINGSBOARD",
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.code() == code)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for ConnectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Connection method exactly as written in configuration
///
/// Kept raw so that a device with an unrecognized method still loads; the
/// resolver is the one that rejects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MethodSelector {
    Code(i64),
    Name(String),
}

impl MethodSelector {
    pub fn method(&self) -> Option<ConnectionMethod> {
        match self {
            MethodSelector::Code(code) => ConnectionMethod::from_code(*code),
            MethodSelector::Name(name) => ConnectionMethod::from_name(name),
        }
    }
}

impl From<ConnectionMethod> for MethodSelector {
    fn from(method: ConnectionMethod) -> Self {
        MethodSelector::Name(method.name().to_string())
    }
}

impl fmt::Display for MethodSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodSelector::Code(code) => write!(f, "{code}"),
            MethodSelector::Name(name) => f.write_str(name),
        }
    }
}

/// Configuration for one remote endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceDescriptor {
    /// Unique device identity
    pub dev_id: String,
    /// Free-form tag used in logs
    #[serde(default)]
    pub dev_type: String,
    #[serde(default)]
    pub is_server: bool,
    /// MQTT client identifier, `dev_id` when absent
    #[serde(default)]
    pub client_id: Option<String>,
    pub endpoint: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub connection_method: MethodSelector,
    #[serde(default)]
    pub subscribe_topic: Option<String>,
    #[serde(default)]
    pub publish_topic: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    /// Directory prefix joined with each certificate filename
    #[serde(default)]
    pub cert_dir: Option<String>,
    #[serde(default)]
    pub client_cert: Option<String>,
    #[serde(default)]
    pub client_key: Option<String>,
    #[serde(default)]
    pub ca_cert: Option<String>,
    /// Whether the administrator wants this device connected
    #[serde(default)]
    pub status: bool,
}

fn default_port() -> u16 {
    1883
}

impl DeviceDescriptor {
    /// Minimal disabled descriptor; chain the `with_*` helpers to fill it in
    pub fn new(
        dev_id: impl Into<String>,
        endpoint: impl Into<String>,
        port: u16,
        method: ConnectionMethod,
    ) -> Self {
        Self {
            dev_id: dev_id.into(),
            dev_type: String::new(),
            is_server: false,
            client_id: None,
            endpoint: endpoint.into(),
            port,
            connection_method: method.into(),
            subscribe_topic: None,
            publish_topic: None,
            username: None,
            password: None,
            access_token: None,
            cert_dir: None,
            client_cert: None,
            client_key: None,
            ca_cert: None,
            status: false,
        }
    }

    pub fn enabled(mut self, status: bool) -> Self {
        self.status = status;
        self
    }

    pub fn with_type(mut self, dev_type: impl Into<String>) -> Self {
        self.dev_type = dev_type.into();
        self
    }

    pub fn with_topics(
        mut self,
        subscribe_topic: Option<&str>,
        publish_topic: Option<&str>,
    ) -> Self {
        self.subscribe_topic = subscribe_topic.map(str::to_string);
        self.publish_topic = publish_topic.map(str::to_string);
        self
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    pub fn with_access_token(mut self, token: &str) -> Self {
        self.access_token = Some(token.to_string());
        self
    }

    pub fn with_certificates(
        mut self,
        cert_dir: Option<&str>,
        ca_cert: Option<&str>,
        client_cert: Option<&str>,
        client_key: Option<&str>,
    ) -> Self {
        self.cert_dir = cert_dir.map(str::to_string);
        self.ca_cert = ca_cert.map(str::to_string);
        self.client_cert = client_cert.map(str::to_string);
        self.client_key = client_key.map(str::to_string);
        self
    }

    /// Parse a single descriptor from JSON (the add-device path)
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let descriptor: DeviceDescriptor = serde_json::from_str(json)?;
        validate_dev_id(&descriptor.dev_id)?;
        Ok(descriptor)
    }

    pub fn client_id(&self) -> &str {
        match self.client_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => &self.dev_id,
        }
    }

    pub fn ca_cert_path(&self) -> Option<PathBuf> {
        self.cert_path(self.ca_cert.as_deref())
    }

    pub fn client_cert_path(&self) -> Option<PathBuf> {
        self.cert_path(self.client_cert.as_deref())
    }

    pub fn client_key_path(&self) -> Option<PathBuf> {
        self.cert_path(self.client_key.as_deref())
    }

    fn cert_path(&self, file: Option<&str>) -> Option<PathBuf> {
        let file = file.filter(|f| !f.is_empty())?;
        match self.cert_dir.as_deref().filter(|d| !d.is_empty()) {
            Some(dir) => Some(Path::new(dir).join(file)),
            None => Some(PathBuf::from(file)),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to parse device JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("Invalid device ID: {0}")]
    InvalidDeviceId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl FleetConfig {
    /// Load and validate a fleet file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: FleetConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.manager.validate()?;

        let mut seen = HashSet::new();
        for device in &self.devices {
            validate_dev_id(&device.dev_id)?;
            if !seen.insert(device.dev_id.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate dev_id '{}'",
                    device.dev_id
                )));
            }
        }
        Ok(())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[manager]
retry_backoff_ms = 10

[[device]]
dev_id = "D1"
dev_type = "sensor"
endpoint = "localhost"
connection_method = "BASIC"
subscribe_topic = "fleet/d1/in"
publish_topic = "fleet/d1/out"
status = true
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

fn validate_dev_id(dev_id: &str) -> Result<(), ConfigError> {
    if dev_id.trim().is_empty() {
        return Err(ConfigError::InvalidDeviceId(
            "dev_id must not be empty".to_string(),
        ));
    }
    Ok(())
}
