//! Configuration system for the traffic generator
//!
//! Settings are read from a TOML file and validated on load. Credentials can
//! be given inline or through environment variables; the latter are resolved
//! only when the [`Identity`] is built.

use crate::protocol::{
    generate_client_id, validate_client_id_prefix, validate_topic_name, Identity, QosLevel,
    DEFAULT_TOPIC,
};
use crate::transport::mqtt::ReconnectConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default MQTT port when the broker URL has none
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Files searched, in order, when no config path is given
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["publisher.toml", "config/publisher.toml"];

/// Main publisher configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublisherConfig {
    pub broker: BrokerSection,
    #[serde(default)]
    pub credentials: CredentialsSection,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub observability: ObservabilitySection,
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL, `mqtt://host[:port]`
    pub url: String,
    /// Client id is this prefix plus a random suffix
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// MQTT keep-alive in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_client_id_prefix() -> String {
    "rust-mqtt".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

/// Credentials section; inline values win over environment variables
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialsSection {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
}

impl Default for CredentialsSection {
    fn default() -> Self {
        Self {
            username: Some("username".to_string()),
            password: Some("password".to_string()),
            username_env: None,
            password_env: None,
        }
    }
}

impl std::fmt::Debug for CredentialsSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsSection")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("username_env", &self.username_env)
            .field("password_env", &self.password_env)
            .finish()
    }
}

impl CredentialsSection {
    /// Resolve the username, inline first, then the environment
    pub fn resolve_username(&self) -> Result<String, ConfigError> {
        resolve_secret(self.username.as_ref(), self.username_env.as_ref())
    }

    /// Resolve the password, inline first, then the environment
    pub fn resolve_password(&self) -> Result<String, ConfigError> {
        resolve_secret(self.password.as_ref(), self.password_env.as_ref())
    }

    /// Copy with the inline password masked, for display
    pub fn redacted(&self) -> Self {
        Self {
            password: self.password.as_ref().map(|_| "********".to_string()),
            ..self.clone()
        }
    }
}

/// Inline value, else the named environment variable, else anonymous
fn resolve_secret(inline: Option<&String>, env_var: Option<&String>) -> Result<String, ConfigError> {
    match (inline, env_var) {
        (Some(value), _) => Ok(value.clone()),
        (None, Some(name)) => {
            std::env::var(name).map_err(|_| ConfigError::EnvVarNotFound(name.clone()))
        }
        (None, None) => Ok(String::new()),
    }
}

/// Publish section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PublishSection {
    pub topic: String,
    /// Sleep between ticks
    pub interval_ms: u64,
    pub qos: QosLevel,
    /// Publish acknowledgement window; the interval when absent
    pub ack_timeout_ms: Option<u64>,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            interval_ms: 1_000,
            qos: QosLevel::ExactlyOnce,
            ack_timeout_ms: None,
        }
    }
}

impl PublishSection {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms.unwrap_or(self.interval_ms))
    }
}

/// Observability section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ObservabilitySection {
    /// Port for the health/metrics HTTP server; disabled when absent
    pub health_port: Option<u16>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid broker URL '{url}': {reason}")]
    InvalidBrokerUrl { url: String, reason: String },
    #[error("No configuration file found (tried {0})")]
    NotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PublisherConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PublisherConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or the first existing default path when `None`
    pub fn discover(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => {
                let found = DEFAULT_CONFIG_PATHS
                    .iter()
                    .map(PathBuf::from)
                    .find(|candidate| candidate.is_file())
                    .ok_or_else(|| ConfigError::NotFound(DEFAULT_CONFIG_PATHS.join(", ")))?;
                Self::load_from_file(&found)
            }
        }
    }

    /// Check value ranges and formats
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_broker_url(&self.broker.url)?;

        validate_client_id_prefix(&self.broker.client_id_prefix)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        if self.broker.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(
                "broker.keep_alive_secs must be at least 5".to_string(),
            ));
        }

        validate_topic_name(&self.publish.topic)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        if self.publish.interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "publish.interval_ms must be greater than 0".to_string(),
            ));
        }

        if let Some(ack_timeout_ms) = self.publish.ack_timeout_ms {
            if ack_timeout_ms == 0 || ack_timeout_ms > self.publish.interval_ms {
                return Err(ConfigError::InvalidConfig(format!(
                    "publish.ack_timeout_ms must be in 1..={}",
                    self.publish.interval_ms
                )));
            }
        }

        self.validate_reconnect()
    }

    fn validate_reconnect(&self) -> Result<(), ConfigError> {
        let reconnect = &self.reconnect;

        if reconnect.initial_delay_ms == 0 || reconnect.initial_delay_ms > reconnect.max_delay_ms {
            return Err(ConfigError::InvalidConfig(
                "reconnect.initial_delay_ms must be in 1..=max_delay_ms".to_string(),
            ));
        }

        if !(reconnect.multiplier >= 1.0 && reconnect.multiplier.is_finite()) {
            return Err(ConfigError::InvalidConfig(
                "reconnect.multiplier must be at least 1.0".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&reconnect.jitter) {
            return Err(ConfigError::InvalidConfig(
                "reconnect.jitter must be in 0.0..1.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Build the process identity with a freshly generated client id
    pub fn build_identity(&self) -> Result<Identity, ConfigError> {
        let (host, port) = parse_broker_url(&self.broker.url)?;
        let client_id = generate_client_id(&self.broker.client_id_prefix);

        Ok(Identity::new(
            client_id,
            self.credentials.resolve_username()?,
            self.credentials.resolve_password()?,
            host,
            port,
        ))
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.broker.keep_alive_secs)
    }

    /// Copy safe to print
    pub fn redacted(&self) -> Self {
        Self {
            credentials: self.credentials.redacted(),
            ..self.clone()
        }
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[broker]
url = "mqtt://localhost:1883"
client_id_prefix = "test"

[credentials]
username = "u"
password = "p"
"#;
        Self::from_toml_str(toml_content).expect("Test config should parse")
    }
}

/// Split an `mqtt://host[:port]` URL into host and port
pub fn parse_broker_url(raw: &str) -> Result<(String, u16), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidBrokerUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;

    if url.scheme() != "mqtt" {
        return Err(invalid("scheme must be mqtt"));
    }

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| invalid("missing host"))?;

    Ok((host.to_string(), url.port().unwrap_or(DEFAULT_MQTT_PORT)))
}
