//! TOML configuration for a session
//!
//! The file mirrors the session options: broker connection, node identity,
//! the four message templates, discovery, and retry timing. Anything left out
//! falls back to the defaults derived from the node's topic prefix.

use crate::session::client::SessionOptions;
use crate::session::metadata::{
    default_birth_message, default_last_will, default_log_message, default_shutdown_message,
};
use crate::session::model::{Credentials, DiscoveryInfo, Feature, Message, QoS, DEFAULT_DISCOVERY_PREFIX};
use crate::session::state::Timing;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::Level;
use url::Url;

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Most verbose level forwarded to the log topic
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub broker: BrokerSection,
    pub node: NodeSection,
    pub birth_message: Option<MessageSection>,
    pub will_message: Option<MessageSection>,
    pub shutdown_message: Option<MessageSection>,
    pub log_topic: Option<MessageSection>,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub timing: TimingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// `mqtt://host[:port]` or `mqtts://host[:port]`
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Environment variable containing the username; wins over `username`
    pub username_env: Option<String>,
    /// Environment variable containing the password; wins over `password`
    pub password_env: Option<String>,
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u16,
    /// SHA1 certificate fingerprints as 40 hex characters
    #[serde(default)]
    pub ssl_fingerprints: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSection {
    /// Node identifier (must match [a-zA-Z0-9._-]+)
    pub name: String,
    /// Defaults to the node name
    pub topic_prefix: Option<String>,
}

/// A message template. Omitted fields take the derived default.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessageSection {
    #[serde(default)]
    pub disabled: bool,
    pub topic: Option<String>,
    pub payload: Option<String>,
    pub qos: Option<QoS>,
    pub retain: Option<bool>,
}

impl MessageSection {
    fn resolve(section: Option<&MessageSection>, default: Message) -> Feature<Message> {
        let Some(section) = section else {
            return Feature::Enabled(default);
        };
        if section.disabled {
            return Feature::Disabled;
        }
        Feature::Enabled(Message {
            topic: section.topic.clone().unwrap_or(default.topic),
            payload: section.payload.clone().unwrap_or(default.payload),
            qos: section.qos.unwrap_or(default.qos),
            retain: section.retain.unwrap_or(default.retain),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_discovery_prefix")]
    pub prefix: String,
    #[serde(default = "default_true")]
    pub retain: bool,
    #[serde(default)]
    pub clean: bool,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: default_discovery_prefix(),
            retain: true,
            clean: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingSection {
    /// 0 disables the reboot escalation
    #[serde(default = "default_reboot_timeout")]
    pub reboot_timeout_secs: u64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_resubscribe_interval")]
    pub resubscribe_interval_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            reboot_timeout_secs: default_reboot_timeout(),
            reconnect_delay_ms: default_reconnect_delay(),
            resolve_timeout_ms: default_resolve_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            resubscribe_interval_ms: default_resubscribe_interval(),
        }
    }
}

impl TimingSection {
    pub fn to_timing(&self) -> Timing {
        Timing {
            reboot_timeout: match self.reboot_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            resolve_timeout: Duration::from_millis(self.resolve_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            resubscribe_interval: Duration::from_millis(self.resubscribe_interval_ms),
        }
    }
}

fn default_log_level() -> String {
    "debug".to_string()
}

fn default_keep_alive() -> u16 {
    15
}

fn default_true() -> bool {
    true
}

fn default_discovery_prefix() -> String {
    DEFAULT_DISCOVERY_PREFIX.to_string()
}

fn default_reboot_timeout() -> u64 {
    300
}

fn default_reconnect_delay() -> u64 {
    5000
}

fn default_resolve_timeout() -> u64 {
    20000
}

fn default_connect_timeout() -> u64 {
    60000
}

fn default_resubscribe_interval() -> u64 {
    1000
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Broker endpoint extracted from `broker.url`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl SessionConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_node_name(&self.node.name)?;
        self.broker_endpoint()?;
        self.parse_fingerprints()?;
        self.parse_log_level()?;
        self.timing
            .to_timing()
            .validate()
            .map_err(ConfigError::InvalidConfig)?;
        if self.discovery.enabled && self.discovery.prefix.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "discovery.prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn broker_endpoint(&self) -> Result<BrokerEndpoint, ConfigError> {
        let url = Url::parse(&self.broker.url)
            .map_err(|e| ConfigError::InvalidBrokerUrl(format!("{}: {e}", self.broker.url)))?;

        let tls = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            other => {
                return Err(ConfigError::InvalidBrokerUrl(format!(
                    "unsupported scheme '{other}', expected mqtt or mqtts"
                )))
            }
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::InvalidBrokerUrl(format!("{}: missing host", self.broker.url)))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });
        Ok(BrokerEndpoint { host, port, tls })
    }

    pub fn parse_fingerprints(&self) -> Result<Vec<[u8; 20]>, ConfigError> {
        self.broker
            .ssl_fingerprints
            .iter()
            .map(|fp| parse_fingerprint(fp))
            .collect()
    }

    pub fn parse_log_level(&self) -> Result<Level, ConfigError> {
        Level::from_str(&self.log_level)
            .map_err(|_| ConfigError::InvalidConfig(format!("unknown log_level '{}'", self.log_level)))
    }

    pub fn topic_prefix(&self) -> &str {
        self.node.topic_prefix.as_deref().unwrap_or(&self.node.name)
    }

    /// Username from the environment variable if configured, else the literal value
    pub fn get_mqtt_username(&self) -> Option<String> {
        get_env_var_optional(self.broker.username_env.as_ref()).or_else(|| self.broker.username.clone())
    }

    pub fn get_mqtt_password(&self) -> Option<String> {
        get_env_var_optional(self.broker.password_env.as_ref()).or_else(|| self.broker.password.clone())
    }

    /// Configured client id, or `<node>-<random>` when none is set
    pub fn client_id(&self) -> String {
        match &self.broker.client_id {
            Some(id) => id.clone(),
            None => {
                let suffix = uuid::Uuid::new_v4().simple().to_string();
                format!("{}-{}", self.node.name, &suffix[..8])
            }
        }
    }

    /// Resolve the file into session options
    pub fn to_options(&self) -> Result<SessionOptions, ConfigError> {
        let endpoint = self.broker_endpoint()?;
        let prefix = self.topic_prefix().to_string();

        let mut credentials = Credentials::new(endpoint.host, endpoint.port, &self.client_id());
        credentials.username = self.get_mqtt_username();
        credentials.password = self.get_mqtt_password();

        let discovery = if self.discovery.enabled {
            Feature::Enabled(DiscoveryInfo {
                prefix: self.discovery.prefix.clone(),
                retain: self.discovery.retain,
                clean: self.discovery.clean,
            })
        } else {
            Feature::Disabled
        };

        Ok(SessionOptions {
            credentials,
            node_name: self.node.name.clone(),
            keep_alive_secs: self.broker.keep_alive_secs,
            birth_message: MessageSection::resolve(self.birth_message.as_ref(), default_birth_message(&prefix)),
            last_will: MessageSection::resolve(self.will_message.as_ref(), default_last_will(&prefix)),
            shutdown_message: MessageSection::resolve(
                self.shutdown_message.as_ref(),
                default_shutdown_message(&prefix),
            ),
            log_message: MessageSection::resolve(self.log_topic.as_ref(), default_log_message(&prefix)),
            log_level: self.parse_log_level()?,
            discovery,
            tls: endpoint.tls,
            ssl_fingerprints: self.parse_fingerprints()?,
            timing: self.timing.to_timing(),
            topic_prefix: prefix,
        })
    }
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

/// Validate node name format
fn validate_node_name(name: &str) -> Result<(), ConfigError> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if name.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidConfig(format!(
            "Node name '{name}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

/// Parse a SHA1 fingerprint written as 40 hex characters, colons allowed
pub fn parse_fingerprint(text: &str) -> Result<[u8; 20], ConfigError> {
    let hex: String = text.chars().filter(|c| *c != ':').collect();
    let invalid = || ConfigError::InvalidConfig(format!("SSL fingerprint '{text}' must be 40 hex characters"));

    if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    let mut out = [0u8; 20];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[broker]
url = "mqtt://localhost"

[node]
name = "kitchen"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = SessionConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.broker.keep_alive_secs, 15);
        assert_eq!(config.topic_prefix(), "kitchen");
        assert!(config.discovery.enabled);
        assert_eq!(config.discovery.prefix, "homeassistant");
        assert_eq!(config.timing, TimingSection::default());

        let endpoint = config.broker_endpoint().unwrap();
        assert_eq!(endpoint.host, "localhost");
        assert_eq!(endpoint.port, 1883);
        assert!(!endpoint.tls);
    }

    #[test]
    fn test_mqtts_default_port() {
        let config = SessionConfig::from_toml(
            r#"
[broker]
url = "mqtts://broker.example.com"

[node]
name = "n"
"#,
        )
        .unwrap();
        assert_eq!(config.broker_endpoint().unwrap().port, 8883);
        assert!(config.broker_endpoint().unwrap().tls);
    }

    #[test]
    fn test_unsupported_scheme_rejected() {
        let result = SessionConfig::from_toml(
            r#"
[broker]
url = "http://localhost:1883"

[node]
name = "n"
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidBrokerUrl(_))));
    }

    #[test]
    fn test_invalid_node_name() {
        assert!(validate_node_name("kitchen node").is_err());
        assert!(validate_node_name("").is_err());
        assert!(validate_node_name("kitchen-node_1.a").is_ok());
    }

    #[test]
    fn test_parse_fingerprint() {
        let fp = parse_fingerprint("00112233445566778899aabbccddeeff00112233").unwrap();
        assert_eq!(fp[0], 0x00);
        assert_eq!(fp[1], 0x11);
        assert_eq!(fp[19], 0x33);

        let colons = parse_fingerprint("00:11:22:33:44:55:66:77:88:99:aa:bb:cc:dd:ee:ff:00:11:22:33").unwrap();
        assert_eq!(colons, fp);

        assert!(parse_fingerprint("abc").is_err());
        assert!(parse_fingerprint("zz112233445566778899aabbccddeeff00112233").is_err());
        // from_str_radix alone would take a sign
        assert!(parse_fingerprint(&"+f".repeat(20)).is_err());
    }

    #[test]
    fn test_message_section_resolution() {
        let default = default_birth_message("kitchen");

        assert_eq!(MessageSection::resolve(None, default.clone()), Feature::Enabled(default.clone()));

        let disabled = MessageSection {
            disabled: true,
            ..MessageSection::default()
        };
        assert_eq!(MessageSection::resolve(Some(&disabled), default.clone()), Feature::Disabled);

        let partial = MessageSection {
            payload: Some("up".to_string()),
            ..MessageSection::default()
        };
        let resolved = MessageSection::resolve(Some(&partial), default);
        let message = resolved.as_enabled().unwrap();
        assert_eq!(message.topic, "kitchen/status");
        assert_eq!(message.payload, "up");
        assert!(message.retain);
    }

    #[test]
    fn test_zero_reboot_timeout_disables() {
        let timing = TimingSection {
            reboot_timeout_secs: 0,
            ..TimingSection::default()
        };
        assert_eq!(timing.to_timing().reboot_timeout, None);
        assert_eq!(TimingSection::default().to_timing(), Timing::default());
    }

    #[test]
    fn test_generated_client_id_starts_with_node_name() {
        let config = SessionConfig::from_toml(MINIMAL).unwrap();
        let id = config.client_id();
        assert!(id.starts_with("kitchen-"));
        assert_eq!(id.len(), "kitchen-".len() + 8);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = SessionConfig::from_toml(MINIMAL).unwrap();
        config.log_level = "chatty".to_string();
        assert!(config.validate().is_err());
    }
}
