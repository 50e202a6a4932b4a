//! Value types shared by the session, its configuration and its collaborators
//!
//! Everything here is plain data: credentials, the message template used for
//! last-will/birth/shutdown/log messages, availability and discovery info.
//! Features that can be switched off are modelled with [`Feature`] instead of
//! empty-string sentinels.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest client identifier accepted by MQTT 3.1 brokers
pub const MAX_CLIENT_ID_LEN: usize = 23;

/// Discovery prefix Home Assistant listens on out of the box
pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";

/// MQTT quality of service, passed through to the transport untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Debug, Error, PartialEq)]
#[error("invalid QoS level {0}, expected 0, 1 or 2")]
pub struct InvalidQoS(pub u8);

impl TryFrom<u8> for QoS {
    type Error = InvalidQoS;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(InvalidQoS(other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// An optional piece of behaviour that is either configured or switched off
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Feature<T> {
    Enabled(T),
    #[default]
    Disabled,
}

impl<T> Feature<T> {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Feature::Enabled(_))
    }

    pub fn as_enabled(&self) -> Option<&T> {
        match self {
            Feature::Enabled(value) => Some(value),
            Feature::Disabled => None,
        }
    }

    pub fn as_enabled_mut(&mut self) -> Option<&mut T> {
        match self {
            Feature::Enabled(value) => Some(value),
            Feature::Disabled => None,
        }
    }
}

impl<T> From<Option<T>> for Feature<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Feature::Disabled, Feature::Enabled)
    }
}

/// Broker address and login.
///
/// The client id is truncated to [`MAX_CLIENT_ID_LEN`] characters whenever it
/// is assigned, so the stored value is always acceptable to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Host name or literal IP of the broker, without port
    pub address: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    client_id: String,
}

impl Credentials {
    pub fn new(address: impl Into<String>, port: u16, client_id: &str) -> Self {
        Self {
            address: address.into(),
            port,
            username: None,
            password: None,
            client_id: truncate_client_id(client_id),
        }
    }

    pub fn with_login(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn set_client_id(&mut self, client_id: &str) {
        self.client_id = truncate_client_id(client_id);
    }
}

/// Cut a client id down to at most [`MAX_CLIENT_ID_LEN`] characters
pub fn truncate_client_id(client_id: &str) -> String {
    match client_id.char_indices().nth(MAX_CLIENT_ID_LEN) {
        Some((byte_index, _)) => client_id[..byte_index].to_string(),
        None => client_id.to_string(),
    }
}

/// A single outbound message: last-will, birth, shutdown, log line or a plain publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub payload: String,
    #[serde(default)]
    pub qos: QoS,
    #[serde(default)]
    pub retain: bool,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn retained(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

/// Online/offline representation surfaced to dependent components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub topic: String,
    pub payload_available: String,
    pub payload_not_available: String,
}

/// Home Assistant discovery settings.
///
/// See <https://www.home-assistant.io/docs/mqtt/discovery/>.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryInfo {
    pub prefix: String,
    /// Whether discovery messages are published retained
    pub retain: bool,
    /// Whether stale retained discovery messages should be cleared on startup
    pub clean: bool,
}

impl Default for DiscoveryInfo {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_DISCOVERY_PREFIX.to_string(),
            retain: true,
            clean: false,
        }
    }
}
