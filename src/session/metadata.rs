//! Derived metadata: availability, discovery settings and topic names
//!
//! Availability is computed from the birth message, last-will and discovery
//! settings and cached. Every setter that touches one of those inputs
//! recomputes it, so readers can rely on the cached value between changes.

use super::model::{Availability, DiscoveryInfo, Feature, Message};

/// Topic used by the default birth, last-will and shutdown messages
pub fn status_topic(topic_prefix: &str) -> String {
    format!("{topic_prefix}/status")
}

/// Topic used by the default log message
pub fn log_topic(topic_prefix: &str) -> String {
    format!("{topic_prefix}/debug")
}

/// Retained "online" message on the status topic
pub fn default_birth_message(topic_prefix: &str) -> Message {
    Message::new(status_topic(topic_prefix), "online").retained(true)
}

/// Retained "offline" message on the status topic
pub fn default_last_will(topic_prefix: &str) -> Message {
    Message::new(status_topic(topic_prefix), "offline").retained(true)
}

pub fn default_shutdown_message(topic_prefix: &str) -> Message {
    default_last_will(topic_prefix)
}

/// Template for log lines; the payload is replaced per line
pub fn default_log_message(topic_prefix: &str) -> Message {
    Message::new(log_topic(topic_prefix), "")
}

/// Owns the inputs of availability and discovery, and the cached result
#[derive(Debug, Clone)]
pub struct MetadataEngine {
    node_name: String,
    topic_prefix: String,
    birth_message: Feature<Message>,
    last_will: Feature<Message>,
    discovery: Feature<DiscoveryInfo>,
    availability: Feature<Availability>,
}

impl MetadataEngine {
    /// Engine with the default birth/last-will for `topic_prefix` and
    /// discovery enabled with its defaults
    pub fn new(node_name: impl Into<String>, topic_prefix: impl Into<String>) -> Self {
        let topic_prefix = topic_prefix.into();
        let mut engine = Self {
            node_name: node_name.into(),
            birth_message: Feature::Enabled(default_birth_message(&topic_prefix)),
            last_will: Feature::Enabled(default_last_will(&topic_prefix)),
            discovery: Feature::Enabled(DiscoveryInfo::default()),
            availability: Feature::Disabled,
            topic_prefix,
        };
        engine.recalculate_availability();
        engine
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    pub fn birth_message(&self) -> &Feature<Message> {
        &self.birth_message
    }

    pub fn last_will(&self) -> &Feature<Message> {
        &self.last_will
    }

    pub fn set_birth_message(&mut self, message: Feature<Message>) {
        self.birth_message = message;
        self.recalculate_availability();
    }

    pub fn set_last_will(&mut self, message: Feature<Message>) {
        self.last_will = message;
        self.recalculate_availability();
    }

    pub fn set_discovery(&mut self, discovery: Feature<DiscoveryInfo>) {
        self.discovery = discovery;
        self.recalculate_availability();
    }

    pub fn discovery(&self) -> &Feature<DiscoveryInfo> {
        &self.discovery
    }

    pub fn is_discovery_enabled(&self) -> bool {
        self.discovery.is_enabled()
    }

    /// Cached availability, valid until the next setter call
    pub fn availability(&self) -> &Feature<Availability> {
        &self.availability
    }

    /// `<discovery_prefix>/<component_type>/<node_name>/<object_id>/config`,
    /// or `None` while discovery is disabled
    pub fn discovery_topic(&self, component_type: &str, object_id: &str) -> Option<String> {
        self.discovery.as_enabled().map(|info| {
            format!(
                "{}/{}/{}/{}/config",
                info.prefix, component_type, self.node_name, object_id
            )
        })
    }

    /// `<topic_prefix>/<component_type>/<object_id>/<suffix>`
    pub fn default_topic_for(&self, component_type: &str, object_id: &str, suffix: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.topic_prefix, component_type, object_id, suffix
        )
    }

    fn recalculate_availability(&mut self) {
        self.availability = match (&self.discovery, &self.birth_message, &self.last_will) {
            (Feature::Enabled(_), Feature::Enabled(birth), Feature::Enabled(will))
                if !birth.topic.is_empty() && birth.topic == will.topic =>
            {
                Feature::Enabled(Availability {
                    topic: birth.topic.clone(),
                    payload_available: birth.payload.clone(),
                    payload_not_available: will.payload.clone(),
                })
            }
            _ => Feature::Disabled,
        };
    }
}
