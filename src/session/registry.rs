//! Subscription registry and message sinks
//!
//! Each subscription binds an exact topic to a [`MessageSink`]. The registry
//! remembers whether the subscribe request for an entry went out on the
//! current connection, and when it was last attempted, so resubscription can
//! be retried without flooding the transport.

use super::model::QoS;
use crate::transport::TransportError;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Failure reported by a sink while handling a message
#[derive(Debug, Error, PartialEq)]
#[error("{0}")]
pub struct SinkError(pub String);

/// Receiver of messages for one subscription
pub trait MessageSink {
    fn handle(&mut self, topic: &str, payload: &str) -> Result<(), SinkError>;
}

/// Sink that hands the raw payload to a closure
pub struct CallbackSink<F> {
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: FnMut(&str, &str),
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> MessageSink for CallbackSink<F>
where
    F: FnMut(&str, &str),
{
    fn handle(&mut self, topic: &str, payload: &str) -> Result<(), SinkError> {
        (self.callback)(topic, payload);
        Ok(())
    }
}

/// Sink that parses the payload as a JSON object first.
///
/// Payloads that are not a JSON object are dropped without calling the
/// closure and without reporting an error.
pub struct JsonSink<F> {
    callback: F,
}

impl<F> JsonSink<F>
where
    F: FnMut(&str, &Map<String, Value>),
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> MessageSink for JsonSink<F>
where
    F: FnMut(&str, &Map<String, Value>),
{
    fn handle(&mut self, topic: &str, payload: &str) -> Result<(), SinkError> {
        if let Ok(Value::Object(root)) = serde_json::from_str::<Value>(payload) {
            (self.callback)(topic, &root);
        }
        Ok(())
    }
}

/// One registry entry
pub struct Subscription {
    pub topic: String,
    pub qos: QoS,
    sink: Box<dyn MessageSink>,
    /// Subscribe request accepted on the current connection
    pub subscribed: bool,
    /// When the last subscribe request for this entry was issued
    pub resubscribe_timeout: Option<Instant>,
}

impl Subscription {
    pub(crate) fn sink_mut(&mut self) -> &mut dyn MessageSink {
        self.sink.as_mut()
    }

    fn resubscribe_due(&self, now: Instant, interval: Duration) -> bool {
        match self.resubscribe_timeout {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= interval,
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .field("subscribed", &self.subscribed)
            .field("resubscribe_timeout", &self.resubscribe_timeout)
            .finish_non_exhaustive()
    }
}

/// Check that a topic can be used for an exact-match subscription
pub fn validate_topic(topic: &str) -> Result<(), String> {
    if topic.is_empty() {
        return Err("topic must not be empty".to_string());
    }
    if topic.contains(['+', '#']) {
        return Err(format!("wildcards are not supported: {topic}"));
    }
    Ok(())
}

/// Ordered collection of subscriptions, in insertion order
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Vec<Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry that still needs its subscribe request
    pub fn add(&mut self, topic: &str, qos: QoS, sink: Box<dyn MessageSink>) {
        self.entries.push(Subscription {
            topic: topic.to_string(),
            qos,
            sink,
            subscribed: false,
            resubscribe_timeout: None,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Subscription> {
        self.entries.iter_mut()
    }

    /// Number of entries without an accepted subscribe on this connection
    pub fn pending(&self) -> usize {
        self.entries.iter().filter(|s| !s.subscribed).count()
    }

    /// Forget all per-connection progress; called on every connect and disconnect
    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.subscribed = false;
            entry.resubscribe_timeout = None;
        }
    }

    /// Issue subscribe requests for entries that are pending and due.
    ///
    /// Entries whose last request is younger than `interval` are skipped.
    /// Returns how many requests the transport accepted.
    pub fn resubscribe_pending<F>(&mut self, now: Instant, interval: Duration, mut request: F) -> usize
    where
        F: FnMut(&str, QoS) -> Result<(), TransportError>,
    {
        let mut accepted = 0;
        for entry in self.entries.iter_mut().filter(|s| !s.subscribed) {
            if !entry.resubscribe_due(now, interval) {
                continue;
            }
            entry.resubscribe_timeout = Some(now);
            match request(&entry.topic, entry.qos) {
                Ok(()) => {
                    entry.subscribed = true;
                    accepted += 1;
                    debug!(target: "mqtt_session", topic = %entry.topic, qos = %entry.qos, "Subscribed");
                }
                Err(e) => {
                    debug!(target: "mqtt_session", topic = %entry.topic, error = %e, "Subscribe deferred");
                }
            }
        }
        accepted
    }
}
