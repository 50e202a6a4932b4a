//! Mock transport and resolver
//!
//! Both mocks are cheap to clone and share their recorded state between
//! clones: hand one clone to the session and keep another to inspect calls
//! and to play the broker's side of the conversation.

use crate::session::model::{Message, QoS};
use crate::transport::{ConnectParams, DisconnectReason, EventSender, Resolver, Transport, TransportError};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct TransportRecord {
    connects: Vec<ConnectParams>,
    subscribes: Vec<(String, QoS)>,
    published: Vec<Message>,
    disconnects: usize,
    events: Option<EventSender>,
    refuse_connect: bool,
    refuse_subscribe: bool,
    refuse_publish: bool,
}

/// Transport that records every request
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<TransportRecord>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self) -> MutexGuard<'_, TransportRecord> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn refuse_connect(&self, refuse: bool) {
        self.record().refuse_connect = refuse;
    }

    pub fn refuse_subscribe(&self, refuse: bool) {
        self.record().refuse_subscribe = refuse;
    }

    pub fn refuse_publish(&self, refuse: bool) {
        self.record().refuse_publish = refuse;
    }

    pub fn connects(&self) -> Vec<ConnectParams> {
        self.record().connects.clone()
    }

    pub fn subscribes(&self) -> Vec<(String, QoS)> {
        self.record().subscribes.clone()
    }

    pub fn published(&self) -> Vec<Message> {
        self.record().published.clone()
    }

    /// Published messages on `topic`, oldest first
    pub fn published_to(&self, topic: &str) -> Vec<Message> {
        self.record()
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn disconnects(&self) -> usize {
        self.record().disconnects
    }

    pub fn clear_history(&self) {
        let mut record = self.record();
        record.connects.clear();
        record.subscribes.clear();
        record.published.clear();
        record.disconnects = 0;
    }

    fn sender(&self) -> Option<EventSender> {
        self.record().events.clone()
    }

    /// Acknowledge the pending connect
    pub fn accept_connection(&self, session_present: bool) {
        if let Some(events) = self.sender() {
            events.connected(session_present);
        }
    }

    /// Drop the connection from the broker side
    pub fn drop_connection(&self, reason: DisconnectReason) {
        if let Some(events) = self.sender() {
            events.disconnected(reason);
        }
    }

    /// Deliver an inbound message
    pub fn deliver(&self, topic: &str, payload: &str) {
        if let Some(events) = self.sender() {
            events.message(topic, payload);
        }
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, params: &ConnectParams, events: &EventSender) -> Result<(), TransportError> {
        let mut record = self.record();
        record.connects.push(params.clone());
        if record.refuse_connect {
            return Err(TransportError::Io("mock connect failure".to_string()));
        }
        record.events = Some(events.clone());
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        let mut record = self.record();
        if record.refuse_subscribe {
            return Err(TransportError::QueueFull);
        }
        record.subscribes.push((topic.to_string(), qos));
        Ok(())
    }

    fn publish(&mut self, message: &Message) -> Result<(), TransportError> {
        let mut record = self.record();
        if record.refuse_publish {
            return Err(TransportError::QueueFull);
        }
        record.published.push(message.clone());
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.record().disconnects += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ResolverRecord {
    lookups: Vec<String>,
    events: Option<EventSender>,
    answer: Option<IpAddr>,
}

/// Resolver that records lookups and answers on demand
#[derive(Debug, Clone, Default)]
pub struct MockResolver {
    inner: Arc<Mutex<ResolverRecord>>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver that answers every lookup with `ip` straight away
    pub fn resolving_to(ip: IpAddr) -> Self {
        let resolver = Self::default();
        resolver.record().answer = Some(ip);
        resolver
    }

    fn record(&self) -> MutexGuard<'_, ResolverRecord> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn lookups(&self) -> Vec<String> {
        self.record().lookups.clone()
    }

    /// Complete the pending lookup
    pub fn answer(&self, ip: IpAddr) {
        if let Some(events) = self.record().events.clone() {
            events.resolved(ip);
        }
    }

    /// Fail the pending lookup
    pub fn fail(&self, reason: &str) {
        if let Some(events) = self.record().events.clone() {
            events.resolution_failed(reason);
        }
    }
}

impl Resolver for MockResolver {
    fn resolve(&mut self, host: &str, events: &EventSender) {
        let mut record = self.record();
        record.lookups.push(host.to_string());
        record.events = Some(events.clone());
        if let Some(ip) = record.answer {
            events.resolved(ip);
        }
    }
}
