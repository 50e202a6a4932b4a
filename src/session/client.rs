//! The session: single owner of the broker connection
//!
//! [`MqttSession::poll`] is the only place where progress happens. Each call
//! drains the event queue, advances the connection lifecycle, reissues pending
//! subscriptions, publishes the birth message, lets dependent components
//! re-send their state, and finally dispatches the messages that arrived since
//! the previous poll, in that order.

use super::health::{calculate_health_metrics, HealthMetrics};
use super::metadata::{default_log_message, default_shutdown_message, MetadataEngine};
use super::model::{Availability, Credentials, DiscoveryInfo, Feature, Message, QoS};
use super::outbox::{DependentComponent, QueuedOutbox};
use super::registry::{validate_topic, CallbackSink, JsonSink, MessageSink, SubscriptionRegistry};
use super::router::MessageRouter;
use super::state::{ConnectionState, Lifecycle, Step, Timing};
use crate::error::{SessionError, SessionResult};
use crate::transport::{
    event_channel, ConnectParams, DisconnectReason, EventSender, Resolver, SessionEvent, Transport,
};
use serde_json::{Map, Value};
use std::net::IpAddr;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Level};

/// Everything a session is configured with
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub credentials: Credentials,
    pub node_name: String,
    pub topic_prefix: String,
    pub keep_alive_secs: u16,
    pub birth_message: Feature<Message>,
    pub last_will: Feature<Message>,
    pub shutdown_message: Feature<Message>,
    /// Template for forwarded log lines
    pub log_message: Feature<Message>,
    /// Most verbose level forwarded to the log topic
    pub log_level: Level,
    pub discovery: Feature<DiscoveryInfo>,
    /// Connect over TLS even without pinned fingerprints
    pub tls: bool,
    pub ssl_fingerprints: Vec<[u8; 20]>,
    pub timing: Timing,
}

impl SessionOptions {
    /// Options with every message derived from `topic_prefix`
    pub fn new(credentials: Credentials, node_name: &str, topic_prefix: &str) -> Self {
        let defaults = MetadataEngine::new(node_name, topic_prefix);
        Self {
            credentials,
            node_name: node_name.to_string(),
            topic_prefix: topic_prefix.to_string(),
            keep_alive_secs: 15,
            birth_message: defaults.birth_message().clone(),
            last_will: defaults.last_will().clone(),
            shutdown_message: Feature::Enabled(default_shutdown_message(topic_prefix)),
            log_message: Feature::Enabled(default_log_message(topic_prefix)),
            log_level: Level::DEBUG,
            discovery: defaults.discovery().clone(),
            tls: false,
            ssl_fingerprints: Vec::new(),
            timing: Timing::default(),
        }
    }
}

/// Single-owner MQTT client session
pub struct MqttSession<T: Transport, R: Resolver> {
    credentials: Credentials,
    keep_alive_secs: u16,
    shutdown_message: Feature<Message>,
    log_message: Feature<Message>,
    log_level: Level,
    tls: bool,
    ssl_fingerprints: Vec<[u8; 20]>,
    timing: Timing,

    metadata: MetadataEngine,
    registry: SubscriptionRegistry,
    children: Vec<Box<dyn DependentComponent>>,

    transport: T,
    resolver: R,
    events_tx: EventSender,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,

    state: ConnectionState,
    ip: Option<IpAddr>,
    sent_birth_message: bool,
    children_notified: bool,
    stopped: bool,

    /// Clock value of the latest poll
    last_poll: Option<Instant>,
    attempt_started: Option<Instant>,
    first_attempt: Option<Instant>,
    last_connected: Option<Instant>,
    connected_since: Option<Instant>,
    last_message_at: Option<Instant>,
    connection_count: u32,
    disconnect_reason: Option<DisconnectReason>,
}

impl<T: Transport, R: Resolver> MqttSession<T, R> {
    pub fn new(options: SessionOptions, transport: T, resolver: R) -> Self {
        let mut metadata = MetadataEngine::new(options.node_name, options.topic_prefix);
        metadata.set_birth_message(options.birth_message);
        metadata.set_last_will(options.last_will);
        metadata.set_discovery(options.discovery);

        let (events_tx, events_rx) = event_channel();

        Self {
            credentials: options.credentials,
            keep_alive_secs: options.keep_alive_secs,
            shutdown_message: options.shutdown_message,
            log_message: options.log_message,
            log_level: options.log_level,
            tls: options.tls,
            ssl_fingerprints: options.ssl_fingerprints,
            timing: options.timing,
            metadata,
            registry: SubscriptionRegistry::new(),
            children: Vec::new(),
            transport,
            resolver,
            events_tx,
            events_rx,
            state: ConnectionState::Disconnected,
            ip: None,
            sent_birth_message: false,
            children_notified: false,
            stopped: false,
            last_poll: None,
            attempt_started: None,
            first_attempt: None,
            last_connected: None,
            connected_since: None,
            last_message_at: None,
            connection_count: 0,
            disconnect_reason: None,
        }
    }

    /// Handle for collaborators that deliver completions to this session
    pub fn event_sender(&self) -> EventSender {
        self.events_tx.clone()
    }

    /// Drive the session forward. Call this periodically from the host loop.
    pub fn poll(&mut self, now: Instant) {
        self.last_poll = Some(now);
        let inbound = self.drain_events(now);

        if !self.stopped {
            match Lifecycle::next_step(self.state, self.attempt_started, &self.timing, now) {
                Step::Wait => {}
                Step::StartResolve => self.start_attempt(now),
                Step::ResolveTimedOut => {
                    warn!(address = %self.credentials.address, "DNS lookup timed out");
                    self.transition(ConnectionState::Disconnected, None);
                }
                Step::ConnectTimedOut => {
                    if let Err(e) = self.transport.disconnect() {
                        debug!(target: "mqtt_session", error = %e, "Disconnect after timeout failed");
                    }
                    self.mark_disconnected(DisconnectReason::ConnectTimeout, now);
                }
                Step::Service => self.service_connection(now),
            }
        }

        for (topic, payload) in inbound {
            self.last_message_at = Some(now);
            MessageRouter::dispatch(&mut self.registry, &topic, &payload);
        }
    }

    /// Apply queued state events and collect inbound messages for later dispatch
    fn drain_events(&mut self, now: Instant) -> Vec<(String, String)> {
        let mut inbound = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply_event(event, now, &mut inbound);
        }
        inbound
    }

    fn apply_event(&mut self, event: SessionEvent, now: Instant, inbound: &mut Vec<(String, String)>) {
        match event {
            SessionEvent::Resolved(ip) => {
                if !Lifecycle::accepts_resolution(self.state) {
                    debug!(target: "mqtt_session", %ip, state = %self.state, "Ignoring stale DNS result");
                    return;
                }
                info!(address = %self.credentials.address, %ip, "Resolved broker address");
                self.begin_connect(ip);
            }
            SessionEvent::ResolutionFailed(reason) => {
                if !Lifecycle::accepts_resolution(self.state) {
                    debug!(target: "mqtt_session", state = %self.state, "Ignoring stale DNS failure");
                    return;
                }
                warn!(address = %self.credentials.address, %reason, "Couldn't resolve broker address");
                self.transition(ConnectionState::Disconnected, None);
            }
            SessionEvent::Connected { session_present } => {
                if !Lifecycle::accepts_connected(self.state) {
                    debug!(target: "mqtt_session", state = %self.state, "Ignoring stale connect event");
                    return;
                }
                self.transition(ConnectionState::Connected, None);
                self.sent_birth_message = false;
                self.children_notified = false;
                self.registry.reset();
                self.connection_count += 1;
                self.connected_since = Some(now);
                self.last_connected = Some(now);
                debug!(target: "mqtt_session", session_present, "Connection established");
            }
            SessionEvent::Disconnected(reason) => {
                if !Lifecycle::accepts_disconnect(self.state) {
                    debug!(target: "mqtt_session", %reason, state = %self.state, "Ignoring stale disconnect");
                    return;
                }
                self.mark_disconnected(reason, now);
            }
            SessionEvent::Message { topic, payload } => inbound.push((topic, payload)),
        }
    }

    fn start_attempt(&mut self, now: Instant) {
        self.first_attempt.get_or_insert(now);
        self.attempt_started = Some(now);

        match Lifecycle::literal_address(&self.credentials.address) {
            Some(ip) => {
                self.state = ConnectionState::ResolvingAddress;
                self.begin_connect(ip);
            }
            None => {
                info!(address = %self.credentials.address, "Resolving broker address");
                self.transition(ConnectionState::ResolvingAddress, None);
                self.resolver
                    .resolve(&self.credentials.address, &self.events_tx);
            }
        }
    }

    fn begin_connect(&mut self, ip: IpAddr) {
        self.ip = Some(ip);
        self.transition(ConnectionState::Connecting, None);

        let params = ConnectParams {
            ip,
            credentials: self.credentials.clone(),
            keep_alive_secs: self.keep_alive_secs,
            last_will: self.metadata.last_will().as_enabled().cloned(),
            tls: self.tls,
            ssl_fingerprints: self.ssl_fingerprints.clone(),
            clean_session: true,
        };
        info!(
            %ip,
            port = self.credentials.port,
            client_id = %self.credentials.client_id(),
            tls = params.requires_tls(),
            "Connecting to MQTT broker"
        );

        if let Err(e) = self.transport.connect(&params, &self.events_tx) {
            let reason = DisconnectReason::Other(e.to_string());
            self.disconnect_reason = Some(reason.clone());
            self.transition(ConnectionState::Disconnected, Some(&reason));
        }
    }

    fn mark_disconnected(&mut self, reason: DisconnectReason, now: Instant) {
        if self.state == ConnectionState::Connected {
            self.last_connected = Some(now);
        }
        self.transition(ConnectionState::Disconnected, Some(&reason));
        self.disconnect_reason = Some(reason);
        self.registry.reset();
        self.connected_since = None;
    }

    fn transition(&mut self, to: ConnectionState, reason: Option<&DisconnectReason>) {
        if self.state != to {
            Lifecycle::log_transition(self.state, to, reason);
        }
        self.state = to;
    }

    /// Per-connection work, in order: resubscribe, birth, dependents
    fn service_connection(&mut self, now: Instant) {
        let transport = &mut self.transport;
        self.registry
            .resubscribe_pending(now, self.timing.resubscribe_interval, |topic, qos| {
                transport.subscribe(topic, qos)
            });

        if !self.sent_birth_message {
            self.sent_birth_message = match self.metadata.birth_message().as_enabled() {
                Some(birth) => match self.transport.publish(birth) {
                    Ok(()) => {
                        debug!(target: "mqtt_session", topic = %birth.topic, "Published birth message");
                        true
                    }
                    Err(e) => {
                        debug!(target: "mqtt_session", error = %e, "Birth message deferred");
                        false
                    }
                },
                None => true,
            };
        }

        if self.sent_birth_message && !self.children_notified {
            self.children_notified = true;
            for child in &mut self.children {
                let mut outbox = QueuedOutbox::new();
                child.on_connected(&mut outbox);
                for message in outbox.into_messages() {
                    if let Err(e) = self.transport.publish(&message) {
                        warn!(
                            component = child.component_name(),
                            topic = %message.topic,
                            error = %e,
                            "Failed to publish component state"
                        );
                    }
                }
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Startup gate for dependent modules; opens on connect or after the reboot timeout
    pub fn can_proceed(&self, now: Instant) -> bool {
        Lifecycle::can_proceed(self.state, self.first_attempt, &self.timing, now)
    }

    /// Whether the broker has been unreachable for longer than the reboot timeout
    pub fn reboot_due(&self, now: Instant) -> bool {
        Lifecycle::reboot_due(
            self.state,
            self.last_connected.or(self.first_attempt),
            &self.timing,
            now,
        )
    }

    pub fn disconnect_reason(&self) -> Option<&DisconnectReason> {
        self.disconnect_reason.as_ref()
    }

    /// Last address the broker host name resolved to
    pub fn resolved_ip(&self) -> Option<IpAddr> {
        self.ip
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn set_client_id(&mut self, client_id: &str) {
        self.credentials.set_client_id(client_id);
    }

    pub fn topic_prefix(&self) -> &str {
        self.metadata.topic_prefix()
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn register_component(&mut self, component: Box<dyn DependentComponent>) {
        debug!(target: "mqtt_session", component = component.component_name(), "Registered component");
        self.children.push(component);
    }

    // Derived metadata

    pub fn get_availability(&self) -> &Feature<Availability> {
        self.metadata.availability()
    }

    pub fn get_discovery_info(&self) -> &Feature<DiscoveryInfo> {
        self.metadata.discovery()
    }

    pub fn is_discovery_enabled(&self) -> bool {
        self.metadata.is_discovery_enabled()
    }

    pub fn discovery_topic(&self, component_type: &str, object_id: &str) -> Option<String> {
        self.metadata.discovery_topic(component_type, object_id)
    }

    pub fn default_topic_for(&self, component_type: &str, object_id: &str, suffix: &str) -> String {
        self.metadata.default_topic_for(component_type, object_id, suffix)
    }

    pub fn set_discovery_info(&mut self, prefix: &str, retain: bool, clean: bool) {
        self.metadata.set_discovery(Feature::Enabled(DiscoveryInfo {
            prefix: prefix.to_string(),
            retain,
            clean,
        }));
    }

    pub fn disable_discovery(&mut self) {
        self.metadata.set_discovery(Feature::Disabled);
    }

    /// Applies from the next connection attempt on
    pub fn set_last_will(&mut self, message: Message) {
        self.metadata.set_last_will(Feature::Enabled(message));
    }

    pub fn disable_last_will(&mut self) {
        self.metadata.set_last_will(Feature::Disabled);
    }

    pub fn set_birth_message(&mut self, message: Message) {
        self.metadata.set_birth_message(Feature::Enabled(message));
    }

    pub fn disable_birth_message(&mut self) {
        self.metadata.set_birth_message(Feature::Disabled);
    }

    pub fn set_shutdown_message(&mut self, message: Message) {
        self.shutdown_message = Feature::Enabled(message);
    }

    pub fn disable_shutdown_message(&mut self) {
        self.shutdown_message = Feature::Disabled;
    }

    pub fn set_log_message_template(&mut self, message: Message) {
        self.log_message = Feature::Enabled(message);
    }

    pub fn disable_log_message(&mut self) {
        self.log_message = Feature::Disabled;
    }

    pub fn is_log_message_enabled(&self) -> bool {
        self.log_message.is_enabled()
    }

    pub fn set_log_level(&mut self, level: Level) {
        self.log_level = level;
    }

    // Subscribe

    /// Subscribe to an exact topic; wildcards are rejected
    pub fn subscribe<F>(&mut self, topic: &str, callback: F, qos: QoS) -> SessionResult<()>
    where
        F: FnMut(&str, &str) + 'static,
    {
        self.subscribe_sink(topic, qos, Box::new(CallbackSink::new(callback)))
    }

    /// Subscribe and receive payloads parsed as JSON objects. Payloads that do
    /// not parse are dropped without calling `callback`.
    pub fn subscribe_json<F>(&mut self, topic: &str, callback: F, qos: QoS) -> SessionResult<()>
    where
        F: FnMut(&str, &Map<String, Value>) + 'static,
    {
        self.subscribe_sink(topic, qos, Box::new(JsonSink::new(callback)))
    }

    /// Register any sink. When connected the subscribe request goes out at
    /// once; otherwise it waits for the next connection.
    pub fn subscribe_sink(
        &mut self,
        topic: &str,
        qos: QoS,
        sink: Box<dyn MessageSink>,
    ) -> SessionResult<()> {
        validate_topic(topic).map_err(SessionError::InvalidTopic)?;
        self.registry.add(topic, qos, sink);

        // Only a poll can connect the session, so `last_poll` is set here
        if let (true, Some(now)) = (self.is_connected(), self.last_poll) {
            let transport = &mut self.transport;
            self.registry
                .resubscribe_pending(now, self.timing.resubscribe_interval, |t, q| {
                    transport.subscribe(t, q)
                });
        }
        Ok(())
    }

    // Publish

    pub fn publish(&mut self, topic: &str, payload: &str, qos: QoS, retain: bool) -> SessionResult<()> {
        let message = Message::new(topic, payload).with_qos(qos).retained(retain);
        self.publish_message(&message)
    }

    /// Publish a prepared message. Fails immediately when not connected.
    pub fn publish_message(&mut self, message: &Message) -> SessionResult<()> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected { state: self.state });
        }
        self.transport.publish(message)?;
        debug!(
            target: "mqtt_session",
            topic = %message.topic,
            qos = %message.qos,
            retain = message.retain,
            "Published message"
        );
        Ok(())
    }

    /// Build a JSON object with `builder` and publish it
    pub fn publish_json<F>(&mut self, topic: &str, builder: F, qos: QoS, retain: bool) -> SessionResult<()>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let payload = build_json(builder)?;
        self.publish(topic, &payload, qos, retain)
    }

    /// Forward a log line to the log topic.
    ///
    /// Returns `Ok(false)` when `level` is more verbose than the configured
    /// log level.
    pub fn publish_log(&mut self, level: Level, line: &str) -> SessionResult<bool> {
        let template = self
            .log_message
            .as_enabled()
            .ok_or(SessionError::FeatureDisabled("log message"))?;
        if level > self.log_level {
            return Ok(false);
        }
        let message = Message {
            payload: line.to_string(),
            ..template.clone()
        };
        self.publish_message(&message)?;
        Ok(true)
    }

    /// Publish the shutdown message, close the connection and stop reconnecting
    pub fn shutdown(&mut self) {
        if self.is_connected() {
            if let Some(message) = self.shutdown_message.as_enabled().cloned() {
                if let Err(e) = self.publish_message(&message) {
                    warn!(error = %e, "Failed to publish shutdown message");
                }
            }
        }
        if let Err(e) = self.transport.disconnect() {
            debug!(target: "mqtt_session", error = %e, "Transport disconnect failed");
        }

        self.stopped = true;
        self.transition(ConnectionState::Disconnected, Some(&DisconnectReason::ClientRequested));
        self.disconnect_reason = Some(DisconnectReason::ClientRequested);
        self.registry.reset();
        self.connected_since = None;
    }

    pub fn health_metrics(&self, now: Instant) -> HealthMetrics {
        calculate_health_metrics(
            self.connected_since,
            self.last_message_at,
            self.connection_count,
            self.disconnect_reason.clone(),
            now,
        )
    }

    /// Log the effective configuration
    pub fn dump_config(&self) {
        info!("MQTT:");
        info!("  Server Address: {}:{}", self.credentials.address, self.credentials.port);
        info!("  Username: {}", if self.credentials.username.is_some() { "[set]" } else { "[none]" });
        info!("  Client ID: {}", self.credentials.client_id());
        info!("  Keep alive: {}s", self.keep_alive_secs);
        info!("  Topic Prefix: {}", self.metadata.topic_prefix());
        info!("  TLS: {}", self.tls || !self.ssl_fingerprints.is_empty());
        info!("  TLS fingerprints: {}", self.ssl_fingerprints.len());
        log_feature("Birth message", self.metadata.birth_message());
        log_feature("Last will", self.metadata.last_will());
        log_feature("Shutdown message", &self.shutdown_message);
        log_feature("Log topic", &self.log_message);
        match self.metadata.discovery() {
            Feature::Enabled(info) => info!(
                "  Discovery prefix: '{}' retain: {} clean: {}",
                info.prefix, info.retain, info.clean
            ),
            Feature::Disabled => info!("  Discovery: disabled"),
        }
        match self.timing.reboot_timeout {
            Some(timeout) => info!("  Reboot timeout: {}s", timeout.as_secs()),
            None => info!("  Reboot timeout: disabled"),
        }
    }
}

fn log_feature(name: &str, message: &Feature<Message>) {
    match message {
        Feature::Enabled(m) => info!(
            "  {}: topic '{}' payload '{}' qos {} retain {}",
            name, m.topic, m.payload, m.qos, m.retain
        ),
        Feature::Disabled => info!("  {}: disabled", name),
    }
}

/// Run a JSON object builder and serialize the result
pub(crate) fn build_json<F>(builder: F) -> SessionResult<String>
where
    F: FnOnce(&mut Map<String, Value>),
{
    let mut root = Map::new();
    builder(&mut root);
    serde_json::to_string(&Value::Object(root)).map_err(SessionError::Serialization)
}
