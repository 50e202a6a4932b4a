//! Session lifecycle tests
//!
//! Drive a session through resolve, connect, disconnect and reconnect with
//! the mock transport and resolver, and check what reaches the transport.

use mqtt_session::session::{
    ConnectionState, Credentials, DependentComponent, Message, MqttSession, PublishOutbox, QoS,
    SessionOptions, Timing,
};
use mqtt_session::testing::{MockResolver, MockTransport};
use mqtt_session::transport::DisconnectReason;
use mqtt_session::{Feature, SessionError};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

const BROKER_IP: &str = "192.168.1.50";

struct Harness {
    session: MqttSession<MockTransport, MockResolver>,
    transport: MockTransport,
    resolver: MockResolver,
    now: Instant,
}

impl Harness {
    fn new() -> Self {
        Self::with_options(|_| {})
    }

    fn with_options(customize: impl FnOnce(&mut SessionOptions)) -> Self {
        let transport = MockTransport::new();
        let resolver = MockResolver::new();
        let mut options = SessionOptions::new(
            Credentials::new("broker.local", 1883, "livingroom"),
            "livingroom",
            "livingroom",
        );
        customize(&mut options);
        let session = MqttSession::new(options, transport.clone(), resolver.clone());
        Self {
            session,
            transport,
            resolver,
            now: Instant::now(),
        }
    }

    fn poll(&mut self) {
        self.session.poll(self.now);
    }

    fn advance(&mut self, by: Duration) {
        self.now += by;
        self.poll();
    }

    /// Run resolve + connect until the session reports connected
    fn connect(&mut self) {
        self.poll();
        if self.session.state() == ConnectionState::ResolvingAddress {
            self.resolver.answer(BROKER_IP.parse().unwrap());
            self.poll();
        }
        assert_eq!(self.session.state(), ConnectionState::Connecting);
        self.transport.accept_connection(false);
        self.poll();
        assert!(self.session.is_connected());
    }

    /// Drop the link and wait out the reconnect delay, then connect again.
    ///
    /// The delay counts from the start of the previous attempt, so the new
    /// lookup may already be running when the disconnect is processed.
    fn reconnect(&mut self) {
        self.transport.drop_connection(DisconnectReason::TcpDisconnected);
        self.poll();
        assert!(!self.session.is_connected());
        self.now += Duration::from_secs(5);
        self.connect();
    }
}

#[test]
fn test_full_connect_sequence() {
    let mut h = Harness::new();
    assert_eq!(h.session.state(), ConnectionState::Disconnected);

    h.poll();
    assert_eq!(h.session.state(), ConnectionState::ResolvingAddress);
    assert_eq!(h.resolver.lookups(), vec!["broker.local".to_string()]);

    h.resolver.answer(BROKER_IP.parse().unwrap());
    h.poll();
    assert_eq!(h.session.state(), ConnectionState::Connecting);
    assert_eq!(h.transport.connects().len(), 1);
    assert_eq!(h.transport.connects()[0].ip.to_string(), BROKER_IP);

    h.transport.accept_connection(false);
    h.poll();
    assert_eq!(h.session.state(), ConnectionState::Connected);
}

#[test]
fn test_dns_failure_retries_after_delay() {
    let mut h = Harness::new();
    h.poll();
    h.resolver.fail("NXDOMAIN");
    h.poll();
    assert_eq!(h.session.state(), ConnectionState::Disconnected);

    h.advance(Duration::from_secs(1));
    assert_eq!(h.session.state(), ConnectionState::Disconnected);
    assert_eq!(h.resolver.lookups().len(), 1);

    h.advance(Duration::from_secs(4));
    assert_eq!(h.session.state(), ConnectionState::ResolvingAddress);
    assert_eq!(h.resolver.lookups().len(), 2);
}

#[test]
fn test_birth_message_published_once_per_connection() {
    let mut h = Harness::new();
    h.connect();
    h.advance(Duration::from_millis(16));
    h.advance(Duration::from_millis(16));

    let births = h.transport.published_to("livingroom/status");
    assert_eq!(births.len(), 1);
    assert_eq!(births[0].payload, "online");
    assert!(births[0].retain);

    h.reconnect();
    h.advance(Duration::from_millis(16));

    assert_eq!(h.transport.published_to("livingroom/status").len(), 2);
}

#[test]
fn test_each_subscription_requested_once_per_connection() {
    let mut h = Harness::new();
    h.session
        .subscribe("livingroom/light/set", |_, _| {}, QoS::AtLeastOnce)
        .unwrap();
    h.session
        .subscribe("livingroom/fan/set", |_, _| {}, QoS::AtMostOnce)
        .unwrap();
    assert!(h.transport.subscribes().is_empty());

    h.connect();
    for _ in 0..5 {
        h.advance(Duration::from_secs(2));
    }
    assert_eq!(
        h.transport.subscribes(),
        vec![
            ("livingroom/light/set".to_string(), QoS::AtLeastOnce),
            ("livingroom/fan/set".to_string(), QoS::AtMostOnce),
        ]
    );

    h.reconnect();
    assert_eq!(h.transport.subscribes().len(), 4);
}

#[test]
fn test_subscribe_while_connected_goes_out_immediately() {
    let mut h = Harness::new();
    h.connect();

    h.session
        .subscribe("livingroom/scene", |_, _| {}, QoS::AtMostOnce)
        .unwrap();
    assert_eq!(h.transport.subscribes().len(), 1);

    h.advance(Duration::from_secs(2));
    assert_eq!(h.transport.subscribes().len(), 1);
}

#[test]
fn test_subscribe_while_connected_uses_session_clock() {
    let mut h = Harness::new();
    h.connect();
    h.transport.refuse_subscribe(true);
    h.advance(Duration::from_secs(3600));

    h.session.subscribe("a/b", |_, _| {}, QoS::AtMostOnce).unwrap();
    let entry = h.session.subscriptions().iter().last().unwrap();
    assert_eq!(entry.resubscribe_timeout, Some(h.now));

    // Retried one interval later on the same clock
    h.transport.refuse_subscribe(false);
    h.advance(Duration::from_millis(999));
    assert!(h.transport.subscribes().is_empty());
    h.advance(Duration::from_millis(1));
    assert_eq!(h.transport.subscribes().len(), 1);
}

#[test]
fn test_refused_subscribe_is_retried_after_interval() {
    let mut h = Harness::new();
    h.session.subscribe("a/b", |_, _| {}, QoS::AtMostOnce).unwrap();
    h.transport.refuse_subscribe(true);
    h.connect();
    assert_eq!(h.session.subscriptions().pending(), 1);

    h.transport.refuse_subscribe(false);
    h.advance(Duration::from_millis(500));
    assert!(h.transport.subscribes().is_empty());

    h.advance(Duration::from_millis(500));
    assert_eq!(h.transport.subscribes().len(), 1);
    assert_eq!(h.session.subscriptions().pending(), 0);
}

#[test]
fn test_inbound_messages_use_exact_match() {
    let mut h = Harness::new();
    let received = Rc::new(RefCell::new(Vec::new()));

    let sink = received.clone();
    h.session
        .subscribe(
            "t",
            move |topic, payload| sink.borrow_mut().push(format!("{topic}={payload}")),
            QoS::AtMostOnce,
        )
        .unwrap();

    h.connect();
    h.transport.deliver("t/sub", "x");
    h.transport.deliver("t", "y");
    h.poll();

    assert_eq!(*received.borrow(), vec!["t=y".to_string()]);
}

#[test]
fn test_every_matching_callback_runs_in_order() {
    let mut h = Harness::new();
    let log = Rc::new(RefCell::new(Vec::new()));

    for name in ["first", "second"] {
        let log = log.clone();
        h.session
            .subscribe("t", move |_, _| log.borrow_mut().push(name), QoS::AtMostOnce)
            .unwrap();
    }

    h.connect();
    h.transport.deliver("t", "go");
    h.poll();

    assert_eq!(*log.borrow(), vec!["first", "second"]);
}

#[test]
fn test_panicking_callback_does_not_lose_later_messages() {
    let mut h = Harness::new();
    let seen = Rc::new(RefCell::new(Vec::new()));

    h.session
        .subscribe(
            "t",
            |_, payload| {
                if payload == "boom" {
                    panic!("callback failed on {payload}");
                }
            },
            QoS::AtMostOnce,
        )
        .unwrap();
    let sink = seen.clone();
    h.session
        .subscribe("t", move |_, payload| sink.borrow_mut().push(payload.to_string()), QoS::AtMostOnce)
        .unwrap();

    h.connect();
    h.transport.deliver("t", "boom");
    h.transport.deliver("t", "after");
    h.poll();

    assert_eq!(*seen.borrow(), vec!["boom".to_string(), "after".to_string()]);
    assert!(h.session.is_connected());
}

#[test]
fn test_json_subscription_drops_malformed_payloads() {
    let mut h = Harness::new();
    let calls = Rc::new(RefCell::new(Vec::new()));

    let sink = calls.clone();
    h.session
        .subscribe_json(
            "livingroom/light/set",
            move |_, root| sink.borrow_mut().push(root.get("a").cloned()),
            QoS::AtMostOnce,
        )
        .unwrap();

    h.connect();
    h.transport.deliver("livingroom/light/set", "{\"a\":1}");
    h.transport.deliver("livingroom/light/set", "not json");
    h.poll();

    assert_eq!(*calls.borrow(), vec![Some(serde_json::Value::from(1))]);
}

#[test]
fn test_publish_while_disconnected_fails_without_transport_call() {
    let mut h = Harness::new();
    let result = h.session.publish("livingroom/x", "1", QoS::AtMostOnce, false);

    assert!(matches!(
        result,
        Err(SessionError::NotConnected {
            state: ConnectionState::Disconnected
        })
    ));
    assert!(h.transport.published().is_empty());
}

#[test]
fn test_publish_and_publish_json_when_connected() {
    let mut h = Harness::new();
    h.connect();
    h.transport.clear_history();

    h.session
        .publish("livingroom/temp", "21.5", QoS::AtLeastOnce, true)
        .unwrap();
    h.session
        .publish_json(
            "livingroom/state",
            |root| {
                root.insert("on".to_string(), serde_json::Value::Bool(true));
            },
            QoS::AtMostOnce,
            false,
        )
        .unwrap();

    let published = h.transport.published();
    assert_eq!(published.len(), 2);
    assert_eq!(
        published[0],
        Message::new("livingroom/temp", "21.5")
            .with_qos(QoS::AtLeastOnce)
            .retained(true)
    );
    assert_eq!(published[1].payload, "{\"on\":true}");
}

#[test]
fn test_transport_backpressure_is_reported() {
    let mut h = Harness::new();
    h.connect();
    h.transport.refuse_publish(true);

    let error = h
        .session
        .publish("a", "b", QoS::AtMostOnce, false)
        .unwrap_err();
    assert!(error.is_retryable());
}

#[test]
fn test_disabling_discovery() {
    let mut h = Harness::new();
    assert!(h.session.is_discovery_enabled());
    assert!(h.session.get_availability().is_enabled());

    h.session.disable_discovery();
    assert!(!h.session.is_discovery_enabled());
    assert_eq!(h.session.get_discovery_info(), &Feature::Disabled);
    assert_eq!(h.session.get_availability(), &Feature::Disabled);
    assert_eq!(h.session.discovery_topic("switch", "relay"), None);
}

#[test]
fn test_availability_follows_birth_and_will() {
    let mut h = Harness::new();
    let availability = h.session.get_availability().as_enabled().cloned().unwrap();
    assert_eq!(availability.topic, "livingroom/status");

    h.session.set_birth_message(Message::new("livingroom/alive", "yes"));
    assert!(!h.session.get_availability().is_enabled());

    h.session.set_last_will(Message::new("livingroom/alive", "no"));
    let availability = h.session.get_availability().as_enabled().cloned().unwrap();
    assert_eq!(availability.payload_available, "yes");
    assert_eq!(availability.payload_not_available, "no");
}

#[test]
fn test_last_will_change_applies_to_next_attempt() {
    let mut h = Harness::new();
    h.connect();
    h.session.set_last_will(Message::new("livingroom/lwt", "gone"));
    h.reconnect();

    let connects = h.transport.connects();
    assert_eq!(connects[0].last_will.as_ref().unwrap().topic, "livingroom/status");
    assert_eq!(connects[1].last_will.as_ref().unwrap().topic, "livingroom/lwt");
}

#[test]
fn test_disabled_birth_message_is_not_published() {
    let mut h = Harness::with_options(|options| options.birth_message = Feature::Disabled);
    h.connect();
    h.advance(Duration::from_millis(16));

    assert!(h.transport.published().is_empty());
    assert!(!h.session.get_availability().is_enabled());
}

#[test]
fn test_connect_timeout_then_reconnect() {
    let mut h = Harness::new();
    h.poll();
    h.resolver.answer(BROKER_IP.parse().unwrap());
    h.poll();
    assert_eq!(h.session.state(), ConnectionState::Connecting);

    h.advance(Duration::from_secs(60));
    assert_eq!(h.session.state(), ConnectionState::Disconnected);
    assert_eq!(h.transport.disconnects(), 1);

    // A late CONNACK for the abandoned attempt is ignored
    h.transport.accept_connection(false);
    h.poll();
    assert_eq!(h.session.state(), ConnectionState::ResolvingAddress);
}

#[test]
fn test_can_proceed_and_reboot_timeout() {
    let mut h = Harness::with_options(|options| {
        options.timing = Timing {
            reboot_timeout: Some(Duration::from_secs(30)),
            ..Timing::default()
        };
    });
    let start = h.now;
    h.poll();
    assert!(!h.session.can_proceed(start));
    assert!(!h.session.reboot_due(start + Duration::from_secs(29)));

    assert!(h.session.can_proceed(start + Duration::from_secs(30)));
    assert!(h.session.reboot_due(start + Duration::from_secs(30)));
}

#[test]
fn test_can_proceed_once_connected() {
    let mut h = Harness::new();
    h.connect();
    assert!(h.session.can_proceed(h.now));
    assert!(!h.session.reboot_due(h.now + Duration::from_secs(3600)));
}

#[test]
fn test_reboot_timeout_disabled() {
    let mut h = Harness::with_options(|options| options.timing.reboot_timeout = None);
    h.poll();
    let later = h.now + Duration::from_secs(86_400);
    assert!(!h.session.can_proceed(later));
    assert!(!h.session.reboot_due(later));
}

#[test]
fn test_literal_ip_skips_lookup() {
    let transport = MockTransport::new();
    let resolver = MockResolver::new();
    let options = SessionOptions::new(Credentials::new(BROKER_IP, 1883, "node"), "node", "node");
    let mut session = MqttSession::new(options, transport.clone(), resolver.clone());

    session.poll(Instant::now());
    assert!(resolver.lookups().is_empty());
    assert_eq!(session.state(), ConnectionState::Connecting);
}

#[test]
fn test_shutdown_publishes_and_stops() {
    let mut h = Harness::new();
    h.connect();
    h.transport.clear_history();

    h.session.shutdown();
    let published = h.transport.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "livingroom/status");
    assert_eq!(published[0].payload, "offline");
    assert_eq!(h.transport.disconnects(), 1);
    assert_eq!(h.session.state(), ConnectionState::Disconnected);

    h.advance(Duration::from_secs(60));
    assert_eq!(h.session.state(), ConnectionState::Disconnected);
    assert!(h.transport.connects().is_empty());
}

#[test]
fn test_publish_log_respects_level() {
    let mut h = Harness::new();
    h.connect();
    h.transport.clear_history();
    h.session.set_log_level(tracing::Level::INFO);

    assert!(h.session.publish_log(tracing::Level::WARN, "disk low").unwrap());
    assert!(!h.session.publish_log(tracing::Level::DEBUG, "noise").unwrap());

    let published = h.transport.published_to("livingroom/debug");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].payload, "disk low");

    h.session.disable_log_message();
    assert!(matches!(
        h.session.publish_log(tracing::Level::ERROR, "x"),
        Err(SessionError::FeatureDisabled(_))
    ));
}

struct StateReporter {
    reports: u32,
}

impl DependentComponent for StateReporter {
    fn component_name(&self) -> &str {
        "state-reporter"
    }

    fn on_connected(&mut self, outbox: &mut dyn PublishOutbox) {
        self.reports += 1;
        outbox.publish(Message::new("livingroom/sensor/state", self.reports.to_string()));
    }
}

#[test]
fn test_components_republish_after_birth_on_every_connect() {
    let mut h = Harness::new();
    h.session.register_component(Box::new(StateReporter { reports: 0 }));
    h.connect();
    h.advance(Duration::from_millis(16));

    let topics: Vec<String> = h.transport.published().into_iter().map(|m| m.topic).collect();
    assert_eq!(topics, vec!["livingroom/status", "livingroom/sensor/state"]);

    h.reconnect();
    let states = h.transport.published_to("livingroom/sensor/state");
    assert_eq!(states.len(), 2);
    assert_eq!(states[1].payload, "2");
}

#[test]
fn test_health_metrics() {
    let mut h = Harness::new();
    h.connect();
    h.transport.deliver("anything", "x");
    h.advance(Duration::from_secs(10));

    let metrics = h.session.health_metrics(h.now);
    assert_eq!(metrics.connection_count, 1);
    assert_eq!(metrics.uptime, Some(Duration::from_secs(10)));
    assert_eq!(metrics.time_since_last_message, Some(Duration::ZERO));
    assert!(metrics.is_healthy);

    h.transport.drop_connection(DisconnectReason::ServerUnavailable);
    h.poll();
    let metrics = h.session.health_metrics(h.now);
    assert!(!metrics.is_healthy);
    assert_eq!(
        metrics.last_disconnect_reason,
        Some(DisconnectReason::ServerUnavailable)
    );
}

#[test]
fn test_client_id_truncated() {
    let mut h = Harness::new();
    h.session.set_client_id("a-very-long-client-identifier-0123456789");
    assert_eq!(h.session.credentials().client_id().chars().count(), 23);
    h.connect();
    assert_eq!(
        h.transport.connects()[0].credentials.client_id(),
        "a-very-long-client-iden"
    );
}
