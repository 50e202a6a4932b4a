//! MQTT client session manager
//!
//! A single-owner, poll-driven MQTT session for small networked devices. It
//! keeps one broker connection alive through a resolve/connect/reconnect
//! state machine, re-establishes subscriptions after every reconnect, routes
//! inbound messages to callbacks by exact topic, and derives Home Assistant
//! availability and discovery metadata from its configuration.
//!
//! # Overview
//!
//! - [`session`] - the session, its state machine, registry and metadata
//! - [`transport`] - the transport/resolver seams and their rumqttc/tokio adapters
//! - [`automation`] - message triggers and templated publish actions
//! - [`config`] - TOML configuration
//! - [`observability`] - tracing setup
//! - [`testing`] - mock transport and resolver
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_session::session::{Credentials, MqttSession, QoS, SessionOptions};
//! use mqtt_session::testing::{MockResolver, MockTransport};
//! use std::time::Instant;
//!
//! let transport = MockTransport::new();
//! let options = SessionOptions::new(Credentials::new("10.0.0.2", 1883, "kitchen"), "kitchen", "kitchen");
//! let mut session = MqttSession::new(options, transport.clone(), MockResolver::new());
//!
//! session
//!     .subscribe("kitchen/light/set", |_topic, payload| println!("light -> {payload}"), QoS::AtMostOnce)
//!     .unwrap();
//!
//! session.poll(Instant::now()); // starts connecting
//! transport.accept_connection(false);
//! session.poll(Instant::now()); // connected: subscribe + birth message
//!
//! assert!(session.is_connected());
//! assert_eq!(transport.published_to("kitchen/status")[0].payload, "online");
//! ```

pub mod automation;
pub mod config;
pub mod error;
pub mod observability;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, SessionConfig};
pub use error::{SessionError, SessionResult};
pub use session::{ConnectionState, Feature, Message, MqttSession, QoS, SessionOptions};
pub use transport::mqtt::RumqttTransport;
pub use transport::resolver::TokioResolver;
