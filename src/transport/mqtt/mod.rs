//! rumqttc-backed MQTT transport
//!
//! - [`connection`] - pure translation of connect parameters and errors
//! - [`message_handler`] - pure routing of event loop events
//! - [`client`] - the impure [`RumqttTransport`] and its event loop task
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_session::session::{Credentials, MqttSession, SessionOptions};
//! use mqtt_session::transport::mqtt::RumqttTransport;
//! use mqtt_session::transport::resolver::TokioResolver;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let options = SessionOptions::new(Credentials::new("broker.local", 1883, "kitchen"), "kitchen", "kitchen");
//! let mut session = MqttSession::new(
//!     options,
//!     RumqttTransport::from_current()?,
//!     TokioResolver::from_current()?,
//! );
//! session.poll(std::time::Instant::now());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::RumqttTransport;
pub use connection::configure_mqtt_options;
pub use message_handler::{EventRoute, MessageHandler};
