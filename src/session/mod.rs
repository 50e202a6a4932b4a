//! MQTT client session
//!
//! The session owns the broker connection lifecycle, the subscription
//! registry and the derived availability/discovery metadata. It performs no
//! I/O of its own: see [`crate::transport`] for the seams it drives.

pub mod client;
pub mod health;
pub mod metadata;
pub mod model;
pub mod outbox;
pub mod registry;
pub mod router;
pub mod state;

pub use client::{MqttSession, SessionOptions};
pub use health::HealthMetrics;
pub use metadata::MetadataEngine;
pub use model::{Availability, Credentials, DiscoveryInfo, Feature, Message, QoS};
pub use outbox::{DependentComponent, PublishOutbox, QueuedOutbox};
pub use registry::{CallbackSink, JsonSink, MessageSink, SinkError, Subscription, SubscriptionRegistry};
pub use router::{DispatchReport, MessageRouter};
pub use state::{ConnectionState, Lifecycle, Step, Timing};
