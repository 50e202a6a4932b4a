//! Inbound message routing
//!
//! Delivers each received (topic, payload) pair to every subscription whose
//! topic is exactly equal, in registry order. A sink that fails does not stop
//! delivery to the others.

use super::registry::SubscriptionRegistry;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// Outcome of routing a single message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub matched: usize,
    pub failed: usize,
}

/// Pure routing decisions plus the dispatch loop
pub struct MessageRouter;

impl MessageRouter {
    /// Subscriptions match on exact topic equality only (pure function)
    pub fn topic_matches(subscription_topic: &str, topic: &str) -> bool {
        subscription_topic == topic
    }

    /// Invoke every matching sink synchronously
    pub fn dispatch(registry: &mut SubscriptionRegistry, topic: &str, payload: &str) -> DispatchReport {
        let mut report = DispatchReport::default();

        for subscription in registry.iter_mut() {
            if !Self::topic_matches(&subscription.topic, topic) {
                continue;
            }
            report.matched += 1;
            let sink = subscription.sink_mut();
            match panic::catch_unwind(AssertUnwindSafe(|| sink.handle(topic, payload))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(target: "mqtt_session", topic = %topic, error = %e, "Message handler failed");
                }
                Err(cause) => {
                    report.failed += 1;
                    warn!(
                        target: "mqtt_session",
                        topic = %topic,
                        panic = %panic_message(cause.as_ref()),
                        "Message handler panicked"
                    );
                }
            }
        }

        if report.matched == 0 {
            debug!(target: "mqtt_session", topic = %topic, "No subscription for message");
        }
        report
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> &str {
    if let Some(message) = cause.downcast_ref::<&str>() {
        message
    } else if let Some(message) = cause.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
