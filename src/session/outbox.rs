//! Dependent components and the outbox they publish through
//!
//! Components never hold the session. When the broker connection comes up the
//! session hands each registered component an outbox; whatever it queues is
//! published right after the birth message.

use super::model::Message;

/// Object-safe sink for publish requests made by dependent components
pub trait PublishOutbox {
    fn publish(&mut self, message: Message);
}

/// Outbox that simply collects the queued messages
#[derive(Debug, Default)]
pub struct QueuedOutbox {
    messages: Vec<Message>,
}

impl QueuedOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

impl PublishOutbox for QueuedOutbox {
    fn publish(&mut self, message: Message) {
        self.messages.push(message);
    }
}

/// A module that depends on the broker connection, such as a sensor that
/// re-sends its state after every reconnect
pub trait DependentComponent {
    fn component_name(&self) -> &str;

    /// Called once per established connection, after the birth message
    fn on_connected(&mut self, outbox: &mut dyn PublishOutbox);
}
