//! Publish/subscribe exposed as automation primitives
//!
//! Triggers turn inbound messages into callbacks; actions publish messages
//! whose fields are either fixed or computed from the automation context `C`
//! at the moment the action runs. Both talk to the session through the
//! [`MessagePublisher`] and [`MessageSubscriber`] capabilities so they can be
//! exercised without a broker.

use crate::error::SessionResult;
use crate::session::client::{build_json, MqttSession};
use crate::session::model::{Message, QoS};
use crate::session::registry::{CallbackSink, JsonSink, MessageSink};
use crate::transport::{Resolver, Transport};
use serde_json::{Map, Value};
use std::fmt;
use tracing::debug;

/// Anything that can publish a prepared message
pub trait MessagePublisher {
    fn publish_message(&mut self, message: &Message) -> SessionResult<()>;
}

/// Anything that can register a subscription sink
pub trait MessageSubscriber {
    fn subscribe_sink(&mut self, topic: &str, qos: QoS, sink: Box<dyn MessageSink>) -> SessionResult<()>;
}

impl<T: Transport, R: Resolver> MessagePublisher for MqttSession<T, R> {
    fn publish_message(&mut self, message: &Message) -> SessionResult<()> {
        MqttSession::publish_message(self, message)
    }
}

impl<T: Transport, R: Resolver> MessageSubscriber for MqttSession<T, R> {
    fn subscribe_sink(&mut self, topic: &str, qos: QoS, sink: Box<dyn MessageSink>) -> SessionResult<()> {
        MqttSession::subscribe_sink(self, topic, qos, sink)
    }
}

/// A value that is fixed up front or computed from the context when used
pub enum Templatable<V, C> {
    Static(V),
    Lambda(Box<dyn Fn(&C) -> V>),
}

impl<V: Clone, C> Templatable<V, C> {
    pub fn lambda<F>(f: F) -> Self
    where
        F: Fn(&C) -> V + 'static,
    {
        Templatable::Lambda(Box::new(f))
    }

    pub fn value(&self, context: &C) -> V {
        match self {
            Templatable::Static(value) => value.clone(),
            Templatable::Lambda(f) => f(context),
        }
    }
}

impl<V, C> From<V> for Templatable<V, C> {
    fn from(value: V) -> Self {
        Templatable::Static(value)
    }
}

impl<V: fmt::Debug, C> fmt::Debug for Templatable<V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Templatable::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Templatable::Lambda(_) => f.write_str("Lambda(..)"),
        }
    }
}

/// Fires when a message arrives on an exact topic
pub struct MessageTrigger {
    topic: String,
    qos: QoS,
    payload: Option<String>,
    callbacks: Vec<Box<dyn FnMut(&str)>>,
}

impl MessageTrigger {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            qos: QoS::AtMostOnce,
            payload: None,
            callbacks: Vec::new(),
        }
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Only fire when the payload equals `payload`
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn on_message<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&str) + 'static,
    {
        self.callbacks.push(Box::new(callback));
        self
    }

    /// Register the trigger with `subscriber`
    pub fn attach(self, subscriber: &mut dyn MessageSubscriber) -> SessionResult<()> {
        let MessageTrigger {
            topic,
            qos,
            payload,
            mut callbacks,
        } = self;

        let sink = CallbackSink::new(move |topic: &str, received: &str| {
            if payload.as_deref().is_some_and(|expected| expected != received) {
                debug!(target: "mqtt_session", %topic, "Trigger payload filter did not match");
                return;
            }
            for callback in callbacks.iter_mut() {
                callback(received);
            }
        });
        subscriber.subscribe_sink(&topic, qos, Box::new(sink))
    }
}

/// Fires with the parsed object when a JSON message arrives on an exact topic
pub struct JsonMessageTrigger {
    topic: String,
    qos: QoS,
    callbacks: Vec<Box<dyn FnMut(&Map<String, Value>)>>,
}

impl JsonMessageTrigger {
    pub fn new(topic: impl Into<String>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            qos,
            callbacks: Vec::new(),
        }
    }

    pub fn on_message<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&Map<String, Value>) + 'static,
    {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub fn attach(self, subscriber: &mut dyn MessageSubscriber) -> SessionResult<()> {
        let mut callbacks = self.callbacks;
        let sink = JsonSink::new(move |_: &str, root: &Map<String, Value>| {
            for callback in callbacks.iter_mut() {
                callback(root);
            }
        });
        subscriber.subscribe_sink(&self.topic, self.qos, Box::new(sink))
    }
}

/// Publishes one message per run, with every field templatable
pub struct PublishAction<C> {
    topic: Templatable<String, C>,
    payload: Templatable<String, C>,
    qos: Templatable<QoS, C>,
    retain: Templatable<bool, C>,
}

impl<C> PublishAction<C> {
    pub fn new(topic: impl Into<Templatable<String, C>>) -> Self {
        Self {
            topic: topic.into(),
            payload: Templatable::Static(String::new()),
            qos: Templatable::Static(QoS::AtMostOnce),
            retain: Templatable::Static(false),
        }
    }

    pub fn set_payload(mut self, payload: impl Into<Templatable<String, C>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn set_qos(mut self, qos: impl Into<Templatable<QoS, C>>) -> Self {
        self.qos = qos.into();
        self
    }

    pub fn set_retain(mut self, retain: impl Into<Templatable<bool, C>>) -> Self {
        self.retain = retain.into();
        self
    }

    /// Evaluate every field against `context` and publish
    pub fn play(&self, publisher: &mut dyn MessagePublisher, context: &C) -> SessionResult<()> {
        let message = Message::new(self.topic.value(context), self.payload.value(context))
            .with_qos(self.qos.value(context))
            .retained(self.retain.value(context));
        publisher.publish_message(&message)
    }
}

type JsonBuilder<C> = Box<dyn Fn(&C, &mut Map<String, Value>)>;

/// Publishes a JSON object assembled by a builder closure
pub struct PublishJsonAction<C> {
    topic: Templatable<String, C>,
    builder: JsonBuilder<C>,
    qos: Templatable<QoS, C>,
    retain: Templatable<bool, C>,
}

impl<C> PublishJsonAction<C> {
    pub fn new<F>(topic: impl Into<Templatable<String, C>>, builder: F) -> Self
    where
        F: Fn(&C, &mut Map<String, Value>) + 'static,
    {
        Self {
            topic: topic.into(),
            builder: Box::new(builder),
            qos: Templatable::Static(QoS::AtMostOnce),
            retain: Templatable::Static(false),
        }
    }

    pub fn set_qos(mut self, qos: impl Into<Templatable<QoS, C>>) -> Self {
        self.qos = qos.into();
        self
    }

    pub fn set_retain(mut self, retain: impl Into<Templatable<bool, C>>) -> Self {
        self.retain = retain.into();
        self
    }

    pub fn play(&self, publisher: &mut dyn MessagePublisher, context: &C) -> SessionResult<()> {
        let payload = build_json(|root| (self.builder)(context, root))?;
        let message = Message::new(self.topic.value(context), payload)
            .with_qos(self.qos.value(context))
            .retained(self.retain.value(context));
        publisher.publish_message(&message)
    }
}
