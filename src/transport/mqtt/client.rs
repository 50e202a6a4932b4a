//! Impure I/O for the rumqttc-backed transport
//!
//! Each connection attempt gets its own `AsyncClient` and a tokio task that
//! polls the event loop and turns what it sees into [`SessionEvent`]s. The
//! session decides when to reconnect, so a task ends on the first connection
//! error instead of letting rumqttc retry on its own.

use super::connection::{configure_mqtt_options, disconnect_reason_for, wire_qos};
use super::message_handler::{EventRoute, MessageHandler};
use crate::session::model::{Message, QoS};
use crate::transport::{ConnectParams, EventSender, SessionEvent, Transport, TransportError};
use bytes::Bytes;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the request channel between `AsyncClient` and its event loop
const REQUEST_CAPACITY: usize = 32;

const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

struct ActiveConnection {
    client: AsyncClient,
    /// Set once the session has moved on; the task then stops reporting
    detached: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// [`Transport`] backed by rumqttc's MQTT v5 client
pub struct RumqttTransport {
    runtime: Handle,
    active: Option<ActiveConnection>,
}

impl RumqttTransport {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            active: None,
        }
    }

    /// Use the runtime the caller is running on
    pub fn from_current() -> Result<Self, TransportError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    fn client(&self) -> Result<&AsyncClient, TransportError> {
        self.active
            .as_ref()
            .map(|active| &active.client)
            .ok_or(TransportError::NotConnected)
    }

    /// Stop listening to the current connection and let it wind down
    fn detach(&mut self) {
        if let Some(active) = self.active.take() {
            active.detached.store(true, Ordering::SeqCst);
            if let Err(e) = active.client.try_disconnect() {
                debug!(target: "mqtt_transport", error = %e, "Disconnect request not queued");
                active.handle.abort();
                return;
            }
            // Give the event loop a moment to flush DISCONNECT before stopping it
            let handle = active.handle;
            self.runtime.spawn(async move {
                tokio::time::sleep(DISCONNECT_GRACE).await;
                handle.abort();
            });
        }
    }

    async fn run_event_loop(mut event_loop: EventLoop, events: EventSender, detached: Arc<AtomicBool>) {
        loop {
            let result = event_loop.poll().await;
            if detached.load(Ordering::SeqCst) {
                if result.is_err() {
                    break;
                }
                continue;
            }

            match result {
                Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                    EventRoute::Forward(session_event) => {
                        if let SessionEvent::Message { topic, .. } = &session_event {
                            debug!(target: "mqtt_transport", %topic, "Received MQTT message");
                        }
                        events.send(session_event);
                    }
                    EventRoute::Terminal(session_event) => {
                        events.send(session_event);
                        break;
                    }
                    EventRoute::Ignore => {}
                },
                Err(e) => {
                    warn!(error = %e, "MQTT event loop error");
                    events.disconnected(disconnect_reason_for(&e));
                    break;
                }
            }
        }
        debug!(target: "mqtt_transport", "MQTT event loop stopped");
    }
}

impl Transport for RumqttTransport {
    fn connect(&mut self, params: &ConnectParams, events: &EventSender) -> Result<(), TransportError> {
        self.detach();

        let options = configure_mqtt_options(params);
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let detached = Arc::new(AtomicBool::new(false));

        let handle = self.runtime.spawn(Self::run_event_loop(
            event_loop,
            events.clone(),
            detached.clone(),
        ));
        info!(client_id = %params.credentials.client_id(), "Started MQTT event loop");

        self.active = Some(ActiveConnection {
            client,
            detached,
            handle,
        });
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.client()?
            .try_subscribe(topic, wire_qos(qos))
            .map_err(|e| {
                debug!(target: "mqtt_transport", error = %e, "Subscribe request not queued");
                TransportError::QueueFull
            })
    }

    fn publish(&mut self, message: &Message) -> Result<(), TransportError> {
        self.client()?
            .try_publish(
                message.topic.as_str(),
                wire_qos(message.qos),
                message.retain,
                Bytes::copy_from_slice(message.payload.as_bytes()),
            )
            .map_err(|e| {
                debug!(target: "mqtt_transport", error = %e, "Publish request not queued");
                TransportError::QueueFull
            })
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.detach();
        Ok(())
    }
}

impl Drop for RumqttTransport {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.handle.abort();
        }
    }
}
