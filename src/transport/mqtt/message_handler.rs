//! Pure routing of rumqttc events into session events

use crate::transport::{DisconnectReason, SessionEvent};
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::Event;

/// Outcome of looking at one event loop event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Forward this to the session
    Forward(SessionEvent),
    /// The connection is finished; forward and stop polling
    Terminal(SessionEvent),
    /// Nothing the session cares about
    Ignore,
}

/// Message routing decisions for the rumqttc event loop
pub struct MessageHandler;

impl MessageHandler {
    /// Route an MQTT event (pure function)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => EventRoute::Forward(SessionEvent::Connected {
                session_present: ack.session_present,
            }),
            Event::Incoming(Packet::Publish(publish)) => EventRoute::Forward(SessionEvent::Message {
                topic: String::from_utf8_lossy(&publish.topic).to_string(),
                payload: String::from_utf8_lossy(&publish.payload).to_string(),
            }),
            Event::Incoming(Packet::Disconnect(_)) => EventRoute::Terminal(SessionEvent::Disconnected(
                DisconnectReason::Other("disconnected by broker".to_string()),
            )),
            _ => EventRoute::Ignore,
        }
    }
}
