//! Transport and resolver seams
//!
//! The session never talks to the network itself. Outbound requests go through
//! the [`Transport`] and [`Resolver`] traits and return immediately; their
//! completions come back later as [`SessionEvent`]s pushed onto the session's
//! queue through an [`EventSender`]. The session drains that queue on its next
//! poll, so every state change happens on the polling context.

use crate::session::model::{Credentials, Message, QoS};
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;
pub mod resolver;

/// Outbound transport failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("Outbound queue is full")]
    QueueFull,
    #[error("Transport is not connected")]
    NotConnected,
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("I/O error: {0}")]
    Io(String),
}

/// Everything the transport needs to open a connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectParams {
    /// Address produced by the resolver
    pub ip: IpAddr,
    pub credentials: Credentials,
    pub keep_alive_secs: u16,
    pub last_will: Option<Message>,
    /// Broker URL asked for a secure scheme (`mqtts://`, `ssl://`)
    pub tls: bool,
    /// SHA1 fingerprints; when non-empty only TLS connections are allowed
    pub ssl_fingerprints: Vec<[u8; 20]>,
    pub clean_session: bool,
}

impl ConnectParams {
    pub fn requires_tls(&self) -> bool {
        self.tls || !self.ssl_fingerprints.is_empty()
    }
}

/// Outbound side of the MQTT transport. All calls are fire-and-forget.
pub trait Transport {
    /// Start connecting. Success or failure arrives later as a
    /// [`SessionEvent::Connected`] or [`SessionEvent::Disconnected`].
    fn connect(
        &mut self,
        params: &ConnectParams,
        events: &EventSender,
    ) -> Result<(), TransportError>;

    /// Queue a subscribe request
    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    /// Queue a publish request
    fn publish(&mut self, message: &Message) -> Result<(), TransportError>;

    /// Close the connection, if any
    fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Asynchronous host name lookup
pub trait Resolver {
    /// Begin resolving `host`. The outcome arrives as [`SessionEvent::Resolved`]
    /// or [`SessionEvent::ResolutionFailed`].
    fn resolve(&mut self, host: &str, events: &EventSender);
}

/// Why the broker connection went away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    TcpDisconnected,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    MalformedCredentials,
    NotAuthorized,
    TlsBadFingerprint,
    ConnectTimeout,
    ClientRequested,
    Other(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::TcpDisconnected => write!(f, "TCP disconnected"),
            DisconnectReason::UnacceptableProtocolVersion => {
                write!(f, "unacceptable protocol version")
            }
            DisconnectReason::IdentifierRejected => write!(f, "client id rejected"),
            DisconnectReason::ServerUnavailable => write!(f, "server unavailable"),
            DisconnectReason::MalformedCredentials => write!(f, "malformed credentials"),
            DisconnectReason::NotAuthorized => write!(f, "not authorized"),
            DisconnectReason::TlsBadFingerprint => write!(f, "TLS fingerprint mismatch"),
            DisconnectReason::ConnectTimeout => write!(f, "connect timed out"),
            DisconnectReason::ClientRequested => write!(f, "disconnect requested"),
            DisconnectReason::Other(reason) => write!(f, "{reason}"),
        }
    }
}

/// Completions delivered by the transport and the resolver
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Resolved(IpAddr),
    ResolutionFailed(String),
    Connected { session_present: bool },
    Disconnected(DisconnectReason),
    Message { topic: String, payload: String },
}

/// Cloneable handle that collaborators use to queue [`SessionEvent`]s
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }

    /// Queue an event. Events sent after the session is dropped are discarded.
    pub fn send(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!(target: "mqtt_session", "Session gone, dropping event");
        }
    }

    pub fn resolved(&self, ip: IpAddr) {
        self.send(SessionEvent::Resolved(ip));
    }

    pub fn resolution_failed(&self, reason: impl Into<String>) {
        self.send(SessionEvent::ResolutionFailed(reason.into()));
    }

    pub fn connected(&self, session_present: bool) {
        self.send(SessionEvent::Connected { session_present });
    }

    pub fn disconnected(&self, reason: DisconnectReason) {
        self.send(SessionEvent::Disconnected(reason));
    }

    pub fn message(&self, topic: impl Into<String>, payload: impl Into<String>) {
        self.send(SessionEvent::Message {
            topic: topic.into(),
            payload: payload.into(),
        });
    }
}

/// Create the queue a session drains on every poll
pub(crate) fn event_channel() -> (EventSender, mpsc::UnboundedReceiver<SessionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender::new(tx), rx)
}
