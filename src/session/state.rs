//! Pure connection state management
//!
//! The state enum, the timing knobs that drive retries, and the pure
//! functions deciding what the next step of the lifecycle should be. No I/O
//! happens here; [`super::client::MqttSession`] applies the decisions.

use crate::transport::DisconnectReason;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Lifecycle of the single broker connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    ResolvingAddress,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::ResolvingAddress => "resolving address",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Retry cadence and escalation limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    /// `None` disables the reboot escalation
    pub reboot_timeout: Option<Duration>,
    /// Minimum gap between the starts of two connection attempts
    pub reconnect_delay: Duration,
    pub resolve_timeout: Duration,
    pub connect_timeout: Duration,
    /// Minimum gap between two subscribe requests for the same entry
    pub resubscribe_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            reboot_timeout: Some(Duration::from_secs(300)),
            reconnect_delay: Duration::from_millis(5000),
            resolve_timeout: Duration::from_millis(20000),
            connect_timeout: Duration::from_millis(60000),
            resubscribe_interval: Duration::from_millis(1000),
        }
    }
}

impl Timing {
    pub fn validate(&self) -> Result<(), String> {
        if self.resolve_timeout.is_zero() {
            return Err("resolve_timeout must be greater than 0".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// What the poll loop should do for the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing to do yet
    Wait,
    /// Begin a new connection attempt with address resolution
    StartResolve,
    /// Address lookup took too long; treat it as failed
    ResolveTimedOut,
    /// Broker never confirmed the connection; tear it down
    ConnectTimedOut,
    /// Connection is up; run the per-connection work
    Service,
}

/// Pure transition decisions for the connection lifecycle
pub struct Lifecycle;

impl Lifecycle {
    /// Decide the next step from the current state and how long the current
    /// attempt has been running (pure function)
    pub fn next_step(
        state: ConnectionState,
        attempt_started: Option<Instant>,
        timing: &Timing,
        now: Instant,
    ) -> Step {
        let elapsed = attempt_started.map(|started| now.saturating_duration_since(started));
        match state {
            ConnectionState::Disconnected => match elapsed {
                None => Step::StartResolve,
                Some(elapsed) if elapsed >= timing.reconnect_delay => Step::StartResolve,
                Some(_) => Step::Wait,
            },
            ConnectionState::ResolvingAddress => match elapsed {
                Some(elapsed) if elapsed >= timing.resolve_timeout => Step::ResolveTimedOut,
                _ => Step::Wait,
            },
            ConnectionState::Connecting => match elapsed {
                Some(elapsed) if elapsed >= timing.connect_timeout => Step::ConnectTimedOut,
                _ => Step::Wait,
            },
            ConnectionState::Connected => Step::Service,
        }
    }

    /// A literal IP address needs no lookup (pure function)
    pub fn literal_address(address: &str) -> Option<IpAddr> {
        address.parse().ok()
    }

    /// Whether a resolver completion still belongs to the current attempt
    pub fn accepts_resolution(state: ConnectionState) -> bool {
        state == ConnectionState::ResolvingAddress
    }

    /// Whether a connected event still belongs to the current attempt
    pub fn accepts_connected(state: ConnectionState) -> bool {
        state == ConnectionState::Connecting
    }

    /// Whether a disconnect event changes anything
    pub fn accepts_disconnect(state: ConnectionState) -> bool {
        matches!(
            state,
            ConnectionState::Connecting | ConnectionState::Connected
        )
    }

    /// Startup gate for dependent components (pure function).
    ///
    /// Fails open: once the reboot timeout has passed since the first attempt,
    /// startup proceeds even without a broker.
    pub fn can_proceed(
        state: ConnectionState,
        first_attempt: Option<Instant>,
        timing: &Timing,
        now: Instant,
    ) -> bool {
        if state == ConnectionState::Connected {
            return true;
        }
        match (timing.reboot_timeout, first_attempt) {
            (Some(timeout), Some(first)) => now.saturating_duration_since(first) >= timeout,
            _ => false,
        }
    }

    /// Whether the host should restart the device (pure function)
    pub fn reboot_due(
        state: ConnectionState,
        last_connected_or_first_attempt: Option<Instant>,
        timing: &Timing,
        now: Instant,
    ) -> bool {
        if state == ConnectionState::Connected {
            return false;
        }
        match (timing.reboot_timeout, last_connected_or_first_attempt) {
            (Some(timeout), Some(since)) => now.saturating_duration_since(since) >= timeout,
            _ => false,
        }
    }

    /// Log a state transition
    pub fn log_transition(
        from: ConnectionState,
        to: ConnectionState,
        reason: Option<&DisconnectReason>,
    ) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!("MQTT connected");
            }
            (ConnectionState::Connected, ConnectionState::Disconnected) => match reason {
                Some(reason) => warn!(%reason, "MQTT disconnected"),
                None => warn!("MQTT disconnected"),
            },
            (_, ConnectionState::Disconnected) => match reason {
                Some(reason) => warn!(%reason, "MQTT connection attempt failed"),
                None => warn!(from = %from, "MQTT connection attempt failed"),
            },
            _ => {
                info!("MQTT connection state: {} -> {}", from, to);
            }
        }
    }
}
