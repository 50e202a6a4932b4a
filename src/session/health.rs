//! Connection health figures for diagnostics

use crate::transport::DisconnectReason;
use std::time::{Duration, Instant};

/// Inbound silence after which a live connection is reported unhealthy
pub const MESSAGE_SILENCE_LIMIT: Duration = Duration::from_secs(300);

/// Snapshot of connection health
#[derive(Debug, Clone, PartialEq)]
pub struct HealthMetrics {
    /// Time since the current connection was established
    pub uptime: Option<Duration>,
    /// Time since the last inbound message
    pub time_since_last_message: Option<Duration>,
    /// Number of connections established so far
    pub connection_count: u32,
    pub last_disconnect_reason: Option<DisconnectReason>,
    pub is_healthy: bool,
}

/// Build a snapshot from raw timestamps (pure function)
pub fn calculate_health_metrics(
    connected_since: Option<Instant>,
    last_message_at: Option<Instant>,
    connection_count: u32,
    last_disconnect_reason: Option<DisconnectReason>,
    now: Instant,
) -> HealthMetrics {
    let uptime = connected_since.map(|t| now.saturating_duration_since(t));
    let time_since_last_message = last_message_at.map(|t| now.saturating_duration_since(t));

    HealthMetrics {
        uptime,
        time_since_last_message,
        connection_count,
        last_disconnect_reason,
        is_healthy: determine_health_status(uptime, time_since_last_message),
    }
}

fn determine_health_status(uptime: Option<Duration>, time_since_last_message: Option<Duration>) -> bool {
    match (uptime, time_since_last_message) {
        (Some(_), None) => true,
        (Some(_), Some(silence)) => silence < MESSAGE_SILENCE_LIMIT,
        _ => false,
    }
}
