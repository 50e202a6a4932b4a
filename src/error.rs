//! Error types for the public session API
//!
//! Nothing in the session is fatal: every failure either degrades to "retry on
//! the next poll" or is handed back to the caller as one of these variants.

use crate::session::state::ConnectionState;
use crate::transport::TransportError;
use thiserror::Error;

/// Errors returned by session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Not connected - current state: {state}")]
    NotConnected { state: ConnectionState },

    #[error("{0} is disabled")]
    FeatureDisabled(&'static str),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Serialization error")]
    Serialization(#[source] serde_json::Error),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),
}

impl SessionError {
    /// Whether the operation may succeed once the connection is back
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::NotConnected { .. }
                | SessionError::Transport(TransportError::QueueFull)
                | SessionError::Transport(TransportError::NotConnected)
        )
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            SessionError::NotConnected {
                state: ConnectionState::Disconnected,
            },
            SessionError::FeatureDisabled("log message"),
            SessionError::Transport(TransportError::QueueFull),
            SessionError::InvalidTopic("a/#".to_string()),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_not_connected_mentions_state() {
        let error = SessionError::NotConnected {
            state: ConnectionState::ResolvingAddress,
        };
        assert_eq!(
            error.to_string(),
            "Not connected - current state: resolving address"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(SessionError::NotConnected {
            state: ConnectionState::Connecting
        }
        .is_retryable());
        assert!(SessionError::Transport(TransportError::QueueFull).is_retryable());
        assert!(!SessionError::InvalidTopic("#".to_string()).is_retryable());
        assert!(!SessionError::FeatureDisabled("shutdown message").is_retryable());
    }
}
