//! Live telemetry streaming.
//!
//! A [`StreamConnection`] owns one network stream and feeds raw text frames
//! to a handler. The [`StreamManager`] keeps a registry of named channels,
//! each backed by one connection, and hands out replay-one subscriptions.
//! Reconnecting after a failure is the consumer's job, see [`Reconnector`].

pub mod connection;
pub mod decode;
pub mod manager;
pub mod reconnect;
pub mod transport;

use serde::{Deserialize, Serialize};
use std::fmt;

// Re-export commonly used items
pub use connection::{FrameHandler, StreamConnection};
pub use decode::decode_int;
pub use manager::{StreamManager, Subscription};
pub use reconnect::{Backoff, ReconnectPolicy, Reconnector};
pub use transport::{Frame, FrameStream, Transport, WebSocketTransport};

/// Well-known channel names published by the telemetry backend.
pub mod channels {
    pub const PULSE: &str = "pulse";
    pub const MAX_PULSE: &str = "max_pulse";
    pub const MIN_PULSE: &str = "min_pulse";
    pub const STEPS: &str = "steps";
    pub const CALORIES: &str = "calories";
}

/// Lifecycle state of one channel's connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed(FailureReason),
}

impl ConnectionState {
    /// Whether a connection attempt is in flight or established.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// Why a connection ended up in [`ConnectionState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Refused, reset, or any other transport error
    Transport(String),
    /// The connect attempt did not finish in time
    Timeout,
    /// The remote end closed the stream
    ClosedByPeer,
    /// The handshake was rejected for our credential
    Unauthorized,
}

impl FailureReason {
    /// Retrying with the same credential cannot succeed for this reason.
    pub fn needs_reauthentication(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "{}", msg),
            Self::Timeout => write!(f, "connect timed out"),
            Self::ClosedByPeer => write!(f, "closed by peer"),
            Self::Unauthorized => write!(f, "unauthorized"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_activity() {
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::Connected.is_active());
        assert!(!ConnectionState::Disconnected.is_active());
        assert!(!ConnectionState::Failed(FailureReason::Timeout).is_active());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_state_display() {
        let state = ConnectionState::Failed(FailureReason::Transport("connection refused".into()));
        assert_eq!(state.to_string(), "failed (connection refused)");
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&ConnectionState::Failed(FailureReason::ClosedByPeer)).unwrap();
        assert_eq!(json, r#"{"state":"failed","reason":"closed_by_peer"}"#);
        let json = serde_json::to_string(&ConnectionState::Connected).unwrap();
        assert_eq!(json, r#"{"state":"connected"}"#);
    }
}
