//! Connection Lifecycle States
//!
//! Owned exclusively by the connection manager; everything else observes
//! the current value through a watch channel.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of the single logical feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection has been attempted yet, or the first attempt failed.
    #[default]
    Disconnected,
    /// First handshake in progress.
    Connecting,
    /// Socket open, subscriptions replayed, heartbeat running.
    Connected,
    /// Connection lost; waiting out backoff or retrying the handshake.
    Reconnecting,
    /// Terminal. Reached by `close()` or by exhausting reconnect attempts.
    Closed,
}

impl ConnectionState {
    /// Whether `next` is a legal successor of `self`.
    ///
    /// `Closed` is terminal and reachable from every other state.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Closed, _) => false,
            (_, Self::Closed)
            | (Self::Disconnected, Self::Connecting)
            | (Self::Connecting, Self::Connected | Self::Disconnected)
            | (Self::Connected | Self::Reconnecting, Self::Reconnecting)
            | (Self::Reconnecting, Self::Connected) => true,
            _ => false,
        }
    }

    /// Whether outbound frames may be written right now.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether the state is terminal.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Lowercase name for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }

    /// Numeric encoding for the connection state gauge.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Reconnecting => 3.0,
            Self::Closed => 4.0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::ConnectionState::{self, *};

    #[test_case(Disconnected, Connecting, true)]
    #[test_case(Connecting, Connected, true)]
    #[test_case(Connecting, Disconnected, true)]
    #[test_case(Connected, Reconnecting, true)]
    #[test_case(Reconnecting, Reconnecting, true)]
    #[test_case(Reconnecting, Connected, true)]
    #[test_case(Reconnecting, Closed, true)]
    #[test_case(Connected, Closed, true)]
    #[test_case(Disconnected, Closed, true)]
    #[test_case(Disconnected, Connected, false)]
    #[test_case(Connected, Connecting, false)]
    #[test_case(Closed, Connecting, false)]
    #[test_case(Closed, Closed, false)]
    fn transitions(from: ConnectionState, to: ConnectionState, legal: bool) {
        assert_eq!(from.can_transition_to(to), legal);
    }

    #[test]
    fn only_connected_is_writable() {
        assert!(Connected.is_writable());
        assert!(!Reconnecting.is_writable());
        assert!(!Closed.is_writable());
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Reconnecting).unwrap(),
            "\"reconnecting\""
        );
    }
}
