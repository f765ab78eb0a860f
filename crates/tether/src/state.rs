//! Connection state types.

use std::fmt;

/// Observable state of a reliable socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// A connection attempt is in flight.
    Connecting,
    /// Connected; sends go straight to the socket.
    Open,
    /// Disconnected, a reconnect timer is pending.
    AwaitingRetry,
    /// Shutdown requested, waiting for the socket to finish closing.
    ShuttingDown,
    /// Terminal. No socket, no timers.
    Closed,
}

impl ConnectionState {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::AwaitingRetry => "awaiting_retry",
            Self::ShuttingDown => "shutting_down",
            Self::Closed => "closed",
        }
    }

    /// Whether the agent has stopped for good.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
