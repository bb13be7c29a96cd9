//! Defines shared data structures for the Bluetooth module.

use std::fmt;

/// Connection state as reported by the peripheral handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(label)
    }
}

/// Link events emitted by the peripheral handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}

/// Events a session publishes to its subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The link is up, characteristics are resolved and notifications flow
    Connected,
    /// The link went down, whether requested or not
    Disconnected,
}

/// Who owns the teardown of the current link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionOwnership {
    /// Opened through the public `connect`; stays up until `disconnect`
    UserManaged,
    /// Opened by an operation; released once the operation completes
    #[default]
    AutoManaged,
}
