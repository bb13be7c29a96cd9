//! Error types surfaced by device sessions

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// A failure reported by the BLE stack underneath the session.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<bluest::Error> for TransportError {
    fn from(err: bluest::Error) -> Self {
        Self(err.to_string())
    }
}

/// What kept the session from accepting a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// The peripheral is mid-way through connecting
    Connecting,
    /// The peripheral is mid-way through disconnecting
    Disconnecting,
    /// Another session operation is in flight
    Operation,
    /// A command is still waiting for its response
    AwaitingResponse,
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Disconnecting => f.write_str("disconnecting"),
            Self::Operation => f.write_str("running another operation"),
            Self::AwaitingResponse => f.write_str("awaiting a command response"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("device is {0}, wait a few seconds then try again")]
    Busy(Activity),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("timed out connecting to the device")]
    ConnectTimeout,

    #[error("failed to discover services and characteristics: timeout")]
    DiscoveryTimeout,

    #[error("failed to discover services and characteristics: disconnected")]
    DisconnectedDuringDiscovery,

    #[error("service not found: {0}")]
    ServiceNotFound(Uuid),

    #[error("characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    #[error("timed out reading characteristic")]
    ReadTimeout,

    #[error("timed out writing characteristic")]
    WriteTimeout,

    #[error("timed out waiting for command response")]
    CommandTimeout,

    #[error("device disconnected while a command was pending")]
    Disconnected,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, Error>;
