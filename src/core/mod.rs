//! Core functionality for SwitchBot device sessions

pub mod bluetooth;
pub mod error;

// Re-export commonly used types
pub use bluetooth::{DeviceIdentity, DeviceSession, Model};
pub use error::{Activity, Error, Result, TransportError};
