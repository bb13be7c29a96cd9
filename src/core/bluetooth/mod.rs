//! Bluetooth functionality for SwitchBot devices
//! This module handles the BLE side of a session: finding the device,
//! managing the link and exchanging commands over GATT.

mod bluest_peripheral;
mod characteristics;
mod commands;
mod connection;
pub mod constants;
mod device;
mod gatt;
#[cfg(test)]
mod mock;
mod notification;
mod peripheral;
pub mod scanner;
mod session;
mod types;

// Re-export types that should be publicly accessible
pub use bluest_peripheral::{BluestCharacteristic, BluestPeripheral};
pub use characteristics::CharacteristicSet;
pub use device::{DeviceIdentity, Model};
pub use peripheral::{DiscoveredService, GattCharacteristic, NotificationReceiver, Peripheral};
pub use session::DeviceSession;
pub use types::{ConnectionEvent, ConnectionState, SessionEvent, SessionOwnership};
