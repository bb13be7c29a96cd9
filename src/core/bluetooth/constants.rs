//! Constants used throughout the session layer
//! GATT identifiers of the SwitchBot device family and the default timeouts
//! applied at every point where the session waits on the radio.

use uuid::Uuid;

/// The UUID of the SwitchBot primary service
pub const UUID_PRIMARY_SERVICE: Uuid = Uuid::from_u128(0xcba20d00_224d_11e6_9fb8_0002a5d5c51b);

/// The UUID of the characteristic commands are written to
pub const UUID_WRITE_CHAR: Uuid = Uuid::from_u128(0xcba20002_224d_11e6_9fb8_0002a5d5c51b);

/// The UUID of the characteristic command responses are notified on
pub const UUID_NOTIFY_CHAR: Uuid = Uuid::from_u128(0xcba20003_224d_11e6_9fb8_0002a5d5c51b);

/// Standard Bluetooth Device Name characteristic (0x2A00)
pub const UUID_DEVICE_NAME: Uuid = Uuid::from_u128(0x00002a00_0000_1000_8000_00805f9b34fb);

/// Service data UUIDs SwitchBot devices advertise their model under
pub const UUID_SERVICE_DATA_LEGACY: Uuid = Uuid::from_u128(0x00000d00_0000_1000_8000_00805f9b34fb);
pub const UUID_SERVICE_DATA: Uuid = Uuid::from_u128(0x0000fd3d_0000_1000_8000_00805f9b34fb);

/// Timeout for establishing the link in milliseconds
pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Timeout for service and characteristic discovery in milliseconds
pub const DISCOVERY_TIMEOUT_MS: u64 = 5000;

/// Timeout for a characteristic read in milliseconds
pub const READ_TIMEOUT_MS: u64 = 3000;

/// Timeout for a characteristic write in milliseconds
pub const WRITE_TIMEOUT_MS: u64 = 3000;

/// Timeout for a command response notification in milliseconds
pub const COMMAND_TIMEOUT_MS: u64 = 3000;

/// Bounds for the device name, in UTF-8 bytes
pub const DEVICE_NAME_MIN_BYTES: usize = 1;
pub const DEVICE_NAME_MAX_BYTES: usize = 100;

/// Capacity of the session event broadcast channel
pub const SESSION_EVENT_CAPACITY: usize = 16;

/// Default scan duration in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 10;
