//! Peripheral handle abstraction
//! The session drives the radio only through these traits, so any BLE stack
//! (or a test double) can sit underneath it.

use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::core::bluetooth::types::{ConnectionEvent, ConnectionState};
use crate::core::error::TransportError;

/// Payloads pushed by a subscribed characteristic, in arrival order.
pub type NotificationReceiver = mpsc::UnboundedReceiver<Vec<u8>>;

/// A service as enumerated during discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredService<C> {
    pub uuid: Uuid,
    pub characteristics: Vec<C>,
}

/// One characteristic handle of a connected peripheral.
#[async_trait::async_trait]
pub trait GattCharacteristic: Clone + Send + Sync + 'static {
    fn uuid(&self) -> Uuid;

    async fn read(&self) -> Result<Vec<u8>, TransportError>;

    async fn write(&self, value: &[u8], without_response: bool) -> Result<(), TransportError>;

    /// Enable notifications. Payloads arrive on the returned receiver until
    /// `unsubscribe` is called or the link drops.
    async fn subscribe(&self) -> Result<NotificationReceiver, TransportError>;

    async fn unsubscribe(&self) -> Result<(), TransportError>;
}

/// The connection handle of one physical device.
#[async_trait::async_trait]
pub trait Peripheral: Send + Sync + 'static {
    type Characteristic: GattCharacteristic;

    /// Current link state. The peripheral is the only authority on it.
    async fn state(&self) -> ConnectionState;

    /// Subscribe to link events. Only events sent after this call are seen.
    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent>;

    async fn connect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn discover_services(
        &self,
    ) -> Result<Vec<DiscoveredService<Self::Characteristic>>, TransportError>;
}
