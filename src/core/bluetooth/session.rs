//! Device session for SwitchBot devices
//! This module provides the public request/response interface. Every
//! operation connects first and releases the link afterwards unless the
//! caller opened it explicitly.

use std::future::Future;
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::{Mutex, broadcast};

use crate::config::SessionConfig;
use crate::core::bluetooth::characteristics::CharacteristicSet;
use crate::core::bluetooth::commands::CommandChannel;
use crate::core::bluetooth::connection::ConnectionManager;
use crate::core::bluetooth::constants::{DEVICE_NAME_MAX_BYTES, DEVICE_NAME_MIN_BYTES};
use crate::core::bluetooth::device::DeviceIdentity;
use crate::core::bluetooth::gatt;
use crate::core::bluetooth::notification::NotificationSink;
use crate::core::bluetooth::peripheral::Peripheral;
use crate::core::bluetooth::types::{ConnectionState, SessionEvent, SessionOwnership};
use crate::core::error::{Activity, Error, Result};

/// Sequential session with one SwitchBot device
pub struct DeviceSession<P: Peripheral> {
    identity: DeviceIdentity,
    connection: ConnectionManager<P>,
    commands: CommandChannel,
    config: SessionConfig,
    /// Held for the whole of each public operation
    operation: Mutex<()>,
}

impl<P: Peripheral> DeviceSession<P> {
    pub fn new(identity: DeviceIdentity, peripheral: P) -> Self {
        Self::with_config(identity, peripheral, SessionConfig::default())
    }

    pub fn with_config(identity: DeviceIdentity, peripheral: P, config: SessionConfig) -> Self {
        let sink = Arc::new(NotificationSink::new());
        let connection = ConnectionManager::new(Arc::new(peripheral), sink.clone(), &config);
        let commands = CommandChannel::new(sink, config.write_timeout(), config.command_timeout());
        Self {
            identity,
            connection,
            commands,
            config,
            operation: Mutex::new(()),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub async fn state(&self) -> ConnectionState {
        self.connection.state().await
    }

    pub fn ownership(&self) -> SessionOwnership {
        self.connection.ownership()
    }

    /// Link events. `Disconnected` is sent for every teardown, requested or not.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.connection.subscribe_events()
    }

    /// Open the link and keep it open across operations until `disconnect`.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.begin()?;
        info!("Connecting to {} ({})", self.identity.address(), self.identity.model());
        self.connection.set_ownership(SessionOwnership::UserManaged);
        match self.connection.ensure_connected().await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.connection.set_ownership(SessionOwnership::AutoManaged);
                Err(e)
            }
        }
    }

    pub async fn disconnect(&self) -> Result<()> {
        let _guard = self.begin()?;
        self.connection.disconnect().await
    }

    /// Read the device name.
    pub async fn get_device_name(&self) -> Result<String> {
        let read_timeout = self.config.read_timeout();
        self.bracketed(|set| async move {
            let raw = gatt::read(&set.device, read_timeout).await?;
            Ok(String::from_utf8_lossy(&raw).into_owned())
        })
        .await
    }

    /// Write the device name. It must be 1 to 100 bytes of UTF-8.
    pub async fn set_device_name(&self, name: &str) -> Result<()> {
        validate_device_name(name)?;
        let write_timeout = self.config.write_timeout();
        self.bracketed(|set| async move {
            gatt::write(&set.device, name.as_bytes(), write_timeout).await
        })
        .await
    }

    /// Send a raw command and return the device's response.
    pub async fn send_command(&self, request: &[u8]) -> Result<Vec<u8>> {
        self.bracketed(|set| async move { self.commands.exchange(&set, request).await })
            .await
    }

    fn begin(&self) -> Result<tokio::sync::MutexGuard<'_, ()>> {
        self.operation
            .try_lock()
            .map_err(|_| Error::Busy(Activity::Operation))
    }

    /// connect → action → disconnect-if-implicit. A failed action still
    /// releases the link; the cleanup's own failure is only logged so the
    /// action's error is the one returned.
    async fn bracketed<T, F, Fut>(&self, action: F) -> Result<T>
    where
        F: FnOnce(CharacteristicSet<P::Characteristic>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _guard = self.begin()?;
        let set = self.connection.ensure_connected().await?;
        match action(set).await {
            Ok(value) => {
                self.connection.disconnect_if_implicit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(cleanup) = self.connection.disconnect_if_implicit().await {
                    warn!("Disconnect after failed operation also failed: {}", cleanup);
                }
                Err(err)
            }
        }
    }
}

fn validate_device_name(name: &str) -> Result<()> {
    let len = name.len();
    if !(DEVICE_NAME_MIN_BYTES..=DEVICE_NAME_MAX_BYTES).contains(&len) {
        return Err(Error::InvalidArgument(format!(
            "device name must be {} to {} bytes, got {}",
            DEVICE_NAME_MIN_BYTES, DEVICE_NAME_MAX_BYTES, len
        )));
    }
    Ok(())
}
