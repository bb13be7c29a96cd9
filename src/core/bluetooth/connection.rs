//! Bluetooth connection handling for SwitchBot devices
//! This module owns the link lifecycle: connecting, discovering and
//! subscribing, and tearing everything down again when the link drops.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::Fuse;
use log::{debug, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::core::bluetooth::characteristics::CharacteristicSet;
use crate::core::bluetooth::constants::SESSION_EVENT_CAPACITY;
use crate::core::bluetooth::notification::{NotificationSink, spawn_forwarder};
use crate::core::bluetooth::peripheral::{DiscoveredService, GattCharacteristic, Peripheral};
use crate::core::bluetooth::types::{
    ConnectionEvent, ConnectionState, SessionEvent, SessionOwnership,
};
use crate::core::error::{Activity, Error, Result};

/// Receiving end of the disconnect interrupt. Fused so it can be raced
/// again after a branch that did not take it.
type Interrupt = Fuse<oneshot::Receiver<()>>;

/// Per-cycle link slots. Everything here is created after a connect and
/// cleared by the teardown that follows the next disconnect.
struct Link<C> {
    characteristics: Option<CharacteristicSet<C>>,
    /// Fired by the teardown while discovery or subscription is pending
    interrupt: Option<oneshot::Sender<()>>,
    /// Cancels every task spawned for the current cycle
    listeners: Option<CancellationToken>,
    /// Cancels only the notification forwarder
    forwarder: Option<CancellationToken>,
    ownership: SessionOwnership,
    generation: u64,
}

impl<C> Link<C> {
    fn new() -> Self {
        Self {
            characteristics: None,
            interrupt: None,
            listeners: None,
            forwarder: None,
            ownership: SessionOwnership::default(),
            generation: 0,
        }
    }

    fn is_live(&self, generation: u64) -> bool {
        self.generation == generation && self.listeners.is_some()
    }
}

struct Shared<C> {
    link: Mutex<Link<C>>,
    sink: Arc<NotificationSink>,
    events: broadcast::Sender<SessionEvent>,
}

impl<C> Shared<C> {
    fn link(&self) -> MutexGuard<'_, Link<C>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clear the slots of a connect cycle. Runs at most once per cycle,
    /// whichever of the disconnect event or the explicit disconnect gets
    /// here first.
    fn teardown(&self, generation: u64) {
        let (interrupt, listeners) = {
            let mut link = self.link();
            if !link.is_live(generation) {
                return;
            }
            link.characteristics = None;
            link.forwarder = None;
            link.ownership = SessionOwnership::AutoManaged;
            (link.interrupt.take(), link.listeners.take())
        };

        if let Some(listeners) = listeners {
            listeners.cancel();
        }
        if let Some(interrupt) = interrupt {
            let _ = interrupt.send(());
        }
        self.sink.fail(Error::Disconnected);
        let _ = self.events.send(SessionEvent::Disconnected);
        info!("Connected state cleared, releasing characteristic handles.");
    }

    /// Drop the characteristic set of a link that is still up but no longer
    /// subscribed, so the next `ensure_connected` runs the handshake again.
    fn invalidate(&self, generation: u64) {
        let mut link = self.link();
        if link.generation != generation {
            return;
        }
        link.characteristics = None;
        if let Some(forwarder) = link.forwarder.take() {
            forwarder.cancel();
        }
    }

    /// Undo `arm_listeners` for a cycle whose connect never succeeded.
    fn disarm(&self, generation: u64) {
        let mut link = self.link();
        if link.generation == generation {
            if let Some(listeners) = link.listeners.take() {
                listeners.cancel();
            }
        }
    }
}

/// Connection manager for one peripheral
pub struct ConnectionManager<P: Peripheral> {
    peripheral: Arc<P>,
    shared: Arc<Shared<P::Characteristic>>,
    connect_timeout: Duration,
    discovery_timeout: Duration,
    subscribe_timeout: Duration,
}

impl<P: Peripheral> ConnectionManager<P> {
    pub fn new(peripheral: Arc<P>, sink: Arc<NotificationSink>, config: &SessionConfig) -> Self {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self {
            peripheral,
            shared: Arc::new(Shared {
                link: Mutex::new(Link::new()),
                sink,
                events,
            }),
            connect_timeout: config.connect_timeout(),
            discovery_timeout: config.discovery_timeout(),
            subscribe_timeout: config.write_timeout(),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        self.peripheral.state().await
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Characteristics of the current link, present only while connected.
    pub fn characteristics(&self) -> Option<CharacteristicSet<P::Characteristic>> {
        self.shared.link().characteristics.clone()
    }

    pub fn ownership(&self) -> SessionOwnership {
        self.shared.link().ownership
    }

    pub fn set_ownership(&self, ownership: SessionOwnership) {
        self.shared.link().ownership = ownership;
    }

    /// Bring the link up, discover the characteristics and subscribe to
    /// notifications. Returns immediately if that already happened.
    pub async fn ensure_connected(&self) -> Result<CharacteristicSet<P::Characteristic>> {
        let state = self.peripheral.state().await;
        match state {
            ConnectionState::Connecting => return Err(Error::Busy(Activity::Connecting)),
            ConnectionState::Disconnecting => return Err(Error::Busy(Activity::Disconnecting)),
            ConnectionState::Connected => {
                if let Some(set) = self.characteristics() {
                    debug!("Device already connected.");
                    return Ok(set);
                }
                info!("Link is up but not set up, running discovery on it");
            }
            ConnectionState::Disconnected => {}
        }

        let generation = self.arm_listeners();

        if state == ConnectionState::Disconnected {
            info!("Initiating connection...");
            match timeout(self.connect_timeout, self.peripheral.connect()).await {
                Ok(Ok(())) => info!("Connection successful, discovering services..."),
                Ok(Err(e)) => {
                    warn!("Connection attempt failed: {}", e);
                    self.shared.disarm(generation);
                    return Err(e.into());
                }
                Err(_) => {
                    warn!("Connection attempt timed out");
                    self.abort(generation).await;
                    return Err(Error::ConnectTimeout);
                }
            }
        }

        match self.handshake(generation).await {
            Ok(set) => {
                info!("Connection and setup process completed successfully");
                Ok(set)
            }
            Err(err) => {
                warn!("Setup failed: {}", err);
                // the link is already gone for these two
                if matches!(err, Error::DisconnectedDuringDiscovery | Error::Disconnected) {
                    self.shared.teardown(generation);
                } else {
                    self.abort(generation).await;
                }
                Err(err)
            }
        }
    }

    /// Explicit disconnect. Always hands ownership back to the session.
    pub async fn disconnect(&self) -> Result<()> {
        self.set_ownership(SessionOwnership::AutoManaged);
        self.release().await
    }

    /// Disconnect unless the caller opened the link through `connect`.
    pub async fn disconnect_if_implicit(&self) -> Result<()> {
        if self.ownership() == SessionOwnership::UserManaged {
            debug!("Link is user managed, keeping it up");
            return Ok(());
        }
        self.release().await
    }

    async fn release(&self) -> Result<()> {
        let generation = self.shared.link().generation;
        match self.peripheral.state().await {
            ConnectionState::Disconnected => {
                debug!("Device not connected");
                self.shared.teardown(generation);
                Ok(())
            }
            ConnectionState::Connecting => Err(Error::Busy(Activity::Connecting)),
            ConnectionState::Disconnecting => Err(Error::Busy(Activity::Disconnecting)),
            ConnectionState::Connected => {
                self.unsubscribe().await;
                info!("Disconnecting from device");
                if let Err(e) = self.peripheral.disconnect().await {
                    warn!("Disconnect failed, link stays up without notifications: {}", e);
                    self.shared.invalidate(generation);
                    return Err(e.into());
                }
                self.shared.teardown(generation);
                info!("Successfully disconnected");
                Ok(())
            }
        }
    }

    /// Stop forwarding notifications and disable them on the device.
    /// Failures are logged only.
    async fn unsubscribe(&self) {
        let notify = {
            let mut link = self.shared.link();
            if let Some(forwarder) = link.forwarder.take() {
                forwarder.cancel();
            }
            link.characteristics.as_ref().map(|set| set.notify.clone())
        };
        let Some(notify) = notify else {
            return;
        };
        match timeout(self.subscribe_timeout, notify.unsubscribe()).await {
            Ok(Ok(())) => debug!("Unsubscribed from notifications"),
            Ok(Err(e)) => warn!("Failed to unsubscribe from notifications: {}", e),
            Err(_) => warn!("Timed out unsubscribing from notifications"),
        }
    }

    /// Watch the peripheral for the disconnect event of a new cycle.
    fn arm_listeners(&self) -> u64 {
        // subscribe before connecting so no event is missed
        let mut events = self.peripheral.connection_events();
        let cancel_token = CancellationToken::new();
        let generation = {
            let mut link = self.shared.link();
            link.generation += 1;
            if let Some(stale) = link.listeners.replace(cancel_token.clone()) {
                stale.cancel();
            }
            link.generation
        };

        let shared = self.shared.clone();
        let peripheral = self.peripheral.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(ConnectionEvent::Disconnected) => {
                            info!("Peripheral disconnected");
                            shared.teardown(generation);
                            break;
                        }
                        Ok(ConnectionEvent::Connected) => debug!("Peripheral reported connect"),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Missed {} connection events", skipped);
                            if peripheral.state().await == ConnectionState::Disconnected {
                                info!("Peripheral disconnected while events were missed");
                                shared.teardown(generation);
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });
        generation
    }

    /// Discover, resolve and subscribe. A disconnect at any point of this
    /// fires the interrupt and ends the handshake early.
    async fn handshake(&self, generation: u64) -> Result<CharacteristicSet<P::Characteristic>> {
        let mut interrupted = {
            let mut link = self.shared.link();
            if !link.is_live(generation) {
                return Err(Error::DisconnectedDuringDiscovery);
            }
            let (tx, rx) = oneshot::channel();
            link.interrupt = Some(tx);
            rx.fuse()
        };

        let outcome = self.setup(generation, &mut interrupted).await;

        {
            let mut link = self.shared.link();
            if link.generation == generation {
                link.interrupt = None;
            }
        }
        outcome
    }

    async fn setup(
        &self,
        generation: u64,
        interrupted: &mut Interrupt,
    ) -> Result<CharacteristicSet<P::Characteristic>> {
        let services = self.discover(interrupted).await?;
        let set = CharacteristicSet::resolve(&services)?;

        info!("Subscribing to notifications...");
        let notifications = tokio::select! {
            result = timeout(self.subscribe_timeout, set.notify.subscribe()) => match result {
                Ok(result) => result?,
                Err(_) => return Err(Error::WriteTimeout),
            },
            Ok(()) = &mut *interrupted => return Err(Error::Disconnected),
        };

        let forwarder = {
            let mut link = self.shared.link();
            let token = match link.listeners.as_ref() {
                Some(listeners) if link.generation == generation => listeners.child_token(),
                _ => return Err(Error::Disconnected),
            };
            link.forwarder = Some(token.clone());
            link.characteristics = Some(set.clone());
            token
        };
        spawn_forwarder(notifications, self.shared.sink.clone(), forwarder);

        let _ = self.shared.events.send(SessionEvent::Connected);
        Ok(set)
    }

    /// Enumerate services, racing the enumeration against the discovery
    /// timeout and the disconnect interrupt.
    async fn discover(
        &self,
        interrupted: &mut Interrupt,
    ) -> Result<Vec<DiscoveredService<P::Characteristic>>> {
        tokio::select! {
            result = self.peripheral.discover_services() => result.map_err(Error::from),
            Ok(()) = &mut *interrupted => Err(Error::DisconnectedDuringDiscovery),
            _ = sleep(self.discovery_timeout) => Err(Error::DiscoveryTimeout),
        }
    }

    /// Request a disconnect after a failed setup step and clear the cycle.
    async fn abort(&self, generation: u64) {
        if self.peripheral.state().await != ConnectionState::Disconnected {
            info!("Requesting disconnect after failed setup");
            if let Err(e) = self.peripheral.disconnect().await {
                warn!("Cleanup disconnect failed: {}", e);
            }
        }
        self.shared.teardown(generation);
    }
}
