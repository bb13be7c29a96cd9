//! Peripheral handle backed by the `bluest` BLE stack

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use bluest::{Adapter, Characteristic, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::constants::SESSION_EVENT_CAPACITY;
use crate::core::bluetooth::peripheral::{
    DiscoveredService, GattCharacteristic, NotificationReceiver, Peripheral,
};
use crate::core::bluetooth::types::{ConnectionEvent, ConnectionState};
use crate::core::error::TransportError;

type Transition = Arc<Mutex<Option<ConnectionState>>>;

/// Marks a connect or disconnect as in progress until dropped, including
/// when the surrounding future is cancelled by a timeout.
struct TransitionGuard {
    transition: Transition,
}

impl TransitionGuard {
    fn enter(transition: &Transition, state: ConnectionState) -> Self {
        *transition.lock().unwrap_or_else(PoisonError::into_inner) = Some(state);
        Self {
            transition: transition.clone(),
        }
    }
}

impl Drop for TransitionGuard {
    fn drop(&mut self) {
        *self.transition.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

pub struct BluestPeripheral {
    adapter: Adapter,
    device: Device,
    transition: Transition,
    events: broadcast::Sender<ConnectionEvent>,
    watcher: CancellationToken,
}

impl BluestPeripheral {
    /// Wrap a discovered device. Must be called inside a tokio runtime, the
    /// adapter's connection events are forwarded from a spawned task.
    pub fn new(adapter: Adapter, device: Device) -> Self {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        let watcher = CancellationToken::new();

        let events_for_task = events.clone();
        let cancel_token = watcher.clone();
        let adapter_for_task = adapter.clone();
        let device_for_task = device.clone();
        tokio::spawn(async move {
            Self::forward_connection_events(
                adapter_for_task,
                device_for_task,
                events_for_task,
                cancel_token,
            )
            .await;
        });

        Self {
            adapter,
            device,
            transition: Arc::new(Mutex::new(None)),
            events,
            watcher,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    async fn forward_connection_events(
        adapter: Adapter,
        device: Device,
        events: broadcast::Sender<ConnectionEvent>,
        cancel_token: CancellationToken,
    ) {
        let mut stream = match adapter.device_connection_events(&device).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to watch connection events of {}: {}", device.id(), e);
                return;
            }
        };

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                event = stream.next() => match event {
                    Some(bluest::ConnectionEvent::Connected) => {
                        let _ = events.send(ConnectionEvent::Connected);
                    }
                    Some(bluest::ConnectionEvent::Disconnected) => {
                        let _ = events.send(ConnectionEvent::Disconnected);
                    }
                    None => {
                        info!("Connection event stream has ended.");
                        break;
                    }
                },
            }
        }
    }
}

impl Drop for BluestPeripheral {
    fn drop(&mut self) {
        self.watcher.cancel();
    }
}

#[async_trait::async_trait]
impl Peripheral for BluestPeripheral {
    type Characteristic = BluestCharacteristic;

    async fn state(&self) -> ConnectionState {
        let transition = *self.transition.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = transition {
            return state;
        }
        if self.device.is_connected().await {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let _transition = TransitionGuard::enter(&self.transition, ConnectionState::Connecting);
        info!("Initiating connection to {}...", self.device.id());
        self.adapter.connect_device(&self.device).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let _transition = TransitionGuard::enter(&self.transition, ConnectionState::Disconnecting);
        info!("Disconnecting from device {}", self.device.id());
        self.adapter.disconnect_device(&self.device).await?;
        Ok(())
    }

    async fn discover_services(
        &self,
    ) -> Result<Vec<DiscoveredService<BluestCharacteristic>>, TransportError> {
        let services = self.device.discover_services().await?;
        let mut discovered = Vec::with_capacity(services.len());
        for service in services {
            debug!("Available service: {}", service.uuid());
            let characteristics = service
                .discover_characteristics()
                .await?
                .into_iter()
                .map(BluestCharacteristic::new)
                .collect();
            discovered.push(DiscoveredService {
                uuid: service.uuid(),
                characteristics,
            });
        }
        Ok(discovered)
    }
}

/// Characteristic handle with its notification subscription.
#[derive(Clone)]
pub struct BluestCharacteristic {
    inner: Characteristic,
    subscription: SubscriptionSlot,
}

impl BluestCharacteristic {
    fn new(inner: Characteristic) -> Self {
        Self {
            inner,
            subscription: Arc::new(Mutex::new(None)),
        }
    }

    /// Owns the notify stream; dropping the stream disables notifications.
    async fn process_notifications(
        characteristic: Characteristic,
        ready: Ready,
        payloads: mpsc::UnboundedSender<Vec<u8>>,
        cancel_token: CancellationToken,
    ) {
        let uuid = characteristic.uuid();
        let subscribed = tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Subscription to {} abandoned", uuid);
                return;
            }
            subscribed = characteristic.notify() => subscribed,
        };
        let mut stream = match subscribed {
            Ok(stream) => {
                let _ = ready.send(Ok(()));
                stream
            }
            Err(e) => {
                let _ = ready.send(Err(e.into()));
                return;
            }
        };

        info!("Listening for notifications on {}", uuid);
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                item = stream.next() => match item {
                    Some(Ok(value)) => {
                        debug!("Received notification: {:02x?}", value);
                        if payloads.send(value).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!("Error in notification stream: {}", e);
                        break;
                    }
                    None => break,
                },
            }
        }
        info!("Notification stream ended");
    }
}

type SubscriptionSlot = Arc<Mutex<Option<CancellationToken>>>;
type Ready = oneshot::Sender<Result<(), TransportError>>;

fn replace_subscription(slot: &SubscriptionSlot, token: Option<CancellationToken>) {
    let previous = {
        let mut subscription = slot.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *subscription, token)
    };
    if let Some(previous) = previous {
        previous.cancel();
    }
}

/// Spawn the task that owns a subscription and wait for it to report whether
/// notifications are on. Dropping this future before then cancels the task.
async fn start_subscription<T, Fut>(
    slot: &SubscriptionSlot,
    task: T,
) -> Result<NotificationReceiver, TransportError>
where
    T: FnOnce(Ready, mpsc::UnboundedSender<Vec<u8>>, CancellationToken) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (ready_tx, ready_rx) = oneshot::channel();
    let (payload_tx, payload_rx) = mpsc::unbounded_channel();
    let cancel_token = CancellationToken::new();
    replace_subscription(slot, Some(cancel_token.clone()));

    let pending = cancel_token.clone().drop_guard();
    tokio::spawn(task(ready_tx, payload_tx, cancel_token));

    let outcome = ready_rx.await;
    pending.disarm();
    match outcome {
        Ok(Ok(())) => Ok(payload_rx),
        Ok(Err(e)) => {
            warn!("Failed to subscribe to notifications: {}", e);
            replace_subscription(slot, None);
            Err(e)
        }
        Err(_) => {
            replace_subscription(slot, None);
            Err(TransportError::new("notification task ended before subscribing"))
        }
    }
}

#[async_trait::async_trait]
impl GattCharacteristic for BluestCharacteristic {
    fn uuid(&self) -> Uuid {
        self.inner.uuid()
    }

    async fn read(&self) -> Result<Vec<u8>, TransportError> {
        Ok(self.inner.read().await?)
    }

    async fn write(&self, value: &[u8], without_response: bool) -> Result<(), TransportError> {
        if without_response {
            self.inner.write_without_response(value).await?;
        } else {
            self.inner.write(value).await?;
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<NotificationReceiver, TransportError> {
        let characteristic = self.inner.clone();
        start_subscription(&self.subscription, move |ready, payloads, cancel_token| {
            Self::process_notifications(characteristic, ready, payloads, cancel_token)
        })
        .await
    }

    async fn unsubscribe(&self) -> Result<(), TransportError> {
        replace_subscription(&self.subscription, None);
        Ok(())
    }
}
