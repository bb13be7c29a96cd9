//! Scriptable peripheral used by the unit tests

use std::collections::HashMap;
use std::fmt;
use std::future::pending;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    SESSION_EVENT_CAPACITY, UUID_DEVICE_NAME, UUID_NOTIFY_CHAR, UUID_PRIMARY_SERVICE, UUID_WRITE_CHAR,
};
use crate::core::bluetooth::peripheral::{
    DiscoveredService, GattCharacteristic, NotificationReceiver, Peripheral,
};
use crate::core::bluetooth::types::{ConnectionEvent, ConnectionState};
use crate::core::error::TransportError;

const UUID_GENERIC_ACCESS: Uuid = Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb);

/// How a scripted call behaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Behavior {
    #[default]
    Succeed,
    Fail(&'static str),
    /// Never completes
    Hang,
    /// The link drops while the call is in progress
    DropLink,
}

#[derive(Debug, Default)]
pub struct Script {
    pub connect: Behavior,
    pub disconnect: Behavior,
    pub discover: Behavior,
    pub read: Behavior,
    pub write: Behavior,
    pub subscribe: Behavior,
    /// Notified back after each write to the command characteristic
    pub response: Option<Vec<u8>>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub connect: usize,
    pub disconnect: usize,
    pub discover: usize,
    pub subscribe: usize,
    pub unsubscribe: usize,
}

struct MockState {
    link: ConnectionState,
    script: Script,
    calls: Calls,
    services: Vec<DiscoveredService<MockCharacteristic>>,
    values: HashMap<Uuid, Vec<u8>>,
    writes: Vec<(Uuid, Vec<u8>)>,
    notify_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

struct Inner {
    state: Mutex<MockState>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn drop_link(&self) {
        let mut state = self.lock();
        state.link = ConnectionState::Disconnected;
        state.notify_tx = None;
        let _ = self.events.send(ConnectionEvent::Disconnected);
    }
}

#[derive(Clone)]
pub struct MockPeripheral {
    inner: Arc<Inner>,
}

impl MockPeripheral {
    pub fn new(
        build: impl FnOnce(&MockPeripheral) -> Vec<DiscoveredService<MockCharacteristic>>,
    ) -> Self {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        let peripheral = Self {
            inner: Arc::new(Inner {
                state: Mutex::new(MockState {
                    link: ConnectionState::Disconnected,
                    script: Script::default(),
                    calls: Calls::default(),
                    services: Vec::new(),
                    values: HashMap::new(),
                    writes: Vec::new(),
                    notify_tx: None,
                }),
                events,
            }),
        };
        let services = build(&peripheral);
        peripheral.inner.lock().services = services;
        peripheral
    }

    pub fn characteristic(&self, uuid: Uuid) -> MockCharacteristic {
        MockCharacteristic {
            uuid,
            tag: None,
            inner: self.inner.clone(),
        }
    }

    pub fn tagged_characteristic(&self, uuid: Uuid, tag: &'static str) -> MockCharacteristic {
        MockCharacteristic {
            uuid,
            tag: Some(tag),
            inner: self.inner.clone(),
        }
    }

    pub fn services(&self) -> Vec<DiscoveredService<MockCharacteristic>> {
        self.inner.lock().services.clone()
    }

    pub fn script(&self, edit: impl FnOnce(&mut Script)) {
        edit(&mut self.inner.lock().script);
    }

    pub fn set_value(&self, uuid: Uuid, value: Vec<u8>) {
        self.inner.lock().values.insert(uuid, value);
    }

    pub fn set_link(&self, link: ConnectionState) {
        self.inner.lock().link = link;
    }

    pub fn link(&self) -> ConnectionState {
        self.inner.lock().link
    }

    pub fn calls(&self) -> Calls {
        self.inner.lock().calls
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.inner.lock().writes.clone()
    }

    /// Push a raw link event without changing the link state.
    pub fn emit(&self, event: ConnectionEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Simulate the device going away.
    pub fn drop_link(&self) {
        self.inner.drop_link();
    }
}

/// Primary service with write and notify, plus Generic Access with the name.
pub fn switchbot_services(p: &MockPeripheral) -> Vec<DiscoveredService<MockCharacteristic>> {
    vec![
        DiscoveredService {
            uuid: UUID_PRIMARY_SERVICE,
            characteristics: vec![
                p.characteristic(UUID_WRITE_CHAR),
                p.characteristic(UUID_NOTIFY_CHAR),
            ],
        },
        generic_access(p),
    ]
}

pub fn generic_access(p: &MockPeripheral) -> DiscoveredService<MockCharacteristic> {
    DiscoveredService {
        uuid: UUID_GENERIC_ACCESS,
        characteristics: vec![p.characteristic(UUID_DEVICE_NAME)],
    }
}

#[async_trait::async_trait]
impl Peripheral for MockPeripheral {
    type Characteristic = MockCharacteristic;

    async fn state(&self) -> ConnectionState {
        self.inner.lock().link
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let behavior = {
            let mut state = self.inner.lock();
            state.calls.connect += 1;
            state.script.connect
        };
        match behavior {
            Behavior::Fail(message) => Err(TransportError::new(message)),
            Behavior::Hang => {
                self.inner.lock().link = ConnectionState::Connecting;
                pending().await
            }
            Behavior::Succeed | Behavior::DropLink => {
                self.inner.lock().link = ConnectionState::Connected;
                let _ = self.inner.events.send(ConnectionEvent::Connected);
                Ok(())
            }
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let behavior = {
            let mut state = self.inner.lock();
            state.calls.disconnect += 1;
            state.script.disconnect
        };
        match behavior {
            Behavior::Fail(message) => Err(TransportError::new(message)),
            Behavior::Hang => {
                self.inner.lock().link = ConnectionState::Disconnecting;
                pending().await
            }
            Behavior::Succeed | Behavior::DropLink => {
                self.inner.drop_link();
                Ok(())
            }
        }
    }

    async fn discover_services(
        &self,
    ) -> Result<Vec<DiscoveredService<MockCharacteristic>>, TransportError> {
        let (behavior, services) = {
            let mut state = self.inner.lock();
            state.calls.discover += 1;
            (state.script.discover, state.services.clone())
        };
        match behavior {
            Behavior::Succeed => Ok(services),
            Behavior::Fail(message) => Err(TransportError::new(message)),
            Behavior::Hang => pending().await,
            Behavior::DropLink => {
                self.inner.drop_link();
                pending().await
            }
        }
    }
}

#[derive(Clone)]
pub struct MockCharacteristic {
    uuid: Uuid,
    tag: Option<&'static str>,
    inner: Arc<Inner>,
}

impl MockCharacteristic {
    pub fn tag(&self) -> Option<&'static str> {
        self.tag
    }
}

impl fmt::Debug for MockCharacteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockCharacteristic")
            .field("uuid", &self.uuid)
            .field("tag", &self.tag)
            .finish()
    }
}

#[async_trait::async_trait]
impl GattCharacteristic for MockCharacteristic {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn read(&self) -> Result<Vec<u8>, TransportError> {
        let (behavior, value) = {
            let state = self.inner.lock();
            let value = state.values.get(&self.uuid).cloned().unwrap_or_default();
            (state.script.read, value)
        };
        match behavior {
            Behavior::Succeed => Ok(value),
            Behavior::Fail(message) => Err(TransportError::new(message)),
            Behavior::Hang => pending().await,
            Behavior::DropLink => {
                self.inner.drop_link();
                pending().await
            }
        }
    }

    async fn write(&self, value: &[u8], _without_response: bool) -> Result<(), TransportError> {
        let behavior = {
            let mut state = self.inner.lock();
            state.writes.push((self.uuid, value.to_vec()));
            state.script.write
        };
        match behavior {
            Behavior::Fail(message) => Err(TransportError::new(message)),
            Behavior::Hang => pending().await,
            Behavior::DropLink => {
                self.inner.drop_link();
                Ok(())
            }
            Behavior::Succeed => {
                let mut state = self.inner.lock();
                state.values.insert(self.uuid, value.to_vec());
                if self.uuid == UUID_WRITE_CHAR {
                    if let (Some(response), Some(tx)) = (state.script.response.clone(), &state.notify_tx) {
                        let _ = tx.send(response);
                    }
                }
                Ok(())
            }
        }
    }

    async fn subscribe(&self) -> Result<NotificationReceiver, TransportError> {
        let behavior = {
            let mut state = self.inner.lock();
            state.calls.subscribe += 1;
            state.script.subscribe
        };
        match behavior {
            Behavior::Fail(message) => Err(TransportError::new(message)),
            Behavior::Hang => pending().await,
            Behavior::DropLink => {
                self.inner.drop_link();
                pending().await
            }
            Behavior::Succeed => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.inner.lock().notify_tx = Some(tx);
                Ok(rx)
            }
        }
    }

    async fn unsubscribe(&self) -> Result<(), TransportError> {
        let mut state = self.inner.lock();
        state.calls.unsubscribe += 1;
        state.notify_tx = None;
        Ok(())
    }
}
