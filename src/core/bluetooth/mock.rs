//! Scriptable radio doubles used by the session, discovery, accessory and
//! platform tests. Behaviors are swappable at runtime so tests can script
//! link drops, hangs and backend failures mid-operation.

use std::future::pending;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE, UUID_FIRMWARE_REVISION, UUID_HARDWARE_REVISION,
    UUID_INFORMATION_SERVICE, UUID_MANUFACTURER_NAME, UUID_MODEL_NUMBER, UUID_POWER_CURRENT,
    UUID_POWER_SERVICE, UUID_POWER_TARGET,
};
use crate::core::bluetooth::error::RadioError;
use crate::core::bluetooth::radio::{
    GattCharacteristic, GattService, Peripheral, Radio, RadioEvent, RadioState,
};
use crate::core::bluetooth::types::PeripheralId;

#[derive(Debug, Clone)]
pub(crate) enum ConnectBehavior {
    Succeed,
    Fail(RadioError),
    Hang,
}

#[derive(Debug, Clone)]
pub(crate) enum ReadBehavior {
    /// Return the current value.
    Value,
    Fail(RadioError),
    /// Never resolve.
    Hang,
    /// Resolve with the current value once `release()` is called.
    Gated,
}

#[derive(Debug, Clone)]
pub(crate) enum WriteBehavior {
    Accept,
    Fail(RadioError),
}

struct CharacteristicInner {
    uuid: Uuid,
    value: Mutex<Vec<u8>>,
    read_behavior: Mutex<ReadBehavior>,
    write_behavior: Mutex<WriteBehavior>,
    read_calls: AtomicUsize,
    write_calls: AtomicUsize,
    writes: Mutex<Vec<Vec<u8>>>,
    gate: Notify,
}

#[derive(Clone)]
pub(crate) struct MockCharacteristic {
    inner: Arc<CharacteristicInner>,
}

impl MockCharacteristic {
    pub(crate) fn new(uuid: Uuid, value: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(CharacteristicInner {
                uuid,
                value: Mutex::new(value),
                read_behavior: Mutex::new(ReadBehavior::Value),
                write_behavior: Mutex::new(WriteBehavior::Accept),
                read_calls: AtomicUsize::new(0),
                write_calls: AtomicUsize::new(0),
                writes: Mutex::new(Vec::new()),
                gate: Notify::new(),
            }),
        }
    }

    pub(crate) fn set_value(&self, value: Vec<u8>) {
        *self.inner.value.lock().unwrap() = value;
    }

    pub(crate) fn set_read(&self, behavior: ReadBehavior) {
        *self.inner.read_behavior.lock().unwrap() = behavior;
    }

    pub(crate) fn set_write(&self, behavior: WriteBehavior) {
        *self.inner.write_behavior.lock().unwrap() = behavior;
    }

    /// Lets one gated read resolve.
    pub(crate) fn release(&self) {
        self.inner.gate.notify_one();
    }

    pub(crate) fn read_calls(&self) -> usize {
        self.inner.read_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn write_calls(&self) -> usize {
        self.inner.write_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
        self.inner.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl GattCharacteristic for MockCharacteristic {
    fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    async fn read(&self) -> Result<Vec<u8>, RadioError> {
        self.inner.read_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.inner.read_behavior.lock().unwrap().clone();
        match behavior {
            ReadBehavior::Value => Ok(self.inner.value.lock().unwrap().clone()),
            ReadBehavior::Fail(err) => Err(err),
            ReadBehavior::Hang => pending().await,
            ReadBehavior::Gated => {
                self.inner.gate.notified().await;
                Ok(self.inner.value.lock().unwrap().clone())
            }
        }
    }

    async fn write(&self, value: &[u8]) -> Result<(), RadioError> {
        self.inner.write_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.inner.write_behavior.lock().unwrap().clone();
        match behavior {
            WriteBehavior::Accept => {
                self.inner.writes.lock().unwrap().push(value.to_vec());
                *self.inner.value.lock().unwrap() = value.to_vec();
                Ok(())
            }
            WriteBehavior::Fail(err) => Err(err),
        }
    }
}

struct ServiceInner {
    uuid: Uuid,
    characteristics: Vec<MockCharacteristic>,
}

#[derive(Clone)]
pub(crate) struct MockService {
    inner: Arc<ServiceInner>,
}

impl MockService {
    pub(crate) fn new(uuid: Uuid, characteristics: Vec<MockCharacteristic>) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                uuid,
                characteristics,
            }),
        }
    }
}

#[async_trait]
impl GattService for MockService {
    type Characteristic = MockCharacteristic;

    fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    async fn discover_characteristics(
        &self,
        filter: &[Uuid],
    ) -> Result<Vec<MockCharacteristic>, RadioError> {
        Ok(self
            .inner
            .characteristics
            .iter()
            .filter(|characteristic| {
                filter.is_empty() || filter.contains(&characteristic.uuid())
            })
            .cloned()
            .collect())
    }
}

struct PeripheralInner {
    id: PeripheralId,
    services: Vec<MockService>,
    connected: Mutex<bool>,
    connect_behavior: Mutex<ConnectBehavior>,
    connect_calls: AtomicUsize,
    discovery_passes: AtomicUsize,
    link_events: Notify,
}

#[derive(Clone)]
pub(crate) struct MockPeripheral {
    inner: Arc<PeripheralInner>,
}

impl MockPeripheral {
    /// A peripheral exposing the full Switchmate profile.
    pub(crate) fn switchmate(id: &str) -> Self {
        let battery = MockService::new(
            UUID_BATTERY_SERVICE,
            vec![MockCharacteristic::new(UUID_BATTERY_LEVEL, vec![88])],
        );
        let power = MockService::new(
            UUID_POWER_SERVICE,
            vec![
                MockCharacteristic::new(UUID_POWER_CURRENT, vec![1]),
                MockCharacteristic::new(UUID_POWER_TARGET, vec![1]),
            ],
        );
        let information = MockService::new(
            UUID_INFORMATION_SERVICE,
            vec![
                MockCharacteristic::new(UUID_MANUFACTURER_NAME, b"Switchmate".to_vec()),
                MockCharacteristic::new(UUID_MODEL_NUMBER, b"Bright".to_vec()),
                MockCharacteristic::new(UUID_HARDWARE_REVISION, b"4".to_vec()),
                MockCharacteristic::new(UUID_FIRMWARE_REVISION, b"2.99.15".to_vec()),
            ],
        );
        Self::with_services(id, vec![battery, power, information])
    }

    pub(crate) fn with_services(id: &str, services: Vec<MockService>) -> Self {
        Self {
            inner: Arc::new(PeripheralInner {
                id: PeripheralId::new(id),
                services,
                connected: Mutex::new(false),
                connect_behavior: Mutex::new(ConnectBehavior::Succeed),
                connect_calls: AtomicUsize::new(0),
                discovery_passes: AtomicUsize::new(0),
                link_events: Notify::new(),
            }),
        }
    }

    pub(crate) fn set_connect(&self, behavior: ConnectBehavior) {
        *self.inner.connect_behavior.lock().unwrap() = behavior;
    }

    /// Simulates the radio link going down.
    pub(crate) fn drop_link(&self) {
        *self.inner.connected.lock().unwrap() = false;
        self.inner.link_events.notify_one();
    }

    pub(crate) fn connect_calls(&self) -> usize {
        self.inner.connect_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn discovery_passes(&self) -> usize {
        self.inner.discovery_passes.load(Ordering::SeqCst)
    }

    /// Looks up a characteristic by UUID across all services.
    pub(crate) fn characteristic(&self, uuid: Uuid) -> MockCharacteristic {
        self.inner
            .services
            .iter()
            .flat_map(|service| service.inner.characteristics.iter())
            .find(|characteristic| characteristic.uuid() == uuid)
            .cloned()
            .unwrap_or_else(|| panic!("no mock characteristic {uuid}"))
    }
}

#[async_trait]
impl Peripheral for MockPeripheral {
    type Service = MockService;
    type Characteristic = MockCharacteristic;

    fn id(&self) -> PeripheralId {
        self.inner.id.clone()
    }

    async fn connect(&self) -> Result<(), RadioError> {
        self.inner.connect_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.inner.connect_behavior.lock().unwrap().clone();
        match behavior {
            ConnectBehavior::Succeed => {
                *self.inner.connected.lock().unwrap() = true;
                Ok(())
            }
            ConnectBehavior::Fail(err) => Err(err),
            ConnectBehavior::Hang => pending().await,
        }
    }

    async fn disconnect(&self) -> Result<(), RadioError> {
        *self.inner.connected.lock().unwrap() = false;
        self.inner.link_events.notify_one();
        Ok(())
    }

    async fn closed(&self) {
        loop {
            if !*self.inner.connected.lock().unwrap() {
                return;
            }
            self.inner.link_events.notified().await;
        }
    }

    async fn discover_services(&self, filter: &[Uuid]) -> Result<Vec<MockService>, RadioError> {
        if !*self.inner.connected.lock().unwrap() {
            return Err(RadioError::NotConnected);
        }
        self.inner.discovery_passes.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .inner
            .services
            .iter()
            .filter(|service| filter.is_empty() || filter.contains(&service.uuid()))
            .cloned()
            .collect())
    }
}

pub(crate) struct MockRadio {
    state: Mutex<RadioState>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<RadioEvent<MockPeripheral>>>>,
    scan_starts: AtomicUsize,
    scan_stops: AtomicUsize,
}

impl MockRadio {
    pub(crate) fn new(state: RadioState) -> Self {
        Self {
            state: Mutex::new(state),
            subscribers: Mutex::new(Vec::new()),
            scan_starts: AtomicUsize::new(0),
            scan_stops: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_state(&self, state: RadioState) {
        *self.state.lock().unwrap() = state;
        self.emit(RadioEvent::StateChanged(state));
    }

    pub(crate) fn emit(&self, event: RadioEvent<MockPeripheral>) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    pub(crate) fn scan_starts(&self) -> usize {
        self.scan_starts.load(Ordering::SeqCst)
    }

    pub(crate) fn scan_stops(&self) -> usize {
        self.scan_stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Radio for MockRadio {
    type Peripheral = MockPeripheral;

    async fn state(&self) -> RadioState {
        *self.state.lock().unwrap()
    }

    fn events(&self) -> mpsc::UnboundedReceiver<RadioEvent<MockPeripheral>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(sender);
        receiver
    }

    async fn start_scan(&self, _service_filter: &[Uuid]) -> Result<(), RadioError> {
        self.scan_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.scan_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
