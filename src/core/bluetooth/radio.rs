//! Abstraction over the local Bluetooth radio stack.
//!
//! Sessions and the discovery coordinator are generic over these traits so
//! the production `bluest` backend and scripted test doubles are
//! interchangeable. The surface mirrors what the bridge actually consumes:
//! scan control, connect/disconnect, filtered service and characteristic
//! discovery, characteristic read/write, and an ordered event queue.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::error::RadioError;
use crate::core::bluetooth::types::PeripheralId;

/// Power state reported by the local radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

/// Events pushed by the radio, delivered strictly in arrival order.
#[derive(Debug, Clone)]
pub enum RadioEvent<P> {
    /// A peripheral advertisement was seen. Repeats for the same peripheral
    /// are expected; consumers deduplicate.
    Discovered(P),
    /// The scan ended on its own, without a stop request.
    ScanStopped,
    /// The adapter power state changed.
    StateChanged(RadioState),
}

/// A single readable or writable GATT value slot.
#[async_trait]
pub trait GattCharacteristic: Clone + Send + Sync + 'static {
    fn uuid(&self) -> Uuid;

    async fn read(&self) -> Result<Vec<u8>, RadioError>;

    async fn write(&self, value: &[u8]) -> Result<(), RadioError>;
}

/// A GATT service on a connected peripheral.
#[async_trait]
pub trait GattService: Send + Sync {
    type Characteristic: GattCharacteristic;

    fn uuid(&self) -> Uuid;

    /// Discovers characteristics, restricted to `filter` when non-empty.
    async fn discover_characteristics(
        &self,
        filter: &[Uuid],
    ) -> Result<Vec<Self::Characteristic>, RadioError>;
}

/// A remote peripheral as seen by the local radio.
#[async_trait]
pub trait Peripheral: Clone + Send + Sync + 'static {
    type Service: GattService<Characteristic = Self::Characteristic>;
    type Characteristic: GattCharacteristic;

    /// Stable hardware identity, already normalized.
    fn id(&self) -> PeripheralId;

    async fn connect(&self) -> Result<(), RadioError>;

    async fn disconnect(&self) -> Result<(), RadioError>;

    /// Resolves once the current link has dropped, however that happened.
    async fn closed(&self);

    /// Discovers services, restricted to `filter` when non-empty.
    async fn discover_services(&self, filter: &[Uuid]) -> Result<Vec<Self::Service>, RadioError>;
}

/// The local radio: scan control plus the event queue.
#[async_trait]
pub trait Radio: Send + Sync + 'static {
    type Peripheral: Peripheral;

    /// Current adapter power state.
    async fn state(&self) -> RadioState;

    /// Subscribes to radio events. Events observed after this call are
    /// pushed onto the returned queue in arrival order.
    fn events(&self) -> mpsc::UnboundedReceiver<RadioEvent<Self::Peripheral>>;

    /// Starts scanning for peripherals advertising one of `service_filter`.
    async fn start_scan(&self, service_filter: &[Uuid]) -> Result<(), RadioError>;

    /// Stops an active scan. No-op when idle.
    async fn stop_scan(&self) -> Result<(), RadioError>;
}
