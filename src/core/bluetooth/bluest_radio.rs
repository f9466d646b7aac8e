//! Production radio backed by the bluest crate
//! This module adapts the platform Bluetooth stack to the radio traits:
//! a background scan task feeding the event queue, and thin wrappers
//! around bluest devices, services and characteristics.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device, Service};
use futures_util::StreamExt;
use log::{debug, error, info};
use regex::Regex;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::error::RadioError;
use crate::core::bluetooth::radio::{
    GattCharacteristic, GattService, Peripheral, Radio, RadioEvent, RadioState,
};
use crate::core::bluetooth::types::PeripheralId;

/// How often a link watcher re-checks the connection, since the backend
/// exposes no disconnect event.
const LINK_POLL_INTERVAL: Duration = Duration::from_secs(1);

impl From<bluest::Error> for RadioError {
    fn from(err: bluest::Error) -> Self {
        RadioError::Backend(err.to_string())
    }
}

struct ScanControl {
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

/// The system Bluetooth adapter.
pub struct BluestRadio {
    adapter: Adapter,
    available: Arc<AtomicBool>,
    subscribers: Arc<std::sync::Mutex<Vec<mpsc::UnboundedSender<RadioEvent<BluestPeripheral>>>>>,
    scan: Mutex<ScanControl>,
}

impl BluestRadio {
    /// Opens the default adapter and starts watching its availability.
    pub async fn new() -> Result<Self, RadioError> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| RadioError::Backend("no bluetooth adapter found".to_string()))?;

        let available = Arc::new(AtomicBool::new(false));
        let subscribers: Arc<
            std::sync::Mutex<Vec<mpsc::UnboundedSender<RadioEvent<BluestPeripheral>>>>,
        > = Arc::new(std::sync::Mutex::new(Vec::new()));

        {
            let adapter = adapter.clone();
            let available = available.clone();
            let subscribers = subscribers.clone();
            tokio::spawn(async move {
                if let Err(err) = adapter.wait_available().await {
                    error!("bluetooth adapter did not become available: {err}");
                    return;
                }
                info!("bluetooth adapter is available");
                available.store(true, Ordering::SeqCst);
                broadcast(&subscribers, RadioEvent::StateChanged(RadioState::PoweredOn));
            });
        }

        Ok(Self {
            adapter,
            available,
            subscribers,
            scan: Mutex::new(ScanControl {
                cancel: None,
                task: None,
            }),
        })
    }
}

fn broadcast(
    subscribers: &std::sync::Mutex<Vec<mpsc::UnboundedSender<RadioEvent<BluestPeripheral>>>>,
    event: RadioEvent<BluestPeripheral>,
) {
    subscribers
        .lock()
        .unwrap()
        .retain(|subscriber| subscriber.send(event.clone()).is_ok());
}

#[async_trait]
impl Radio for BluestRadio {
    type Peripheral = BluestPeripheral;

    async fn state(&self) -> RadioState {
        if self.available.load(Ordering::SeqCst) {
            RadioState::PoweredOn
        } else {
            RadioState::Unknown
        }
    }

    fn events(&self) -> mpsc::UnboundedReceiver<RadioEvent<BluestPeripheral>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(sender);
        receiver
    }

    async fn start_scan(&self, service_filter: &[Uuid]) -> Result<(), RadioError> {
        let mut scan = self.scan.lock().await;

        // Stop a previous scan task before starting over.
        if let Some(cancel) = scan.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = scan.task.take() {
            let _ = task.await;
        }

        let cancel = CancellationToken::new();
        let adapter = self.adapter.clone();
        let subscribers = self.subscribers.clone();
        let services = service_filter.to_vec();
        let cancel_for_task = cancel.clone();

        let task = tokio::spawn(async move {
            let mut scan_stream = match adapter.scan(&services).await {
                Ok(stream) => stream,
                Err(err) => {
                    error!("failed to start scanning: {err}");
                    broadcast(&subscribers, RadioEvent::ScanStopped);
                    return;
                }
            };
            info!("scan started");

            loop {
                tokio::select! {
                    discovered = scan_stream.next() => {
                        match discovered {
                            Some(discovered) => {
                                let device = discovered.device;
                                debug!(
                                    "advertisement from {:?} (rssi {:?})",
                                    device.id(),
                                    discovered.rssi
                                );
                                let peripheral =
                                    BluestPeripheral::new(adapter.clone(), device);
                                broadcast(&subscribers, RadioEvent::Discovered(peripheral));
                            }
                            None => {
                                info!("scan stream ended");
                                broadcast(&subscribers, RadioEvent::ScanStopped);
                                break;
                            }
                        }
                    }
                    _ = cancel_for_task.cancelled() => {
                        debug!("scan cancelled");
                        break;
                    }
                }
            }
        });

        scan.cancel = Some(cancel);
        scan.task = Some(task);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        let mut scan = self.scan.lock().await;
        if let Some(cancel) = scan.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = scan.task.take() {
            if let Err(err) = task.await {
                error!("scan task ended abnormally: {err}");
            }
        }
        Ok(())
    }
}

/// A remote device paired with the adapter handle needed to drive it.
#[derive(Clone)]
pub struct BluestPeripheral {
    adapter: Adapter,
    device: Device,
    id: PeripheralId,
}

impl BluestPeripheral {
    pub fn new(adapter: Adapter, device: Device) -> Self {
        let raw = device.id().to_string();
        let id = PeripheralId::new(&extract_address(&raw).unwrap_or(raw));
        Self {
            adapter,
            device,
            id,
        }
    }
}

/// Pulls the hardware address out of a platform device id, which on some
/// platforms embeds it in a longer path-like string.
fn extract_address(device_id: &str) -> Option<String> {
    let re = Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").unwrap();
    re.find_iter(device_id)
        .last()
        .map(|address| address.as_str().to_string())
}

#[async_trait]
impl Peripheral for BluestPeripheral {
    type Service = BluestGattService;
    type Characteristic = BluestGattCharacteristic;

    fn id(&self) -> PeripheralId {
        self.id.clone()
    }

    async fn connect(&self) -> Result<(), RadioError> {
        if self.device.is_connected().await {
            return Ok(());
        }
        self.adapter.connect_device(&self.device).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RadioError> {
        if !self.device.is_connected().await {
            return Ok(());
        }
        self.adapter.disconnect_device(&self.device).await?;
        Ok(())
    }

    async fn closed(&self) {
        // The backend has no disconnect event, so poll the link.
        loop {
            if !self.device.is_connected().await {
                return;
            }
            tokio::time::sleep(LINK_POLL_INTERVAL).await;
        }
    }

    async fn discover_services(
        &self,
        filter: &[Uuid],
    ) -> Result<Vec<BluestGattService>, RadioError> {
        let mut services = Vec::new();
        if filter.is_empty() {
            services.extend(self.device.discover_services().await?);
        } else {
            for uuid in filter {
                services.extend(self.device.discover_services_with_uuid(*uuid).await?);
            }
        }
        Ok(services.into_iter().map(BluestGattService).collect())
    }
}

/// Wrapper implementing the service trait for bluest.
#[derive(Clone)]
pub struct BluestGattService(Service);

#[async_trait]
impl GattService for BluestGattService {
    type Characteristic = BluestGattCharacteristic;

    fn uuid(&self) -> Uuid {
        self.0.uuid()
    }

    async fn discover_characteristics(
        &self,
        filter: &[Uuid],
    ) -> Result<Vec<BluestGattCharacteristic>, RadioError> {
        let mut characteristics = Vec::new();
        if filter.is_empty() {
            characteristics.extend(self.0.discover_characteristics().await?);
        } else {
            for uuid in filter {
                characteristics.extend(self.0.discover_characteristics_with_uuid(*uuid).await?);
            }
        }
        Ok(characteristics
            .into_iter()
            .map(BluestGattCharacteristic)
            .collect())
    }
}

/// Wrapper implementing the characteristic trait for bluest.
#[derive(Clone)]
pub struct BluestGattCharacteristic(Characteristic);

#[async_trait]
impl GattCharacteristic for BluestGattCharacteristic {
    fn uuid(&self) -> Uuid {
        self.0.uuid()
    }

    async fn read(&self) -> Result<Vec<u8>, RadioError> {
        Ok(self.0.read().await?)
    }

    async fn write(&self, value: &[u8]) -> Result<(), RadioError> {
        Ok(self.0.write(value).await?)
    }
}
