//! Device session handling for a single Switchmate peripheral
//! This module hides the flaky radio link behind a small set of idempotent,
//! self-healing operations: connect, capability discovery, and bounded
//! characteristic I/O with one transparent reconnect per call.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::core::bluetooth::constants::{
    SESSION_TIMEOUT, UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE, UUID_FIRMWARE_REVISION,
    UUID_HARDWARE_REVISION, UUID_INFORMATION_SERVICE, UUID_MANUFACTURER_NAME, UUID_MODEL_NUMBER,
    UUID_POWER_CURRENT, UUID_POWER_SERVICE, UUID_POWER_TARGET,
};
use crate::core::bluetooth::error::{
    ConnectError, DisconnectError, DiscoverError, IoError, RadioError,
};
use crate::core::bluetooth::radio::{GattCharacteristic, GattService, Peripheral};
use crate::core::bluetooth::types::{CapabilitySet, DeviceInformation, PeripheralId, SessionState};

struct SessionShared<C> {
    state: SessionState,
    capabilities: Option<CapabilitySet<C>>,
    /// Bumped when a connect attempt starts and when a link drop is
    /// processed. Results carrying an older generation belong to a dead
    /// connection and are discarded.
    generation: u64,
}

/// One logical Switchmate peripheral.
///
/// The session object lives for the process lifetime; its internal state
/// cycles between disconnected and ready as the radio link drops and is
/// re-established.
pub struct SwitchmateSession<P: Peripheral> {
    peripheral: P,
    shared: Arc<Mutex<SessionShared<P::Characteristic>>>,
    timeout: Duration,
}

impl<P: Peripheral> SwitchmateSession<P> {
    pub fn new(peripheral: P) -> Self {
        Self::with_timeout(peripheral, SESSION_TIMEOUT)
    }

    pub fn with_timeout(peripheral: P, timeout: Duration) -> Self {
        Self {
            peripheral,
            shared: Arc::new(Mutex::new(SessionShared {
                state: SessionState::Disconnected,
                capabilities: None,
                generation: 0,
            })),
            timeout,
        }
    }

    pub fn peripheral_id(&self) -> PeripheralId {
        self.peripheral.id()
    }

    /// Current connection state.
    pub async fn state(&self) -> SessionState {
        self.shared.lock().await.state
    }

    #[cfg(test)]
    pub(crate) async fn has_capabilities(&self) -> bool {
        self.shared.lock().await.capabilities.is_some()
    }

    /// Brings the link up.
    ///
    /// No-op when already connected. Rejects with [`ConnectError::Busy`]
    /// while a connect or disconnect is in flight; the caller should retry
    /// on its own cadence instead of looping.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let generation = {
            let mut shared = self.shared.lock().await;
            match shared.state {
                SessionState::Connected | SessionState::Ready => {
                    debug!("[{}] already connected", self.peripheral.id());
                    return Ok(());
                }
                SessionState::Connecting | SessionState::Disconnecting => {
                    return Err(ConnectError::Busy);
                }
                SessionState::Disconnected => {
                    shared.generation += 1;
                    shared.state = SessionState::Connecting;
                    shared.generation
                }
            }
        };

        let connected = timeout(self.timeout, self.peripheral.connect()).await;

        let mut shared = self.shared.lock().await;
        match connected {
            Err(_) => {
                shared.state = SessionState::Disconnected;
                warn!(
                    "[{}] connect timed out after {:?}",
                    self.peripheral.id(),
                    self.timeout
                );
                Err(ConnectError::Timeout(self.timeout))
            }
            Ok(Err(err)) => {
                shared.state = SessionState::Disconnected;
                warn!("[{}] connect failed: {err}", self.peripheral.id());
                Err(ConnectError::Radio(err))
            }
            Ok(Ok(())) => {
                shared.state = SessionState::Connected;
                drop(shared);
                debug!("[{}] connected", self.peripheral.id());
                self.spawn_link_watcher(generation);
                Ok(())
            }
        }
    }

    /// Watches the link established by the connect attempt `generation` and
    /// resets the session when it drops. This is the only place cached
    /// characteristic handles are purged.
    fn spawn_link_watcher(&self, generation: u64) {
        let peripheral = self.peripheral.clone();
        let shared = self.shared.clone();
        tokio::spawn(async move {
            peripheral.closed().await;
            let mut shared = shared.lock().await;
            if shared.generation == generation {
                debug!(
                    "[{}] link dropped, clearing cached capabilities",
                    peripheral.id()
                );
                shared.capabilities = None;
                shared.state = SessionState::Disconnected;
                shared.generation += 1;
            }
        });
    }

    /// Resolves and caches the battery and power characteristics.
    ///
    /// No-op when already resolved for the current connection. The expected
    /// profile is matched exactly; any deviation fails the whole pass and
    /// leaves the cache empty.
    pub async fn discover_capabilities(&self) -> Result<(), DiscoverError> {
        let generation = {
            let shared = self.shared.lock().await;
            match shared.state {
                SessionState::Ready => {
                    debug!(
                        "[{}] capabilities already resolved",
                        self.peripheral.id()
                    );
                    return Ok(());
                }
                SessionState::Connected => shared.generation,
                _ => return Err(DiscoverError::NotConnected),
            }
        };

        let capabilities = timeout(self.timeout, self.resolve_capabilities())
            .await
            .map_err(|_| DiscoverError::Timeout(self.timeout))??;

        let mut shared = self.shared.lock().await;
        if shared.generation != generation || shared.state != SessionState::Connected {
            // The link dropped while discovering; the handles are stale.
            return Err(DiscoverError::NotConnected);
        }
        shared.capabilities = Some(capabilities);
        shared.state = SessionState::Ready;
        debug!("[{}] capabilities resolved", self.peripheral.id());
        Ok(())
    }

    async fn resolve_capabilities(
        &self,
    ) -> Result<CapabilitySet<P::Characteristic>, DiscoverError> {
        let services = self
            .peripheral
            .discover_services(&[UUID_BATTERY_SERVICE, UUID_POWER_SERVICE])
            .await
            .map_err(DiscoverError::Radio)?;
        if services.len() != 2 {
            return Err(DiscoverError::InvalidTopology(format!(
                "expected battery and power services, found {} service(s)",
                services.len()
            )));
        }
        let battery_service = services
            .iter()
            .find(|service| service.uuid() == UUID_BATTERY_SERVICE)
            .ok_or_else(|| DiscoverError::InvalidTopology("battery service missing".to_string()))?;
        let power_service = services
            .iter()
            .find(|service| service.uuid() == UUID_POWER_SERVICE)
            .ok_or_else(|| DiscoverError::InvalidTopology("power service missing".to_string()))?;

        let battery_characteristics = battery_service
            .discover_characteristics(&[UUID_BATTERY_LEVEL])
            .await
            .map_err(DiscoverError::Radio)?;
        let battery = match battery_characteristics.as_slice() {
            [level] if level.uuid() == UUID_BATTERY_LEVEL => level.clone(),
            _ => {
                return Err(DiscoverError::InvalidTopology(
                    "battery level characteristic missing".to_string(),
                ));
            }
        };

        let power_characteristics = power_service
            .discover_characteristics(&[UUID_POWER_CURRENT, UUID_POWER_TARGET])
            .await
            .map_err(DiscoverError::Radio)?;
        if power_characteristics.len() != 2 {
            return Err(DiscoverError::InvalidTopology(format!(
                "expected current and target power characteristics, found {}",
                power_characteristics.len()
            )));
        }
        let motor_current = power_characteristics
            .iter()
            .find(|characteristic| characteristic.uuid() == UUID_POWER_CURRENT)
            .ok_or_else(|| {
                DiscoverError::InvalidTopology("power current characteristic missing".to_string())
            })?
            .clone();
        let motor_target = power_characteristics
            .iter()
            .find(|characteristic| characteristic.uuid() == UUID_POWER_TARGET)
            .ok_or_else(|| {
                DiscoverError::InvalidTopology("power target characteristic missing".to_string())
            })?
            .clone();

        Ok(CapabilitySet {
            battery,
            motor_current,
            motor_target,
        })
    }

    /// Reads the battery level in percent.
    pub async fn read_battery_level(&self) -> Result<u8, IoError> {
        self.read_value("battery level", |capabilities| &capabilities.battery)
            .await
    }

    /// Reads the switch position the motor is currently in (0 off, 1 on).
    pub async fn read_switch_state(&self) -> Result<u8, IoError> {
        self.read_value("switch state", |capabilities| &capabilities.motor_current)
            .await
    }

    /// Reads the switch position the motor is driving towards.
    pub async fn read_target_state(&self) -> Result<u8, IoError> {
        self.read_value("target state", |capabilities| &capabilities.motor_target)
            .await
    }

    /// Requests a new target switch position (0 off, 1 on).
    ///
    /// The write is acknowledged by the radio but not verified against the
    /// device; callers confirm by reading the state back.
    pub async fn set_target_state(&self, value: u8) -> Result<(), IoError> {
        match self.try_write(value).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_transient() => {
                debug!(
                    "[{}] set target state failed ({err}), reconnecting once",
                    self.peripheral.id()
                );
                self.make_ready().await?;
                self.try_write(value).await
            }
            Err(err) => {
                error!(
                    "[{}] failed to set target state: {err}",
                    self.peripheral.id()
                );
                Err(err)
            }
        }
    }

    async fn read_value(
        &self,
        what: &'static str,
        pick: fn(&CapabilitySet<P::Characteristic>) -> &P::Characteristic,
    ) -> Result<u8, IoError> {
        match self.try_read(pick).await {
            Ok(value) => Ok(value),
            Err(err) if err.is_transient() => {
                debug!(
                    "[{}] reading {what} failed ({err}), reconnecting once",
                    self.peripheral.id()
                );
                self.make_ready().await?;
                self.try_read(pick).await
            }
            Err(err) => {
                error!("[{}] failed to read {what}: {err}", self.peripheral.id());
                Err(err)
            }
        }
    }

    /// Brings the session from any state up to ready: at most one connect
    /// attempt followed by at most one discovery attempt. Callers apply
    /// their own backoff across polling cycles when this fails.
    async fn make_ready(&self) -> Result<(), IoError> {
        self.connect().await?;
        self.discover_capabilities().await?;
        Ok(())
    }

    async fn try_read(
        &self,
        pick: fn(&CapabilitySet<P::Characteristic>) -> &P::Characteristic,
    ) -> Result<u8, IoError> {
        let (characteristic, generation) = {
            let shared = self.shared.lock().await;
            match (&shared.state, &shared.capabilities) {
                (SessionState::Ready, Some(capabilities)) => {
                    (pick(capabilities).clone(), shared.generation)
                }
                _ => return Err(IoError::NotReady),
            }
        };

        let outcome = timeout(self.timeout, characteristic.read()).await;
        let stale = self.shared.lock().await.generation != generation;
        match outcome {
            Err(_) => Err(IoError::Timeout(self.timeout)),
            Ok(Err(err)) => Err(IoError::Radio(err)),
            // The link dropped while the read was in flight; its result
            // belongs to a dead connection.
            Ok(Ok(_)) if stale => Err(IoError::NotReady),
            Ok(Ok(payload)) => payload.first().copied().ok_or(IoError::MalformedResponse),
        }
    }

    async fn try_write(&self, value: u8) -> Result<(), IoError> {
        let (characteristic, generation) = {
            let shared = self.shared.lock().await;
            match (&shared.state, &shared.capabilities) {
                (SessionState::Ready, Some(capabilities)) => {
                    (capabilities.motor_target.clone(), shared.generation)
                }
                _ => return Err(IoError::NotReady),
            }
        };

        let outcome = timeout(self.timeout, characteristic.write(&[value])).await;
        let stale = self.shared.lock().await.generation != generation;
        match outcome {
            Err(_) => Err(IoError::Timeout(self.timeout)),
            Ok(Err(err)) => Err(IoError::Radio(err)),
            Ok(Ok(())) if stale => Err(IoError::NotReady),
            Ok(Ok(())) => Ok(()),
        }
    }

    /// Reads the device-information service.
    ///
    /// Best effort: metadata is cosmetic, so missing or unreadable fields
    /// keep their placeholder value instead of failing the call.
    pub async fn read_device_information(&self) -> DeviceInformation {
        let mut information = DeviceInformation::default();
        if let Err(err) = self.connect().await {
            warn!(
                "[{}] cannot read device information: {err}",
                self.peripheral.id()
            );
            return information;
        }
        match timeout(self.timeout, self.fetch_device_information(&mut information)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(
                "[{}] device information unavailable: {err}",
                self.peripheral.id()
            ),
            Err(_) => warn!(
                "[{}] device information read timed out",
                self.peripheral.id()
            ),
        }
        information
    }

    async fn fetch_device_information(
        &self,
        information: &mut DeviceInformation,
    ) -> Result<(), RadioError> {
        let services = self
            .peripheral
            .discover_services(&[UUID_INFORMATION_SERVICE])
            .await?;
        if services.len() != 1 || services[0].uuid() != UUID_INFORMATION_SERVICE {
            warn!(
                "[{}] unexpected device information service layout",
                self.peripheral.id()
            );
            return Ok(());
        }

        let characteristics = services[0].discover_characteristics(&[]).await?;
        if characteristics.is_empty() {
            warn!(
                "[{}] device information service has no characteristics",
                self.peripheral.id()
            );
            return Ok(());
        }

        for characteristic in &characteristics {
            let uuid = characteristic.uuid();
            let payload = match characteristic.read().await {
                Ok(payload) => payload,
                Err(err) => {
                    debug!(
                        "[{}] skipping unreadable information characteristic {uuid}: {err}",
                        self.peripheral.id()
                    );
                    continue;
                }
            };
            let text = String::from_utf8_lossy(&payload)
                .trim_end_matches('\0')
                .to_string();
            if uuid == UUID_MANUFACTURER_NAME {
                information.manufacturer = text;
            } else if uuid == UUID_MODEL_NUMBER {
                information.model = text;
            } else if uuid == UUID_HARDWARE_REVISION {
                information.hardware_revision = text;
            } else if uuid == UUID_FIRMWARE_REVISION {
                information.firmware_revision = text;
            }
        }
        Ok(())
    }

    /// Tears the link down.
    ///
    /// No-op when already disconnected. State cleanup is performed by the
    /// link watcher registered at connect time.
    pub async fn disconnect(&self) -> Result<(), DisconnectError> {
        {
            let mut shared = self.shared.lock().await;
            match shared.state {
                SessionState::Disconnected => return Ok(()),
                SessionState::Connecting | SessionState::Disconnecting => {
                    return Err(DisconnectError::Busy);
                }
                SessionState::Connected | SessionState::Ready => {
                    shared.state = SessionState::Disconnecting;
                }
            }
        }

        let outcome = timeout(self.timeout, self.peripheral.disconnect()).await;
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.restore_connected_state().await;
                warn!("[{}] disconnect failed: {err}", self.peripheral.id());
                Err(DisconnectError::Radio(err))
            }
            Err(_) => {
                self.restore_connected_state().await;
                warn!(
                    "[{}] disconnect timed out after {:?}",
                    self.peripheral.id(),
                    self.timeout
                );
                Err(DisconnectError::Timeout(self.timeout))
            }
        }
    }

    /// The disconnect request failed, so the link is still up; put the state
    /// back unless the link watcher already saw the link drop.
    async fn restore_connected_state(&self) {
        let mut shared = self.shared.lock().await;
        if shared.state == SessionState::Disconnecting {
            shared.state = if shared.capabilities.is_some() {
                SessionState::Ready
            } else {
                SessionState::Connected
            };
        }
    }
}
