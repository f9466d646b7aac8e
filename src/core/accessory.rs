//! Switch accessory handling
//! This module is the polling consumer of a device session: it keeps a
//! cached view of switch position and battery charge for the bridged
//! accessory, refreshing it on a fixed cadence and applying user intents.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::core::bluetooth::{
    DeviceInformation, IoError, LOW_BATTERY_LEVEL, Peripheral, SwitchmateSession,
};

/// Cached accessory state served to get-callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessorySnapshot {
    pub switch_on: bool,
    pub battery_level: u8,
    pub low_battery: bool,
}

struct AccessoryState {
    switch_on: bool,
    battery_level: u8,
    low_battery: bool,
    information: Option<DeviceInformation>,
}

/// One bridged Switchmate switch.
///
/// Read failures never escape: the battery level degrades to 0 and the
/// switch position keeps its last known value, so a flaky peripheral slows
/// the accessory down without crashing the bridge.
pub struct SwitchAccessory<P: Peripheral> {
    name: String,
    session: Arc<SwitchmateSession<P>>,
    state: Mutex<AccessoryState>,
}

impl<P: Peripheral> SwitchAccessory<P> {
    pub fn new(name: String, session: Arc<SwitchmateSession<P>>) -> Self {
        Self {
            name,
            session,
            state: Mutex::new(AccessoryState {
                switch_on: false,
                battery_level: 100,
                low_battery: false,
                information: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn snapshot(&self) -> AccessorySnapshot {
        let state = self.state.lock().await;
        AccessorySnapshot {
            switch_on: state.switch_on,
            battery_level: state.battery_level,
            low_battery: state.low_battery,
        }
    }

    /// Metadata read from the peripheral when polling started.
    pub async fn device_information(&self) -> Option<DeviceInformation> {
        self.state.lock().await.information.clone()
    }

    /// Applies a user intent.
    ///
    /// Reads the target state first and only writes when it differs, then
    /// updates the cached position. Failures surface to the requester but
    /// do not disturb the polling loop.
    pub async fn set_switch(&self, on: bool) -> Result<(), IoError> {
        info!("setting {} state to {}", self.name, on_label(on));
        let desired: u8 = if on { 1 } else { 0 };

        let target = self.session.read_target_state().await?;
        if target != desired {
            self.session.set_target_state(desired).await?;
        }

        debug!("{} successfully set state to {}", self.name, on_label(on));
        self.state.lock().await.switch_on = on;
        Ok(())
    }

    /// Refreshes battery charge and switch position once.
    pub async fn poll_once(&self) {
        debug!("{} started polling", self.name);

        let battery_level = match self.session.read_battery_level().await {
            Ok(level) => level,
            Err(err) => {
                error!("{} failed to get battery level: {err}", self.name);
                0
            }
        };
        {
            let mut state = self.state.lock().await;
            state.battery_level = battery_level;
            state.low_battery = battery_level <= LOW_BATTERY_LEVEL;
        }
        debug!("setting {} battery level to {battery_level}", self.name);

        match self.session.read_switch_state().await {
            Ok(position) => {
                let on = position == 1;
                self.state.lock().await.switch_on = on;
                debug!("updating {} switch state to {}", self.name, on_label(on));
            }
            Err(err) => {
                error!(
                    "{} failed to get switch state, keeping last known value: {err}",
                    self.name
                );
            }
        }

        debug!("{} done polling", self.name);
    }

    /// Reads device information once, then polls forever on `interval`.
    pub fn spawn_polling(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let information = self.session.read_device_information().await;
            info!(
                "{} is a {} {} (hardware {}, firmware {})",
                self.name,
                information.manufacturer,
                information.model,
                information.hardware_revision,
                information.firmware_revision
            );
            self.state.lock().await.information = Some(information);

            loop {
                self.poll_once().await;
                tokio::time::sleep(interval).await;
            }
        })
    }
}

fn on_label(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::mock::{ConnectBehavior, MockPeripheral, ReadBehavior};
    use crate::core::bluetooth::{
        RadioError, UUID_BATTERY_LEVEL, UUID_POWER_CURRENT, UUID_POWER_TARGET,
    };

    const ADDRESS: &str = "11:22:33:44:55:66";

    fn accessory(peripheral: &MockPeripheral) -> SwitchAccessory<MockPeripheral> {
        SwitchAccessory::new(
            "Switch1".to_string(),
            Arc::new(SwitchmateSession::new(peripheral.clone())),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn polling_refreshes_battery_and_switch_state() {
        let peripheral = MockPeripheral::switchmate(ADDRESS);
        peripheral.characteristic(UUID_BATTERY_LEVEL).set_value(vec![7]);
        peripheral.characteristic(UUID_POWER_CURRENT).set_value(vec![1]);
        let accessory = accessory(&peripheral);

        accessory.poll_once().await;

        let snapshot = accessory.snapshot().await;
        assert_eq!(snapshot.battery_level, 7);
        assert!(snapshot.low_battery);
        assert!(snapshot.switch_on);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_degrades_gracefully_when_the_peripheral_is_unreachable() {
        let peripheral = MockPeripheral::switchmate(ADDRESS);
        let accessory = accessory(&peripheral);
        accessory.poll_once().await;
        assert!(accessory.snapshot().await.switch_on);

        // Take the peripheral away: battery falls back to the sentinel,
        // switch position keeps its last known value.
        peripheral.drop_link();
        peripheral.set_connect(ConnectBehavior::Fail(RadioError::Backend(
            "out of range".to_string(),
        )));
        tokio::time::sleep(Duration::from_millis(1)).await;
        accessory.poll_once().await;

        let snapshot = accessory.snapshot().await;
        assert_eq!(snapshot.battery_level, 0);
        assert!(snapshot.low_battery);
        assert!(snapshot.switch_on);
    }

    #[tokio::test(start_paused = true)]
    async fn set_switch_skips_the_write_when_the_target_already_matches() {
        let peripheral = MockPeripheral::switchmate(ADDRESS);
        let target = peripheral.characteristic(UUID_POWER_TARGET);
        target.set_value(vec![1]);
        let accessory = accessory(&peripheral);

        accessory.set_switch(true).await.unwrap();

        assert!(target.writes().is_empty());
        assert!(accessory.snapshot().await.switch_on);
    }

    #[tokio::test(start_paused = true)]
    async fn set_switch_writes_when_the_target_differs() {
        let peripheral = MockPeripheral::switchmate(ADDRESS);
        let target = peripheral.characteristic(UUID_POWER_TARGET);
        target.set_value(vec![1]);
        let accessory = accessory(&peripheral);

        accessory.set_switch(false).await.unwrap();

        assert_eq!(target.writes(), vec![vec![0]]);
        assert!(!accessory.snapshot().await.switch_on);
    }

    #[tokio::test(start_paused = true)]
    async fn set_switch_surfaces_failures_to_the_requester() {
        let peripheral = MockPeripheral::switchmate(ADDRESS);
        peripheral
            .characteristic(UUID_POWER_TARGET)
            .set_read(ReadBehavior::Fail(RadioError::Backend("gatt error".to_string())));
        let accessory = accessory(&peripheral);

        let result = accessory.set_switch(true).await;
        assert!(result.is_err());
        assert!(!accessory.snapshot().await.switch_on);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_polling_records_device_information() {
        let peripheral = MockPeripheral::switchmate(ADDRESS);
        let accessory = Arc::new(accessory(&peripheral));

        let poller = accessory.clone().spawn_polling(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_millis(5)).await;

        let information = accessory.device_information().await.unwrap();
        assert_eq!(information.manufacturer, "Switchmate");
        assert_eq!(accessory.snapshot().await.battery_level, 88);
        poller.abort();
    }
}
