//! Bridge platform wiring
//! This module ties configuration, discovery and accessories together: it
//! runs discovery against the configured device list, registers one polling
//! accessory per matched switch, and removes accessories that are no longer
//! configured.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::PlatformConfig;
use crate::core::accessory::SwitchAccessory;
use crate::core::bluetooth::{
    ConfigError, DiscoveredSwitch, DiscoveryCoordinator, PeripheralId, Radio,
};

struct AccessoryHandle<R: Radio> {
    accessory: Arc<SwitchAccessory<R::Peripheral>>,
    poller: JoinHandle<()>,
}

/// The Switchmate bridge platform.
pub struct SwitchmatePlatform<R: Radio> {
    config: PlatformConfig,
    coordinator: DiscoveryCoordinator<R>,
    accessories: HashMap<PeripheralId, AccessoryHandle<R>>,
    /// Identities known to the bridge from a previous run.
    restored: HashSet<PeripheralId>,
}

impl<R: Radio> SwitchmatePlatform<R> {
    pub fn new(config: PlatformConfig, radio: Arc<R>) -> Self {
        Self {
            config,
            coordinator: DiscoveryCoordinator::new(radio),
            accessories: HashMap::new(),
            restored: HashSet::new(),
        }
    }

    /// Seeds identities the bridge already tracks, so matching them again
    /// restores the accessory instead of adding a new one.
    pub fn restore_accessories(&mut self, ids: impl IntoIterator<Item = PeripheralId>) {
        for id in ids {
            debug!("loading accessory {id} from cache");
            self.restored.insert(id);
        }
    }

    /// Discovers all configured switches and starts polling each one.
    ///
    /// Returns once every configured switch has been located; pollers keep
    /// running until [`shutdown`](Self::shutdown). An empty device list
    /// tears down everything previously tracked and fails.
    pub async fn run(&mut self) -> Result<(), ConfigError> {
        if self.config.discover_delay_secs > 0 {
            debug!(
                "delaying discovery for {} seconds",
                self.config.discover_delay_secs
            );
            sleep(Duration::from_secs(self.config.discover_delay_secs)).await;
        }

        if self.config.devices.is_empty() {
            error!("invalid config, removing all accessories");
            self.shutdown().await;
            return Err(ConfigError::Empty);
        }

        // Remove whatever is no longer configured, closing its session.
        let configured: HashSet<PeripheralId> = self
            .config
            .devices
            .iter()
            .map(|device| device.id.clone())
            .collect();
        let stale: Vec<PeripheralId> = self
            .restored
            .iter()
            .chain(self.accessories.keys())
            .filter(|id| !configured.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            info!("{id} is not configured, removing...");
            self.drop_accessory(&id).await;
        }

        let poll_interval = Duration::from_secs(self.config.poll_interval_secs);
        let (matched_sender, mut matched_receiver) = mpsc::unbounded_channel();

        let outcome = {
            let coordinator = &mut self.coordinator;
            let accessories = &mut self.accessories;
            let restored = &self.restored;

            let discovery = coordinator.run_discovery(&self.config.devices, matched_sender);
            tokio::pin!(discovery);

            loop {
                tokio::select! {
                    outcome = &mut discovery => break outcome,
                    Some(switch) = matched_receiver.recv() => {
                        Self::register(accessories, restored, switch, poll_interval);
                    }
                }
            }
        };

        // Matches can still be queued when discovery finishes.
        while let Ok(switch) = matched_receiver.try_recv() {
            Self::register(&mut self.accessories, &self.restored, switch, poll_interval);
        }

        outcome
    }

    fn register(
        accessories: &mut HashMap<PeripheralId, AccessoryHandle<R>>,
        restored: &HashSet<PeripheralId>,
        switch: DiscoveredSwitch<R::Peripheral>,
        poll_interval: Duration,
    ) {
        let id = switch.config.id.clone();
        if accessories.contains_key(&id) {
            debug!("accessory {} is already registered", switch.config.name);
            return;
        }
        if restored.contains(&id) {
            debug!("restoring existing accessory {}", switch.config.name);
        } else {
            info!("adding new accessory {}", switch.config.name);
        }

        let accessory = Arc::new(SwitchAccessory::new(
            switch.config.name.clone(),
            switch.session,
        ));
        let poller = accessory.clone().spawn_polling(poll_interval);
        accessories.insert(id, AccessoryHandle { accessory, poller });
    }

    async fn drop_accessory(&mut self, id: &PeripheralId) {
        if let Some(handle) = self.accessories.remove(id) {
            handle.poller.abort();
        }
        if let Some(session) = self.coordinator.remove_session(id) {
            if let Err(err) = session.disconnect().await {
                debug!("failed to disconnect {id}: {err}");
            }
        }
        self.restored.remove(id);
    }

    /// Stops all pollers, disconnects every session and forgets every
    /// tracked identity.
    pub async fn shutdown(&mut self) {
        let ids: Vec<PeripheralId> = self
            .accessories
            .keys()
            .cloned()
            .chain(self.coordinator.session_ids())
            .chain(self.restored.iter().cloned())
            .collect();
        for id in ids {
            self.drop_accessory(&id).await;
        }
    }

    /// The accessory tracked for `id`, if any.
    pub fn accessory(&self, id: &PeripheralId) -> Option<Arc<SwitchAccessory<R::Peripheral>>> {
        self.accessories.get(id).map(|handle| handle.accessory.clone())
    }

    pub fn accessory_count(&self) -> usize {
        self.accessories.len()
    }
}
