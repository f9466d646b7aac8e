//! Peripheral discovery for configured Switchmate switches
//! This module turns the configured device list into live sessions,
//! tolerating an unreliable scan process: it matches advertisements against
//! configuration, stops scanning once every configured switch is located,
//! and restarts the scan when the radio stops it early.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::config::DeviceConfig;
use crate::core::bluetooth::constants::UUID_POWER_SERVICE;
use crate::core::bluetooth::error::ConfigError;
use crate::core::bluetooth::radio::{Peripheral, Radio, RadioEvent, RadioState};
use crate::core::bluetooth::session::SwitchmateSession;
use crate::core::bluetooth::types::PeripheralId;

/// A configured switch matched to a live peripheral.
pub struct DiscoveredSwitch<P: Peripheral> {
    pub config: DeviceConfig,
    pub session: Arc<SwitchmateSession<P>>,
}

/// Finds configured peripherals over the air and owns their sessions.
///
/// Sessions persist for the coordinator lifetime: re-running discovery
/// reuses the existing session for an identity instead of creating a second
/// one.
pub struct DiscoveryCoordinator<R: Radio> {
    radio: Arc<R>,
    sessions: HashMap<PeripheralId, Arc<SwitchmateSession<R::Peripheral>>>,
}

impl<R: Radio> DiscoveryCoordinator<R> {
    pub fn new(radio: Arc<R>) -> Self {
        Self {
            radio,
            sessions: HashMap::new(),
        }
    }

    /// Scans until every configured device has been located, sending each
    /// match on `matched` as it happens.
    ///
    /// Fails fast without scanning when `configs` is empty; the caller
    /// should drop all previously tracked state. Scanning is deferred until
    /// the radio reports powered-on; any other power-state report is fatal
    /// for this attempt.
    pub async fn run_discovery(
        &mut self,
        configs: &[DeviceConfig],
        matched: mpsc::UnboundedSender<DiscoveredSwitch<R::Peripheral>>,
    ) -> Result<(), ConfigError> {
        if configs.is_empty() {
            return Err(ConfigError::Empty);
        }

        let targets: HashSet<PeripheralId> =
            configs.iter().map(|config| config.id.clone()).collect();
        let mut found: HashSet<PeripheralId> = HashSet::new();
        let mut events = self.radio.events();

        match self.radio.state().await {
            RadioState::PoweredOn => self.start_scan().await,
            state => info!("radio is not powered on ({state:?}), waiting for it to power on"),
        }

        while found != targets {
            let Some(event) = events.recv().await else {
                warn!("radio event stream closed, abandoning discovery");
                break;
            };
            match event {
                RadioEvent::Discovered(peripheral) => {
                    let id = peripheral.id();
                    if found.contains(&id) {
                        debug!("peripheral {id} has already been discovered");
                        continue;
                    }
                    let Some(config) = configs.iter().find(|config| config.id == id) else {
                        debug!("peripheral {id} is not in config");
                        continue;
                    };

                    info!("discovered peripheral {id} ({})", config.name);
                    found.insert(id.clone());
                    let session = self
                        .sessions
                        .entry(id)
                        .or_insert_with(|| Arc::new(SwitchmateSession::new(peripheral)))
                        .clone();
                    let _ = matched.send(DiscoveredSwitch {
                        config: config.clone(),
                        session,
                    });

                    if found == targets {
                        info!("discovered all configured peripherals, stopping scan");
                        if let Err(err) = self.radio.stop_scan().await {
                            error!("failed to stop scanning: {err}");
                        }
                    }
                }
                RadioEvent::ScanStopped => {
                    if found != targets {
                        warn!("scan stopped before all peripherals were found, restarting");
                        self.start_scan().await;
                    }
                }
                RadioEvent::StateChanged(RadioState::PoweredOn) => {
                    info!("radio is powered on");
                    self.start_scan().await;
                }
                RadioEvent::StateChanged(state) => {
                    error!("radio is not powered on but in {state:?} state");
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    async fn start_scan(&self) {
        debug!("starting scan for the switchmate power service");
        if let Err(err) = self.radio.start_scan(&[UUID_POWER_SERVICE]).await {
            error!("failed to start scanning: {err}");
        }
    }

    /// The session owned for `id`, if one was ever created.
    pub fn session(&self, id: &PeripheralId) -> Option<Arc<SwitchmateSession<R::Peripheral>>> {
        self.sessions.get(id).cloned()
    }

    /// Releases ownership of the session for `id`.
    pub fn remove_session(
        &mut self,
        id: &PeripheralId,
    ) -> Option<Arc<SwitchmateSession<R::Peripheral>>> {
        self.sessions.remove(id)
    }

    /// Identities with a live session.
    pub fn session_ids(&self) -> Vec<PeripheralId> {
        self.sessions.keys().cloned().collect()
    }
}
