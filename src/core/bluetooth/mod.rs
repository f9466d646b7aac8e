//! Bluetooth functionality for the Switchmate bridge
//! This module handles all bluetooth operations including scanning for,
//! connecting to, and reading and writing switch state on Switchmate
//! peripherals.

mod bluest_radio;
mod constants;
mod discovery;
mod error;
#[cfg(test)]
pub(crate) mod mock;
mod radio;
mod session;
mod types;

// Re-export types that should be publicly accessible
pub use bluest_radio::{BluestGattCharacteristic, BluestGattService, BluestPeripheral, BluestRadio};
pub use constants::*; // Re-export all constants
pub use discovery::{DiscoveredSwitch, DiscoveryCoordinator};
pub use error::{
    ConfigError, ConnectError, DisconnectError, DiscoverError, IoError, RadioError,
};
pub use radio::{GattCharacteristic, GattService, Peripheral, Radio, RadioEvent, RadioState};
pub use session::SwitchmateSession;
pub use types::{CapabilitySet, DeviceInformation, PeripheralId, SessionState};
