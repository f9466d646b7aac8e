//! Defines shared data structures for the Bluetooth module.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Stable identity of a physical peripheral.
///
/// Wraps the hardware address (MAC address on most platforms) normalized to
/// lower case, so comparisons between configuration entries and discovered
/// peripherals are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralId(String);

impl PeripheralId {
    /// Creates an identity from a raw address string, normalizing case.
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl Serialize for PeripheralId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PeripheralId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|raw| PeripheralId::new(&raw))
    }
}

/// Connection lifecycle of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No link to the peripheral.
    Disconnected,
    /// A connect request is in flight.
    Connecting,
    /// Link is up, capabilities not yet resolved.
    Connected,
    /// Link is up and all required characteristics are cached.
    Ready,
    /// A disconnect request is in flight.
    Disconnecting,
}

/// Characteristic handles resolved for one connection.
///
/// Constructed only when every required characteristic of every required
/// service resolved, so a populated set is always complete. Handles are valid
/// for the connection they were discovered on and must be dropped when the
/// link goes down.
#[derive(Debug, Clone)]
pub struct CapabilitySet<C> {
    /// Battery level characteristic.
    pub battery: C,
    /// Current motor position characteristic.
    pub motor_current: C,
    /// Target motor position characteristic.
    pub motor_target: C,
}

/// Cosmetic metadata read from the device-information service.
///
/// Fields keep their placeholder value when the peripheral does not expose
/// the corresponding characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInformation {
    pub manufacturer: String,
    pub model: String,
    pub hardware_revision: String,
    pub firmware_revision: String,
}

impl Default for DeviceInformation {
    fn default() -> Self {
        Self {
            manufacturer: "Default Manufacturer".to_string(),
            model: "Default Model".to_string(),
            hardware_revision: "Default Hardware Revision".to_string(),
            firmware_revision: "Default Firmware Revision".to_string(),
        }
    }
}
