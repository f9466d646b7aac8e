//! Constants used throughout the bridge
//! This module contains all the constant values used when talking to
//! Switchmate peripherals, such as GATT UUIDs and timeouts.

use std::time::Duration;
use uuid::Uuid;

/// Standard Bluetooth Service UUIDs
pub const UUID_INFORMATION_SERVICE: Uuid = Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_MANUFACTURER_NAME: Uuid = Uuid::from_u128(0x00002a29_0000_1000_8000_00805f9b34fb);
pub const UUID_MODEL_NUMBER: Uuid = Uuid::from_u128(0x00002a24_0000_1000_8000_00805f9b34fb);
pub const UUID_HARDWARE_REVISION: Uuid = Uuid::from_u128(0x00002a27_0000_1000_8000_00805f9b34fb);
pub const UUID_FIRMWARE_REVISION: Uuid = Uuid::from_u128(0x00002a26_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

/// The UUID of the Switchmate vendor power service
pub const UUID_POWER_SERVICE: Uuid = Uuid::from_u128(0xa22bd383_ebdd_49ac_b2e7_40eb55f5d0ab);

/// The UUID of the characteristic reporting the motor's current position
pub const UUID_POWER_CURRENT: Uuid = Uuid::from_u128(0xa22b0070_ebdd_49ac_b2e7_40eb55f5d0ab);

/// The UUID of the characteristic accepting the motor's target position
pub const UUID_POWER_TARGET: Uuid = Uuid::from_u128(0xa22b0090_ebdd_49ac_b2e7_40eb55f5d0ab);

/// Bound for every Bluetooth operation issued by a session
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Battery percentage at or below which a switch reports low battery
pub const LOW_BATTERY_LEVEL: u8 = 10;

/// Default delay before the first scan, in seconds
pub const DEFAULT_DISCOVER_DELAY_SECS: u64 = 0;

/// Default polling cadence for accessory state, in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
