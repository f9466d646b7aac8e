//! Platform configuration loading.

use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::{
    DEFAULT_DISCOVER_DELAY_SECS, DEFAULT_POLL_INTERVAL_SECS, PeripheralId,
};

/// One configured Switchmate switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Hardware address of the peripheral; compared case-insensitively.
    pub id: PeripheralId,
    /// Display name of the accessory.
    pub name: String,
}

/// Bridge-wide configuration, read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Seconds to wait before the first scan.
    #[serde(default = "default_discover_delay")]
    pub discover_delay_secs: u64,
    /// Seconds between accessory state refreshes.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

fn default_discover_delay() -> u64 {
    DEFAULT_DISCOVER_DELAY_SECS
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            discover_delay_secs: default_discover_delay(),
            poll_interval_secs: default_poll_interval(),
            devices: Vec::new(),
        }
    }
}

impl PlatformConfig {
    /// Loads the config from a configuration file.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("config file not found at {path:?}, using default");
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file {path:?}"))?;
        let config: Self = serde_json::from_str(&config_json)
            .with_context(|| format!("failed to parse config file {path:?}"))?;

        info!("config loaded from {path:?}");
        Ok(config)
    }
}
