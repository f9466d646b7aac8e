use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use log::info;

use switchmate_bridge::config::PlatformConfig;
use switchmate_bridge::core::bluetooth::BluestRadio;
use switchmate_bridge::platform::SwitchmatePlatform;

const DEFAULT_CONFIG_FILE: &str = "switchmate.json";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = PlatformConfig::load(&config_path).await?;

    let radio = Arc::new(BluestRadio::new().await?);
    let mut platform = SwitchmatePlatform::new(config, radio);

    platform.run().await?;
    info!("all switches discovered, polling (press ctrl-c to exit)");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    platform.shutdown().await;
    Ok(())
}
