use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::{
    BLUETOOTH_OPERATION_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_MTU, DEFAULT_SCAN_DURATION_MS,
    MAX_MTU, MIN_MTU, RECONNECT_DELAY_MS,
};
use crate::utils::write_json_file;

const CONFIG_FILE_NAME: &str = "session_config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Connect timeout used when the caller does not pass one.
    pub connect_timeout_ms: u64,

    /// Upper bound on any single GATT request (read, write, discovery, MTU, RSSI).
    pub operation_timeout_ms: u64,

    /// Delay before the single reconnect attempt after an unsolicited disconnect.
    pub reconnect_delay_ms: u64,

    /// Scan length used when the caller does not pass scan options.
    pub scan_duration_ms: u64,

    /// Rediscover the full service tree after every successful connect.
    /// Cached handles from the platform are not stable across connections.
    pub rediscover_on_connect: bool,

    /// MTU assumed until a negotiation completes.
    pub default_mtu: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            operation_timeout_ms: BLUETOOTH_OPERATION_TIMEOUT_MS,
            reconnect_delay_ms: RECONNECT_DELAY_MS,
            scan_duration_ms: DEFAULT_SCAN_DURATION_MS,
            rediscover_on_connect: true,
            default_mtu: DEFAULT_MTU,
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// `default_mtu` clamped into the range the ATT protocol allows
    pub fn initial_mtu(&self) -> u16 {
        self.default_mtu.clamp(MIN_MTU, MAX_MTU)
    }

    /// Loads the config from `config_dir`, falling back to defaults when no file exists.
    pub async fn load_config(config_dir: &Path) -> Result<Self> {
        let file_path = config_dir.join(CONFIG_FILE_NAME);
        let file_path_str = file_path.to_string_lossy().into_owned();

        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path_str);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(&file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", file_path_str);
        Ok(config)
    }

    /// Saves the current config into `config_dir`.
    pub async fn save_config(&self, config_dir: &Path) -> Result<()> {
        if let Err(e) = write_json_file(config_dir, CONFIG_FILE_NAME, self).await {
            error!("Failed to save session config: {:#}", e);
            return Err(e);
        }
        info!("Session config saved to {:?}.", config_dir.join(CONFIG_FILE_NAME));
        Ok(())
    }
}
