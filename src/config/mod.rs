pub mod assistant_config;
pub mod auto_connect;
pub mod scan_config;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::assistant_config::AssistantConfig;
use crate::config::scan_config::{ConnectionConfig, ScanConfig};
use crate::utils::ensure_directory_exists;

const APP_DIR_NAME: &str = "ble-inspector";
const CONFIG_FILE_NAME: &str = "config.json";
pub const AUTO_CONNECT_FILE_NAME: &str = "auto_connect.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scan: ScanConfig,
    pub connection: ConnectionConfig,
    pub assistant: AssistantConfig,
}

/// Directory holding the config and the auto-connect list.
pub fn app_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| anyhow!("Could not determine the user config directory"))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(app_config_dir()?.join(CONFIG_FILE_NAME))
}

impl AppConfig {
    /// Loads the config, falling back to defaults when the file is missing.
    pub async fn load_config(file_path: &Path) -> Result<Self> {
        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    pub async fn save_config(&self, file_path: &Path) -> Result<()> {
        if let Some(dir) = file_path.parent() {
            ensure_directory_exists(dir).await?;
        }

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path, config_json).await?;
        info!("Config saved to {:?}", file_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("ble-inspector-test-{}-{}", std::process::id(), name))
            .join(CONFIG_FILE_NAME)
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let config = AppConfig::load_config(&temp_path("missing")).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.scan.min_rssi, -100);
        assert_eq!(config.connection.reconnect_delay_secs, 3);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let path = temp_path("save");
        let mut config = AppConfig::default();
        config.scan.auto_probe = true;
        config.assistant.model = "gpt-4o".to_string();
        config.save_config(&path).await.unwrap();

        let loaded = AppConfig::load_config(&path).await.unwrap();
        assert_eq!(loaded, config);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"scan": {"duration_secs": 12}}"#).unwrap();
        assert_eq!(config.scan.duration_secs, 12);
        assert_eq!(config.scan.min_rssi, -100);
        assert_eq!(config.assistant.max_tokens, 250);
    }
}
