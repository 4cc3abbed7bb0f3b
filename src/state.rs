//! Application state management
//! This module defines and manages the state shared by every command.

use std::path::{Path, PathBuf};

use anyhow::Result;
use log::info;
use tokio::sync::OnceCell;

use crate::config::auto_connect::AutoConnectStore;
use crate::config::{default_config_path, AppConfig, AUTO_CONNECT_FILE_NAME};
use crate::core::bluetooth::EventHub;
use crate::core::BluetoothManager;

/// Global application state
pub struct AppState {
    pub config: AppConfig,
    pub config_path: PathBuf,
    pub hub: EventHub,
    /// Created on first use, so offline commands work without an adapter
    bluetooth_manager: OnceCell<BluetoothManager>,
}

impl AppState {
    pub async fn new(config_path: Option<PathBuf>, hub: EventHub) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => default_config_path()?,
        };
        let config = AppConfig::load_config(&config_path).await?;
        Ok(Self {
            config,
            config_path,
            hub,
            bluetooth_manager: OnceCell::new(),
        })
    }

    /// The auto-connect list lives next to the config file.
    pub fn auto_connect_path(&self) -> PathBuf {
        self.config_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(AUTO_CONNECT_FILE_NAME)
    }

    /// Gets the Bluetooth manager, initializing the adapter on first call.
    pub async fn bluetooth_manager(&self) -> Result<&BluetoothManager> {
        self.bluetooth_manager
            .get_or_try_init(|| async {
                info!("Initializing BluetoothManager...");
                let auto_connect = AutoConnectStore::load(&self.auto_connect_path()).await?;
                BluetoothManager::new(&self.config, auto_connect, self.hub.clone()).await
            })
            .await
    }

    /// Disconnects everything if the manager was ever created.
    pub async fn shutdown(&self) {
        if let Some(manager) = self.bluetooth_manager.get() {
            manager.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_auto_connect_path_follows_config() {
        let dir = std::env::temp_dir().join(format!("ble-inspector-state-{}", std::process::id()));
        let (hub, _dispatcher) = EventHub::new();
        let state = AppState::new(Some(dir.join("config.json")), hub).await.unwrap();
        assert_eq!(state.auto_connect_path(), dir.join("auto_connect.json"));
        assert_eq!(state.config, AppConfig::default());
    }
}
