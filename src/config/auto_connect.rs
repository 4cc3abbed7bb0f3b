use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{info, warn};
use tokio::fs;

use crate::utils::ensure_directory_exists;

/// Persisted, ordered set of device identifiers to reconnect to.
/// Every mutation is written through to disk.
#[derive(Debug, Clone)]
pub struct AutoConnectStore {
    path: PathBuf,
    ids: Vec<String>,
}

impl AutoConnectStore {
    pub async fn load(path: &Path) -> Result<Self> {
        let ids = if path.exists() {
            let json = fs::read_to_string(path).await?;
            let ids: Vec<String> = serde_json::from_str(&json)?;
            info!("Loaded {} auto-connect devices from {:?}", ids.len(), path);
            ids
        } else {
            warn!("Auto-connect file not found at {:?}, starting empty.", path);
            Vec::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            ids,
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|known| known == id)
    }

    pub fn list(&self) -> &[String] {
        &self.ids
    }

    /// Returns false if the device was already in the set.
    pub async fn add(&mut self, id: &str) -> Result<bool> {
        if self.contains(id) {
            return Ok(false);
        }
        self.ids.push(id.to_string());
        self.persist().await?;
        Ok(true)
    }

    /// Returns false if the device was not in the set.
    pub async fn remove(&mut self, id: &str) -> Result<bool> {
        let before = self.ids.len();
        self.ids.retain(|known| known != id);
        if self.ids.len() == before {
            return Ok(false);
        }
        self.persist().await?;
        Ok(true)
    }

    async fn persist(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            ensure_directory_exists(dir).await?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.ids)?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("ble-inspector-autoconnect-{}-{}", std::process::id(), name))
            .join("auto_connect.json")
    }

    #[tokio::test]
    async fn test_set_survives_reload() {
        let path = temp_path("reload");
        let mut store = AutoConnectStore::load(&path).await.unwrap();
        assert!(store.list().is_empty());

        assert!(store.add("dev-a").await.unwrap());
        assert!(store.add("dev-b").await.unwrap());
        assert!(!store.add("dev-a").await.unwrap());

        let mut reloaded = AutoConnectStore::load(&path).await.unwrap();
        assert_eq!(reloaded.list(), ["dev-a", "dev-b"]);

        assert!(reloaded.remove("dev-a").await.unwrap());
        assert!(!reloaded.remove("dev-a").await.unwrap());

        let reloaded = AutoConnectStore::load(&path).await.unwrap();
        assert!(!reloaded.contains("dev-a"));
        assert!(reloaded.contains("dev-b"));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
