//! Link loss handling
//! Decides whether a dropped link is reconnected, and keeps one cancellable
//! watcher per live connection.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::Result;
use log::{error, info};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::auto_connect::AutoConnectStore;
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::types::ConnectionState;

/// Marks a device whose link dropped as disconnected and returns how long to
/// wait before the single reconnect attempt.
///
/// Returns `None` when the device was not connected anymore (an explicit
/// disconnect already handled it) or is not in the auto-connect set.
pub async fn reconnect_delay_after_loss(
    registry: &Mutex<DeviceRegistry>,
    auto_connect: &Mutex<AutoConnectStore>,
    id: &str,
    delay: Duration,
) -> Option<Duration> {
    {
        let mut registry = registry.lock().await;
        if registry.get(id).map(|record| record.state) != Some(ConnectionState::Connected) {
            return None;
        }
        if let Err(e) = registry.mark_disconnected(id) {
            error!("{}", e);
            return None;
        }
    }

    if auto_connect.lock().await.contains(id) {
        Some(delay)
    } else {
        info!("Device {} is not in auto-connect, not reconnecting", id);
        None
    }
}

/// Waits `delay`, then makes exactly one attempt.
pub async fn reconnect_after<F>(delay: Duration, attempt: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::time::sleep(delay).await;
    attempt.await
}

/// Cancellation tokens of the connection watchers, one per device.
#[derive(Clone, Default)]
pub struct ConnectionWatchers {
    tokens: Arc<StdMutex<HashMap<String, CancellationToken>>>,
}

impl ConnectionWatchers {
    /// Registers a new watcher, cancelling the one it replaces.
    pub fn start(&self, id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = tokens.insert(id.to_string(), token.clone()) {
            previous.cancel();
        }
        token
    }

    pub fn cancel(&self, id: &str) {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = tokens.remove(id) {
            token.cancel();
        }
    }

    /// Called by a watcher that saw its link drop. Returns false when the
    /// watcher was cancelled or replaced in the meantime.
    pub fn finish(&self, id: &str, token: &CancellationToken) -> bool {
        if token.is_cancelled() {
            return false;
        }
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.remove(id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::types::{AdvertisementRecord, DiscoveredPeripheral};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DELAY: Duration = Duration::from_secs(3);

    fn connected_registry(id: &str) -> Mutex<DeviceRegistry> {
        let mut registry = DeviceRegistry::new();
        registry.upsert_discovered(DiscoveredPeripheral {
            id: id.to_string(),
            name: Some("Tracker".to_string()),
            rssi: -55,
            advertisement: AdvertisementRecord::default(),
        });
        registry.begin_connect(id).unwrap();
        registry.mark_connected(id).unwrap();
        Mutex::new(registry)
    }

    async fn store(name: &str, ids: &[&str]) -> Mutex<AutoConnectStore> {
        let path = std::env::temp_dir()
            .join(format!("ble-inspector-reconnect-{}-{}", std::process::id(), name))
            .join("auto_connect.json");
        let _ = std::fs::remove_file(&path);
        let mut store = AutoConnectStore::load(&path).await.unwrap();
        for id in ids {
            store.add(id).await.unwrap();
        }
        Mutex::new(store)
    }

    #[tokio::test]
    async fn test_auto_connect_device_is_reconnected_after_delay() {
        let registry = connected_registry("tracker");
        let auto_connect = store("auto", &["tracker"]).await;

        let delay = reconnect_delay_after_loss(&registry, &auto_connect, "tracker", DELAY).await;

        assert_eq!(delay, Some(DELAY));
        let state = registry.lock().await.get("tracker").unwrap().state;
        assert_eq!(state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_other_device_is_only_marked_disconnected() {
        let registry = connected_registry("tracker");
        let auto_connect = store("manual", &[]).await;

        let delay = reconnect_delay_after_loss(&registry, &auto_connect, "tracker", DELAY).await;

        assert_eq!(delay, None);
        let state = registry.lock().await.get("tracker").unwrap().state;
        assert_eq!(state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_explicit_disconnect_is_not_reconnected() {
        let registry = connected_registry("tracker");
        registry.lock().await.mark_disconnected("tracker").unwrap();
        let auto_connect = store("explicit", &["tracker"]).await;

        let delay = reconnect_delay_after_loss(&registry, &auto_connect, "tracker", DELAY).await;

        assert_eq!(delay, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_after_delay() {
        let attempts = AtomicUsize::new(0);
        let started = tokio::time::Instant::now();

        let result = reconnect_after(DELAY, async {
            attempts.fetch_add(1, Ordering::SeqCst);
            assert!(started.elapsed() >= DELAY);
            Err(anyhow::anyhow!("still out of range"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replaced_watcher_does_not_handle_loss() {
        let watchers = ConnectionWatchers::default();
        let old = watchers.start("tracker");
        let current = watchers.start("tracker");

        assert!(old.is_cancelled());
        assert!(!watchers.finish("tracker", &old));
        assert!(watchers.finish("tracker", &current));
    }

    #[test]
    fn test_disconnect_cancels_watcher() {
        let watchers = ConnectionWatchers::default();
        let token = watchers.start("tracker");
        watchers.cancel("tracker");

        assert!(token.is_cancelled());
        assert!(!watchers.finish("tracker", &token));
    }
}
