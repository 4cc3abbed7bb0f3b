//! Device discovery
//! Runs the platform scan in a background task and folds every advertisement
//! into the device registry.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use bluest::{Adapter, AdvertisingDevice, Device};
use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::events::{BleEvent, EventHub};
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::types::{AdvertisementRecord, DiscoveredPeripheral};

/// Platform device handles keyed by identifier
pub type DeviceHandles = Arc<Mutex<HashMap<String, Device>>>;

pub struct BluetoothScanner {
    adapter: Adapter,
    registry: Arc<Mutex<DeviceRegistry>>,
    handles: DeviceHandles,
    hub: EventHub,
    min_rssi: i16,
    cancel_token: CancellationToken,
    scan_task_handle: Option<JoinHandle<Result<()>>>,
}

impl BluetoothScanner {
    pub fn new(
        adapter: Adapter,
        registry: Arc<Mutex<DeviceRegistry>>,
        handles: DeviceHandles,
        hub: EventHub,
        min_rssi: i16,
    ) -> Self {
        Self {
            adapter,
            registry,
            handles,
            hub,
            min_rssi,
            cancel_token: CancellationToken::new(),
            scan_task_handle: None,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Starts scanning. The returned channel yields the identifier of every
    /// device seen for the first time.
    pub async fn start_scan(&mut self) -> Result<mpsc::UnboundedReceiver<String>> {
        if self.scan_task_handle.is_some() {
            self.stop_scan().await?;
        }

        self.cancel_token = CancellationToken::new();
        let (new_device_tx, new_device_rx) = mpsc::unbounded_channel();
        let task = ScanTask {
            adapter: self.adapter.clone(),
            registry: self.registry.clone(),
            handles: self.handles.clone(),
            hub: self.hub.clone(),
            min_rssi: self.min_rssi,
            new_device_tx,
        };
        let cancel_token = self.cancel_token.clone();

        let handle = tokio::spawn(async move {
            let result = task.run(cancel_token).await;
            if let Err(e) = &result {
                error!("Scan task failed: {}", e);
                task.hub.status(format!("Scan failed: {}", e));
            }
            task.hub.emit(BleEvent::ScanComplete);
            result
        });
        self.scan_task_handle = Some(handle);

        self.hub.emit(BleEvent::ScanStarted);
        info!("Device scan task started.");
        Ok(new_device_rx)
    }

    pub async fn stop_scan(&mut self) -> Result<()> {
        info!("Stopping Bluetooth scan.");
        self.cancel_token.cancel();

        if let Some(handle) = self.scan_task_handle.take() {
            match handle.await {
                Ok(Ok(())) => info!("Scan task finished."),
                Ok(Err(e)) => error!("Scan task finished with an error: {:?}", e),
                Err(e) if e.is_cancelled() => info!("Scan task was cancelled."),
                Err(e) => error!("Scan task finished with an unexpected join error: {:?}", e),
            }
        } else {
            info!("No active scan task handle found to wait for.");
        }
        Ok(())
    }
}

struct ScanTask {
    adapter: Adapter,
    registry: Arc<Mutex<DeviceRegistry>>,
    handles: DeviceHandles,
    hub: EventHub,
    min_rssi: i16,
    new_device_tx: mpsc::UnboundedSender<String>,
}

impl ScanTask {
    async fn run(&self, cancel_token: CancellationToken) -> Result<()> {
        // Connected devices do not advertise
        info!("Checking for connected devices");
        for device in self.adapter.connected_devices().await? {
            let rssi = device.rssi().await.unwrap_or(0);
            let discovered = DiscoveredPeripheral {
                id: device.id().to_string(),
                name: device.name().ok(),
                rssi,
                advertisement: AdvertisementRecord::default(),
            };
            self.record(device, discovered).await;
        }

        info!("Starting bluetooth scan");
        let mut scan_stream = self.adapter.scan(&[]).await?;

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(advertising) => self.handle_advertisement(advertising).await,
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }
        Ok(())
    }

    async fn handle_advertisement(&self, advertising: AdvertisingDevice) {
        let device = advertising.device;
        let adv_data = advertising.adv_data;
        let rssi = advertising.rssi.unwrap_or(i16::MIN);
        if rssi < self.min_rssi {
            debug!("Ignoring weak advertisement from {} ({} dBm)", device.id(), rssi);
            return;
        }

        let discovered = DiscoveredPeripheral {
            id: device.id().to_string(),
            name: adv_data.local_name.clone().or_else(|| device.name().ok()),
            rssi,
            advertisement: AdvertisementRecord::from(&adv_data),
        };
        self.record(device, discovered).await;
    }

    async fn record(&self, device: Device, discovered: DiscoveredPeripheral) {
        let id = discovered.id.clone();
        debug!("Found device - ID: {}, Name: {:?}, RSSI: {}", id, discovered.name, discovered.rssi);

        self.handles.lock().await.insert(id.clone(), device);
        let (is_new, snapshot) = {
            let mut registry = self.registry.lock().await;
            let is_new = registry.upsert_discovered(discovered);
            (is_new, registry.list().to_vec())
        };

        if is_new {
            info!("Discovered new device {}", id);
            let _ = self.new_device_tx.send(id);
        }
        self.hub.emit(BleEvent::DevicesUpdated(snapshot));
    }
}
