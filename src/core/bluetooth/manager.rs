//! Bluetooth manager
//! This module provides the main interface for bluetooth operations

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use bluest::{Adapter, Characteristic, ConnectionEvent};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::config::auto_connect::AutoConnectStore;
use crate::config::AppConfig;
use crate::core::bluetooth::commands::{CommandExecutor, UartCommand, WriteMode};
use crate::core::bluetooth::connection::{BluestWriter, ConnectionManager};
use crate::core::bluetooth::constants::{
    UUID_BATTERY_LEVEL, UUID_DEVICE_INFORMATION_SERVICE, UUID_FIRMWARE_REVISION,
    UUID_HARDWARE_REVISION, UUID_MANUFACTURER_NAME, UUID_MODEL_NUMBER, UUID_SERIAL_NUMBER,
};
use crate::core::bluetooth::events::{BleEvent, EventHub};
use crate::core::bluetooth::notification::{publish_value, NotificationHandler};
use crate::core::bluetooth::reconnect::{
    reconnect_after, reconnect_delay_after_loss, ConnectionWatchers,
};
use crate::core::bluetooth::registry::{DeviceFilter, DeviceRegistry};
use crate::core::bluetooth::scanner::{BluetoothScanner, DeviceHandles};
use crate::core::bluetooth::types::{CharacteristicProps, ConnectedDeviceState, PeripheralRecord};
use crate::core::bluetooth::uart::UartSession;
use crate::core::decoder::{decode_value, display_uuid};
use crate::error::BleError;

/// Device Information characteristics in display order
const DEVICE_INFO_FIELDS: [(&str, Uuid); 5] = [
    ("Manufacturer", UUID_MANUFACTURER_NAME),
    ("Model", UUID_MODEL_NUMBER),
    ("Serial Number", UUID_SERIAL_NUMBER),
    ("Firmware", UUID_FIRMWARE_REVISION),
    ("Hardware", UUID_HARDWARE_REVISION),
];

/// Manages Bluetooth operations. Clones share the same state.
#[derive(Clone)]
pub struct BluetoothManager {
    adapter: Adapter,
    /// Bookkeeping of every discovered device
    registry: Arc<Mutex<DeviceRegistry>>,
    /// Platform handles of discovered devices
    handles: DeviceHandles,
    /// Active connections
    connected: Arc<Mutex<HashMap<String, ConnectedDeviceState>>>,
    connection_manager: ConnectionManager,
    scanner: Arc<Mutex<BluetoothScanner>>,
    notification_handler: NotificationHandler,
    watchers: ConnectionWatchers,
    auto_connect: Arc<Mutex<AutoConnectStore>>,
    hub: EventHub,
    reconnect_delay: Duration,
}

impl BluetoothManager {
    pub async fn new(config: &AppConfig, auto_connect: AutoConnectStore, hub: EventHub) -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or(BleError::AdapterUnavailable)?;
        adapter.wait_available().await.map_err(BleError::from)?;
        info!("Bluetooth adapter is available.");

        let registry = Arc::new(Mutex::new(DeviceRegistry::new()));
        let handles: DeviceHandles = Arc::new(Mutex::new(HashMap::new()));
        let scanner = BluetoothScanner::new(
            adapter.clone(),
            registry.clone(),
            handles.clone(),
            hub.clone(),
            config.scan.min_rssi,
        );
        let notification_handler = NotificationHandler::new(registry.clone(), hub.clone());

        Ok(Self {
            connection_manager: ConnectionManager::new(
                adapter.clone(),
                config.connection.connect_timeout_secs,
            ),
            adapter,
            registry,
            handles,
            connected: Arc::new(Mutex::new(HashMap::new())),
            scanner: Arc::new(Mutex::new(scanner)),
            notification_handler,
            watchers: ConnectionWatchers::default(),
            auto_connect: Arc::new(Mutex::new(auto_connect)),
            hub,
            reconnect_delay: Duration::from_secs(config.connection.reconnect_delay_secs),
        })
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Starts discovery. The receiver yields identifiers of newly seen devices.
    pub async fn start_scan(&self) -> Result<mpsc::UnboundedReceiver<String>> {
        self.scanner.lock().await.start_scan().await
    }

    pub async fn stop_scan(&self) -> Result<()> {
        self.scanner.lock().await.stop_scan().await
    }

    /// Scans until the device is seen or the timeout elapses.
    pub async fn wait_for_device(&self, id: &str, timeout: Duration) -> Result<()> {
        if self.handles.lock().await.contains_key(id) {
            return Ok(());
        }
        let mut new_devices = self.start_scan().await?;
        let found = tokio::time::timeout(timeout, async {
            while let Some(seen) = new_devices.recv().await {
                if seen == id {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false);
        self.stop_scan().await?;

        if found {
            Ok(())
        } else {
            Err(BleError::DeviceNotFound(id.to_string()).into())
        }
    }

    pub async fn devices(&self, filter: DeviceFilter) -> Vec<PeripheralRecord> {
        self.registry
            .lock()
            .await
            .filter(filter)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn device(&self, id: &str) -> Option<PeripheralRecord> {
        self.registry.lock().await.get(id).cloned()
    }

    /// Connects to a discovered device and discovers its GATT tree.
    pub async fn connect_device(&self, id: &str) -> Result<()> {
        if self.connected.lock().await.contains_key(id) {
            info!("Device {} already connected.", id);
            return Ok(());
        }
        let device = self
            .handles
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| BleError::DeviceNotFound(id.to_string()))?;

        self.registry.lock().await.begin_connect(id)?;
        self.publish_devices().await;
        self.hub.status(format!("Connecting to {}...", id));

        if let Err(e) = self.connection_manager.connect(&device).await {
            warn!("Failed to connect to {}: {}", id, e);
            self.registry.lock().await.mark_disconnected(id)?;
            self.publish_devices().await;
            self.hub.status(format!("Failed to connect to {}: {}", id, e));
            return Err(e);
        }

        self.registry.lock().await.mark_connected(id)?;
        self.connected.lock().await.insert(
            id.to_string(),
            ConnectedDeviceState {
                device: device.clone(),
                characteristics: Vec::new(),
            },
        );
        self.hub.emit(BleEvent::DeviceConnected { id: id.to_string() });
        self.spawn_connection_watcher(id.to_string());

        if let Err(e) = self.discover(id).await {
            error!("Service discovery of {} failed: {}", id, e);
            self.hub.status(format!("Service discovery failed: {}", e));
        }
        info!("Device {} connected and discovered.", id);
        Ok(())
    }

    /// Rediscovers services and characteristics of a connected device.
    pub async fn discover(&self, id: &str) -> Result<()> {
        let device = self.connected_state(id).await?.device;
        let gatt = self.connection_manager.discover(&device).await?;

        {
            let mut registry = self.registry.lock().await;
            let service_uuids: Vec<Uuid> = gatt.services.iter().map(|s| s.uuid).collect();
            registry.set_services(id, &service_uuids)?;
            for service in gatt.services {
                registry.set_characteristics(id, &service.uuid, service.characteristics)?;
            }
        }
        if let Some(state) = self.connected.lock().await.get_mut(id) {
            state.characteristics = gatt.handles;
        }
        self.publish_devices().await;
        Ok(())
    }

    /// Disconnects on request. No reconnect is scheduled.
    pub async fn disconnect(&self, id: &str) -> Result<()> {
        self.watchers.cancel(id);
        let state = self
            .connected
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| BleError::NotConnected(id.to_string()))?;

        self.notification_handler.unsubscribe_device(id).await;
        let result = self.connection_manager.disconnect(&state.device).await;
        self.registry.lock().await.mark_disconnected(id)?;
        self.hub.emit(BleEvent::DeviceDisconnected { id: id.to_string() });
        self.publish_devices().await;
        result
    }

    pub async fn disconnect_all(&self) {
        let ids: Vec<String> = self.connected.lock().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.disconnect(&id).await {
                warn!("Failed to disconnect {}: {}", id, e);
            }
        }
    }

    /// Reads a characteristic and returns its transcript line.
    pub async fn read_characteristic(&self, id: &str, uuid: &Uuid) -> Result<String> {
        let (characteristic, props) = self.characteristic(id, uuid).await?;
        if !props.read {
            return Err(unsupported(uuid, "read"));
        }
        let value = characteristic.read().await.map_err(BleError::from)?;
        Ok(publish_value(&self.registry, &self.hub, id, *uuid, &props, value).await)
    }

    pub async fn write_characteristic(
        &self,
        id: &str,
        uuid: &Uuid,
        data: Vec<u8>,
        mode: WriteMode,
    ) -> Result<String> {
        self.send_command(id, uuid, UartCommand::Raw { data, mode })
            .await
    }

    /// Writes a command and returns its transcript line.
    pub async fn send_command(&self, id: &str, uuid: &Uuid, command: UartCommand) -> Result<String> {
        let (characteristic, props) = self.characteristic(id, uuid).await?;
        let supported = match command.write_mode() {
            WriteMode::WithResponse => props.write,
            WriteMode::WithoutResponse => props.write_without_response,
        };
        if !supported {
            return Err(unsupported(uuid, "this write type"));
        }
        let executor = CommandExecutor::new(BluestWriter::new(characteristic));
        let line = executor.send(&command).await?;
        self.hub.status(line.clone());
        Ok(line)
    }

    /// Subscribes to notifications or indications of a characteristic.
    pub async fn listen(&self, id: &str, uuid: &Uuid) -> Result<()> {
        let (characteristic, props) = self.characteristic(id, uuid).await?;
        if !props.is_subscribable() {
            return Err(unsupported(uuid, "notify"));
        }
        self.notification_handler
            .subscribe(id, characteristic, props)
            .await
    }

    pub async fn stop_listening(&self, id: &str, uuid: &Uuid) {
        self.notification_handler.unsubscribe(id, uuid).await;
    }

    /// Reads the Device Information service. Missing fields are skipped.
    pub async fn read_device_info(&self, id: &str) -> Result<Vec<(&'static str, String)>> {
        let state = self.connected_state(id).await?;
        let mut info = Vec::new();
        for (label, uuid) in DEVICE_INFO_FIELDS {
            let Some((_, characteristic)) = state
                .characteristics
                .iter()
                .find(|(service, c)| *service == UUID_DEVICE_INFORMATION_SERVICE && c.uuid() == uuid)
            else {
                continue;
            };
            match characteristic.read().await {
                Ok(value) => {
                    if let Err(e) = self.registry.lock().await.cache_value(id, &uuid, value.clone()) {
                        debug!("Value not cached: {}", e);
                    }
                    info.push((label, decode_value(&uuid, &value)));
                }
                Err(e) => warn!("Failed to read {}: {}", label, e),
            }
        }
        if info.is_empty() {
            return Err(BleError::ServiceNotFound(display_uuid(&UUID_DEVICE_INFORMATION_SERVICE)).into());
        }
        Ok(info)
    }

    pub async fn read_battery_level(&self, id: &str) -> Result<Option<u8>> {
        let (characteristic, _) = match self.characteristic(id, &UUID_BATTERY_LEVEL).await {
            Ok(found) => found,
            Err(e) => {
                info!("No battery level on {}: {}", id, e);
                return Ok(None);
            }
        };
        let value = characteristic.read().await.map_err(BleError::from)?;
        let level = value
            .first()
            .copied()
            .ok_or_else(|| anyhow!("No battery level data received"))?;
        self.registry.lock().await.set_battery_level(id, level)?;
        self.publish_devices().await;
        Ok(Some(level))
    }

    /// Sends the immediate alert command.
    pub async fn find_me(&self, id: &str, uuid: &Uuid) -> Result<String> {
        self.send_command(id, uuid, UartCommand::FindMe).await
    }

    /// Requests logged data of an FM data logger for a time range.
    pub async fn fm_get(
        &self,
        id: &str,
        uuid: &Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        all: bool,
    ) -> Result<String> {
        if end < start {
            return Err(anyhow!("End time {} is before start time {}", end, start));
        }
        self.send_command(id, uuid, UartCommand::FmGet { start, end, all })
            .await
    }

    /// Opens a UART session and starts listening to the first notifying characteristic.
    pub async fn open_uart(&self, id: &str, tx: Option<Uuid>) -> Result<UartSession> {
        let record = self
            .device(id)
            .await
            .ok_or_else(|| BleError::DeviceNotFound(id.to_string()))?;
        let mut session = UartSession::new(&record, &self.hub);
        session.select_tx(tx)?;
        if let Some(uuid) = session.initial_listening() {
            self.uart_select_listening(&mut session, uuid).await?;
        }
        Ok(session)
    }

    /// Moves the UART session to another listening characteristic.
    pub async fn uart_select_listening(&self, session: &mut UartSession, uuid: Uuid) -> Result<()> {
        if let Some(previous) = session.select_listening(uuid)? {
            self.stop_listening(session.device_id(), &previous).await;
        }
        self.listen(session.device_id(), &uuid).await
    }

    pub async fn uart_send(&self, session: &UartSession, text: &str) -> Result<()> {
        let tx = session.tx().ok_or(BleError::NoWritableCharacteristic)?;
        let line = self
            .send_command(session.device_id(), &tx, UartCommand::Line(text.to_string()))
            .await?;
        session.record_sent(line);
        Ok(())
    }

    pub async fn auto_connect_add(&self, id: &str) -> Result<bool> {
        self.auto_connect.lock().await.add(id).await
    }

    pub async fn auto_connect_remove(&self, id: &str) -> Result<bool> {
        self.auto_connect.lock().await.remove(id).await
    }

    pub async fn auto_connect_list(&self) -> Vec<String> {
        self.auto_connect.lock().await.list().to_vec()
    }

    pub async fn is_auto_connect(&self, id: &str) -> bool {
        self.auto_connect.lock().await.contains(id)
    }

    /// Connects to every auto-connect device whose handle is known.
    pub async fn auto_reconnect(&self) {
        for id in self.auto_connect_list().await {
            if !self.handles.lock().await.contains_key(&id) {
                info!("Auto-connect device {} not seen yet", id);
                continue;
            }
            if let Err(e) = self.connect_device(&id).await {
                warn!("Auto-connect to {} failed: {}", id, e);
            }
        }
    }

    /// Stops scanning and drops every connection.
    pub async fn shutdown(&self) {
        if let Err(e) = self.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
        self.disconnect_all().await;
    }

    async fn connected_state(&self, id: &str) -> Result<ConnectedDeviceState, BleError> {
        self.connected
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| BleError::NotConnected(id.to_string()))
    }

    async fn characteristic(&self, id: &str, uuid: &Uuid) -> Result<(Characteristic, CharacteristicProps), BleError> {
        let state = self.connected_state(id).await?;
        let characteristic = state
            .characteristic(uuid)
            .cloned()
            .ok_or_else(|| BleError::CharacteristicNotFound(display_uuid(uuid)))?;
        let props = self
            .registry
            .lock()
            .await
            .get(id)
            .and_then(|record| record.find_characteristic(uuid))
            .map(|record| record.props)
            .unwrap_or_default();
        Ok((characteristic, props))
    }

    async fn publish_devices(&self) {
        let snapshot = self.registry.lock().await.list().to_vec();
        self.hub.emit(BleEvent::DevicesUpdated(snapshot));
    }

    /// Watches the link and handles a disconnect the user did not ask for.
    fn spawn_connection_watcher(&self, id: String) {
        let manager = self.clone();
        let cancel_token = self.watchers.start(&id);
        tokio::spawn(async move {
            let Some(device) = manager.handles.lock().await.get(&id).cloned() else {
                return;
            };
            let adapter = manager.adapter.clone();
            let mut events = match adapter.device_connection_events(&device).await {
                Ok(events) => events,
                Err(e) => {
                    warn!("Cannot watch connection of {}: {}", id, e);
                    return;
                }
            };
            let link_dropped = async {
                while let Some(event) = events.next().await {
                    if matches!(event, ConnectionEvent::Disconnected) {
                        break;
                    }
                }
            };
            tokio::select! {
                _ = link_dropped => {}
                _ = cancel_token.cancelled() => return,
            }
            if manager.watchers.finish(&id, &cancel_token) {
                manager.handle_lost_connection(id).await;
            }
        });
    }

    async fn handle_lost_connection(&self, id: String) {
        self.connected.lock().await.remove(&id);
        let delay = reconnect_delay_after_loss(
            &self.registry,
            &self.auto_connect,
            &id,
            self.reconnect_delay,
        )
        .await;

        warn!("Device {} disconnected", id);
        self.notification_handler.unsubscribe_device(&id).await;
        self.hub.emit(BleEvent::DeviceDisconnected { id: id.clone() });
        self.publish_devices().await;

        if let Some(delay) = delay {
            info!("Reconnecting to {} in {:?}", id, delay);
            self.hub.status(format!("Reconnecting to {}...", id));
            if let Err(e) = reconnect_after(delay, self.clone().reconnect(id.clone())).await {
                warn!("Reconnect to {} failed: {}", id, e);
                self.hub.status(format!("Reconnect to {} failed: {}", id, e));
            }
        }
    }

    // Boxed to break the connect -> watcher -> connect future cycle
    fn reconnect(self, id: String) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move { self.connect_device(&id).await })
    }
}

fn unsupported(uuid: &Uuid, operation: &'static str) -> anyhow::Error {
    BleError::Unsupported {
        uuid: display_uuid(uuid),
        operation,
    }
    .into()
}
