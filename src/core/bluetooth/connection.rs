//! Bluetooth connection handling
//! This module connects to and disconnects from peripherals and walks their GATT tree.

use std::time::Duration;

use anyhow::{anyhow, Result};
use bluest::{Adapter, Characteristic, Device};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::core::bluetooth::commands::{CharacteristicWriter, WriteMode};
use crate::core::bluetooth::types::{CharacteristicProps, CharacteristicRecord, ServiceRecord};
use crate::core::decoder::display_uuid;
use crate::error::BleError;

/// Result of walking a device's GATT tree
pub struct DiscoveredGatt {
    pub services: Vec<ServiceRecord>,
    /// Platform handles keyed by their owning service
    pub handles: Vec<(Uuid, Characteristic)>,
}

/// Connection manager for peripherals
#[derive(Clone)]
pub struct ConnectionManager {
    adapter: Adapter,
    connect_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(adapter: Adapter, connect_timeout_secs: u64) -> Self {
        Self {
            adapter,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
        }
    }

    /// Connects to the device unless the platform already has it connected.
    pub async fn connect(&self, device: &Device) -> Result<()> {
        let id = device.id().to_string();
        if device.is_connected().await {
            info!("Device {} already connected", id);
            return Ok(());
        }

        info!("Initiating connection to {}...", id);
        match tokio::time::timeout(self.connect_timeout, self.adapter.connect_device(device)).await
        {
            Ok(result) => result.map_err(BleError::from)?,
            Err(_) => {
                return Err(anyhow!(
                    "Connection to {} timed out after {:?}",
                    id,
                    self.connect_timeout
                ));
            }
        }
        info!("Connected to {}", id);
        Ok(())
    }

    /// Discovers every service and its characteristics.
    pub async fn discover(&self, device: &Device) -> Result<DiscoveredGatt> {
        info!("Discovering services of {}...", device.id());
        let services = device.discover_services().await.map_err(BleError::from)?;

        let mut records = Vec::with_capacity(services.len());
        let mut handles = Vec::new();
        for service in services {
            let service_uuid = service.uuid();
            let mut record = ServiceRecord::new(service_uuid);

            let characteristics = match service.discover_characteristics().await {
                Ok(characteristics) => characteristics,
                Err(e) => {
                    warn!(
                        "Failed to discover characteristics of {}: {}",
                        display_uuid(&service_uuid),
                        e
                    );
                    records.push(record);
                    continue;
                }
            };

            for characteristic in characteristics {
                let props = match characteristic.properties().await {
                    Ok(props) => CharacteristicProps::from(props),
                    Err(e) => {
                        warn!(
                            "Failed to read properties of {}: {}",
                            display_uuid(&characteristic.uuid()),
                            e
                        );
                        CharacteristicProps::default()
                    }
                };
                debug!(
                    "Found characteristic {} in {}",
                    display_uuid(&characteristic.uuid()),
                    display_uuid(&service_uuid)
                );
                record
                    .characteristics
                    .push(CharacteristicRecord::new(characteristic.uuid(), props));
                handles.push((service_uuid, characteristic));
            }
            records.push(record);
        }

        info!(
            "Discovered {} services and {} characteristics",
            records.len(),
            handles.len()
        );
        Ok(DiscoveredGatt {
            services: records,
            handles,
        })
    }

    pub async fn disconnect(&self, device: &Device) -> Result<()> {
        if device.is_connected().await {
            info!("Disconnecting from device {}", device.id());
            self.adapter
                .disconnect_device(device)
                .await
                .map_err(BleError::from)?;
            info!("Successfully disconnected");
        } else {
            info!("Device {} not connected", device.id());
        }
        Ok(())
    }
}

/// Writes through a platform characteristic handle
#[derive(Clone)]
pub struct BluestWriter {
    characteristic: Characteristic,
}

impl BluestWriter {
    pub fn new(characteristic: Characteristic) -> Self {
        Self { characteristic }
    }
}

#[async_trait::async_trait]
impl CharacteristicWriter for BluestWriter {
    fn uuid(&self) -> Uuid {
        self.characteristic.uuid()
    }

    async fn write(&self, data: &[u8], mode: WriteMode) -> Result<()> {
        match mode {
            WriteMode::WithResponse => self.characteristic.write(data).await,
            WriteMode::WithoutResponse => self.characteristic.write_without_response(data).await,
        }
        .map_err(BleError::from)?;
        Ok(())
    }
}
