//! Notification handling
//! This module subscribes to characteristic notifications and turns every
//! received value into a transcript line.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use bluest::Characteristic;
use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::constants::UUID_BATTERY_LEVEL;
use crate::core::bluetooth::events::{BleEvent, EventHub};
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::types::CharacteristicProps;
use crate::core::decoder::{display_uuid, format_received};

/// Stores a received value and announces it.
pub async fn publish_value(
    registry: &Mutex<DeviceRegistry>,
    hub: &EventHub,
    device_id: &str,
    uuid: Uuid,
    props: &CharacteristicProps,
    value: Vec<u8>,
) -> String {
    let line = format_received(&uuid, props, &value);
    {
        let mut registry = registry.lock().await;
        if let Err(e) = registry.cache_value(device_id, &uuid, value.clone()) {
            debug!("Value not cached: {}", e);
        }
        if let (true, [level]) = (uuid == UUID_BATTERY_LEVEL, value.as_slice()) {
            if let Err(e) = registry.set_battery_level(device_id, *level) {
                debug!("Battery level not stored: {}", e);
            }
        }
    }
    hub.emit(BleEvent::ValueUpdated {
        id: device_id.to_string(),
        uuid,
        value,
        line: line.clone(),
    });
    line
}

/// Notification handler for subscribed characteristics
#[derive(Clone)]
pub struct NotificationHandler {
    registry: Arc<Mutex<DeviceRegistry>>,
    hub: EventHub,
    subscriptions: Arc<Mutex<HashMap<(String, Uuid), CancellationToken>>>,
}

impl NotificationHandler {
    pub fn new(registry: Arc<Mutex<DeviceRegistry>>, hub: EventHub) -> Self {
        Self {
            registry,
            hub,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribes to a characteristic. An existing subscription to the same
    /// characteristic is replaced.
    pub async fn subscribe(
        &self,
        device_id: &str,
        characteristic: Characteristic,
        props: CharacteristicProps,
    ) -> Result<()> {
        let key = (device_id.to_string(), characteristic.uuid());
        let cancel_token = CancellationToken::new();
        if let Some(previous) = self
            .subscriptions
            .lock()
            .await
            .insert(key, cancel_token.clone())
        {
            previous.cancel();
        }

        info!(
            "Subscribing to notifications of {}...",
            display_uuid(&characteristic.uuid())
        );
        let handler = self.clone();
        let device_id = device_id.to_string();
        tokio::spawn(async move {
            handler
                .process_notifications(device_id, characteristic, props, cancel_token)
                .await;
        });
        Ok(())
    }

    pub async fn unsubscribe(&self, device_id: &str, uuid: &Uuid) {
        let key = (device_id.to_string(), *uuid);
        if let Some(token) = self.subscriptions.lock().await.remove(&key) {
            info!("Unsubscribing from {}", display_uuid(uuid));
            token.cancel();
        }
    }

    /// Drops every subscription of one device.
    pub async fn unsubscribe_device(&self, device_id: &str) {
        self.subscriptions.lock().await.retain(|(id, _), token| {
            if id == device_id {
                token.cancel();
                false
            } else {
                true
            }
        });
    }

    async fn process_notifications(
        &self,
        device_id: String,
        characteristic: Characteristic,
        props: CharacteristicProps,
        cancel_token: CancellationToken,
    ) {
        let uuid = characteristic.uuid();
        let mut stream = match characteristic.notify().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to subscribe to {}: {}", display_uuid(&uuid), e);
                self.hub
                    .status(format!("Failed to subscribe to {}: {}", display_uuid(&uuid), e));
                self.forget(&device_id, &uuid, &cancel_token).await;
                return;
            }
        };
        info!("Listening for notifications of {}...", display_uuid(&uuid));

        loop {
            tokio::select! {
                result = stream.next() => {
                    match result {
                        Some(Ok(value)) => {
                            debug!("Received {:?} from {}", value, display_uuid(&uuid));
                            publish_value(&self.registry, &self.hub, &device_id, uuid, &props, value).await;
                        }
                        Some(Err(e)) => {
                            error!("Error in notification stream: {}", e);
                            break;
                        }
                        None => break,
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }

        self.forget(&device_id, &uuid, &cancel_token).await;
        info!("Notification stream of {} ended", display_uuid(&uuid));
    }

    /// Removes the entry of a stream that ended on its own. A cancelled token
    /// was already removed or replaced.
    async fn forget(&self, device_id: &str, uuid: &Uuid, token: &CancellationToken) {
        if !token.is_cancelled() {
            let key = (device_id.to_string(), *uuid);
            self.subscriptions.lock().await.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::types::{
        AdvertisementRecord, CharacteristicRecord, DiscoveredPeripheral,
    };
    use crate::core::decoder::uuid_from_u16;

    #[tokio::test]
    async fn test_publish_value_caches_and_emits() {
        let battery_service = uuid_from_u16(0x180F);
        let props = CharacteristicProps {
            read: true,
            notify: true,
            ..Default::default()
        };
        let mut registry = DeviceRegistry::new();
        registry.upsert_discovered(DiscoveredPeripheral {
            id: "dev".to_string(),
            name: Some("Band".to_string()),
            rssi: -40,
            advertisement: AdvertisementRecord::default(),
        });
        registry.begin_connect("dev").unwrap();
        registry.mark_connected("dev").unwrap();
        registry.set_services("dev", &[battery_service]).unwrap();
        registry
            .set_characteristics(
                "dev",
                &battery_service,
                vec![CharacteristicRecord::new(UUID_BATTERY_LEVEL, props)],
            )
            .unwrap();
        let registry = Mutex::new(registry);
        let (hub, _dispatcher) = EventHub::new();

        let line =
            publish_value(&registry, &hub, "dev", UUID_BATTERY_LEVEL, &props, vec![0x05]).await;

        assert_eq!(line, "📡 🔋 📖 [2A19] Battery Level: 5%");
        let registry = registry.lock().await;
        let record = registry.get("dev").unwrap();
        assert_eq!(record.battery_level, Some(5));
        assert_eq!(
            record.find_characteristic(&UUID_BATTERY_LEVEL).unwrap().value,
            Some(vec![0x05])
        );
    }

    #[tokio::test]
    async fn test_value_of_unknown_device_is_still_published() {
        let registry = Mutex::new(DeviceRegistry::new());
        let (hub, mut dispatcher) = EventHub::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        struct Lines(Arc<std::sync::Mutex<Vec<String>>>);
        impl crate::core::bluetooth::events::BleObserver for Lines {
            fn on_event(&self, event: &BleEvent) {
                if let BleEvent::ValueUpdated { line, .. } = event {
                    self.0.lock().unwrap().push(line.clone());
                }
            }
        }
        let observer: Arc<dyn crate::core::bluetooth::events::BleObserver> =
            Arc::new(Lines(seen.clone()));
        hub.subscribe(&observer);

        let props = CharacteristicProps::default();
        let line =
            publish_value(&registry, &hub, "gone", UUID_BATTERY_LEVEL, &props, vec![0x05]).await;
        dispatcher.deliver_pending();

        assert_eq!(line, "📡 🔋  [2A19] Battery Level: 5%");
        assert_eq!(*seen.lock().unwrap(), vec![line]);
        assert!(registry.lock().await.get("gone").is_none());
    }
}
