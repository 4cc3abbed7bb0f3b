//! Defines shared data structures for the Bluetooth module.

use std::collections::BTreeMap;

use bluest::{AdvertisementData, Characteristic, CharacteristicProperties, Device};
use chrono::{DateTime, Local};
use serde::Serialize;
use uuid::Uuid;

use crate::core::decoder::{self, UNKNOWN_MANUFACTURER};

/// Connection state of a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Whether `next` is a legal successor of this state.
    ///
    /// The cycle is disconnected -> connecting -> connected -> disconnected.
    /// A connection attempt that fails goes back from connecting to disconnected.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
        )
    }
}

/// GATT characteristic property bit-set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CharacteristicProps {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
    pub broadcast: bool,
    pub authenticated_signed_writes: bool,
    pub extended_properties: bool,
}

impl CharacteristicProps {
    pub fn is_writable(&self) -> bool {
        self.write || self.write_without_response
    }

    pub fn is_subscribable(&self) -> bool {
        self.notify || self.indicate
    }
}

impl From<CharacteristicProperties> for CharacteristicProps {
    fn from(props: CharacteristicProperties) -> Self {
        Self {
            read: props.read,
            write: props.write,
            write_without_response: props.write_without_response,
            notify: props.notify,
            indicate: props.indicate,
            broadcast: props.broadcast,
            authenticated_signed_writes: props.authenticated_signed_writes,
            extended_properties: props.extended_properties,
        }
    }
}

/// A discovered characteristic and its last known value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacteristicRecord {
    pub uuid: Uuid,
    pub props: CharacteristicProps,
    pub value: Option<Vec<u8>>,
}

impl CharacteristicRecord {
    pub fn new(uuid: Uuid, props: CharacteristicProps) -> Self {
        Self {
            uuid,
            props,
            value: None,
        }
    }

    pub fn name(&self) -> Option<&'static str> {
        decoder::characteristic_name(&self.uuid)
    }

    /// The cached value decoded for display.
    pub fn decoded_value(&self) -> Option<String> {
        self.value
            .as_deref()
            .map(|value| decoder::decode_value(&self.uuid, value))
    }
}

/// A discovered service. Characteristics stay empty until they are discovered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceRecord {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicRecord>,
}

impl ServiceRecord {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            characteristics: Vec::new(),
        }
    }

    pub fn name(&self) -> Option<&'static str> {
        decoder::service_name(&self.uuid)
    }
}

/// Advertisement payload as key-value data.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AdvertisementRecord {
    pub local_name: Option<String>,
    /// Raw manufacturer data, starting with the two byte company code
    pub manufacturer_data: Option<Vec<u8>>,
    pub services: Vec<Uuid>,
    pub service_data: BTreeMap<Uuid, Vec<u8>>,
    pub tx_power_level: Option<i16>,
    pub is_connectable: bool,
}

impl AdvertisementRecord {
    /// Flattens the advertisement into display rows.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut entries = Vec::new();
        if let Some(name) = &self.local_name {
            entries.push(("Local Name".to_string(), name.clone()));
        }
        if let Some(data) = &self.manufacturer_data {
            entries.push(("Manufacturer Data".to_string(), decoder::hex_string(data)));
        }
        if !self.services.is_empty() {
            let services = self
                .services
                .iter()
                .map(decoder::display_uuid)
                .collect::<Vec<_>>()
                .join(", ");
            entries.push(("Service UUIDs".to_string(), services));
        }
        for (uuid, data) in &self.service_data {
            entries.push((
                format!("Service Data {}", decoder::display_uuid(uuid)),
                decoder::hex_string(data),
            ));
        }
        if let Some(power) = self.tx_power_level {
            entries.push(("Tx Power Level".to_string(), format!("{} dBm", power)));
        }
        entries.push(("Is Connectable".to_string(), self.is_connectable.to_string()));
        entries
    }
}

impl From<&AdvertisementData> for AdvertisementRecord {
    fn from(adv: &AdvertisementData) -> Self {
        Self {
            local_name: adv.local_name.clone(),
            manufacturer_data: adv.manufacturer_data.as_ref().map(|m| {
                let mut raw = m.company_id.to_le_bytes().to_vec();
                raw.extend_from_slice(&m.data);
                raw
            }),
            services: adv.services.clone(),
            service_data: adv
                .service_data
                .iter()
                .map(|(uuid, data)| (*uuid, data.clone()))
                .collect(),
            tx_power_level: adv.tx_power_level,
            is_connectable: adv.is_connectable,
        }
    }
}

/// One discovery event, independent of the platform handle.
#[derive(Debug, Clone)]
pub struct DiscoveredPeripheral {
    pub id: String,
    pub name: Option<String>,
    pub rssi: i16,
    pub advertisement: AdvertisementRecord,
}

/// Represents a peripheral seen during scanning
#[derive(Debug, Clone, Serialize)]
pub struct PeripheralRecord {
    /// Platform-specific unique identifier for the device
    pub id: String,
    /// The name of the device, if available
    pub name: Option<String>,
    /// The signal strength (RSSI) of the last advertisement
    pub rssi: i16,
    /// The first two bytes of the manufacturer data
    pub manufacturer_code: Option<[u8; 2]>,
    /// Resolved manufacturer name
    pub manufacturer: String,
    pub advertisement: AdvertisementRecord,
    pub last_seen: DateTime<Local>,
    /// The battery level of the device, if it was read
    pub battery_level: Option<u8>,
    /// Whether the device exposes a UART-like service
    pub is_uart: bool,
    pub state: ConnectionState,
    pub services: Vec<ServiceRecord>,
}

impl PeripheralRecord {
    pub fn from_discovery(discovered: DiscoveredPeripheral) -> Self {
        let mut record = Self {
            id: discovered.id.clone(),
            name: None,
            rssi: 0,
            manufacturer_code: None,
            manufacturer: UNKNOWN_MANUFACTURER.to_string(),
            advertisement: AdvertisementRecord::default(),
            last_seen: Local::now(),
            battery_level: None,
            is_uart: false,
            state: ConnectionState::Disconnected,
            services: Vec::new(),
        };
        record.apply_discovery(discovered);
        record
    }

    /// Refreshes the advertisement derived fields.
    pub fn apply_discovery(&mut self, discovered: DiscoveredPeripheral) {
        if discovered.name.is_some() {
            self.name = discovered.name;
        }
        self.rssi = discovered.rssi;
        self.manufacturer_code = discovered
            .advertisement
            .manufacturer_data
            .as_deref()
            .and_then(decoder::manufacturer_code);
        self.manufacturer = self
            .manufacturer_code
            .map(decoder::manufacturer_name)
            .unwrap_or(UNKNOWN_MANUFACTURER)
            .to_string();
        self.is_uart |= discovered
            .advertisement
            .services
            .iter()
            .any(super::constants::is_uart_service);
        self.advertisement = discovered.advertisement;
        self.last_seen = Local::now();
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown Device")
    }

    /// `4C 00` style code, `N/A` without manufacturer data.
    pub fn manufacturer_code_string(&self) -> String {
        self.manufacturer_code
            .map(|code| decoder::hex_string(&code))
            .unwrap_or_else(|| "N/A".to_string())
    }

    /// Manufacturer line, with the raw code when the name is unknown.
    pub fn manufacturer_label(&self) -> String {
        if self.manufacturer == UNKNOWN_MANUFACTURER {
            format!("{} ({})", self.manufacturer, self.manufacturer_code_string())
        } else {
            self.manufacturer.clone()
        }
    }

    pub fn find_characteristic(&self, uuid: &Uuid) -> Option<&CharacteristicRecord> {
        self.services
            .iter()
            .flat_map(|s| s.characteristics.iter())
            .find(|c| c.uuid == *uuid)
    }
}

/// Represents the state of a successfully connected device.
/// This struct holds the active handles needed for interaction.
#[derive(Clone)]
pub struct ConnectedDeviceState {
    /// The device handle, used for things like checking connection status or disconnecting.
    pub device: Device,
    /// Characteristic handles keyed by their owning service.
    pub characteristics: Vec<(Uuid, Characteristic)>,
}

impl ConnectedDeviceState {
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&Characteristic> {
        self.characteristics
            .iter()
            .find(|(_, c)| c.uuid() == *uuid)
            .map(|(_, c)| c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovery(name: Option<&str>, manufacturer: Option<Vec<u8>>) -> DiscoveredPeripheral {
        DiscoveredPeripheral {
            id: "peripheral-1".to_string(),
            name: name.map(str::to_string),
            rssi: -60,
            advertisement: AdvertisementRecord {
                manufacturer_data: manufacturer,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_connection_state_cycle() {
        use ConnectionState::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(Connecting.can_transition_to(Disconnected));
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Connected.can_transition_to(Connected));
    }

    #[test]
    fn test_manufacturer_resolution() {
        let record = PeripheralRecord::from_discovery(discovery(
            Some("AirPods"),
            Some(vec![0x4C, 0x00, 0x07, 0x19]),
        ));
        assert_eq!(record.manufacturer, "Apple Inc.");
        assert_eq!(record.manufacturer_code_string(), "4C 00");
        assert_eq!(record.manufacturer_label(), "Apple Inc.");

        let record = PeripheralRecord::from_discovery(discovery(None, Some(vec![0x99, 0x99])));
        assert_eq!(record.manufacturer_label(), "Unknown Manufacturer (99 99)");
        assert_eq!(record.display_name(), "Unknown Device");

        let record = PeripheralRecord::from_discovery(discovery(None, None));
        assert_eq!(record.manufacturer_code_string(), "N/A");
    }

    #[test]
    fn test_name_survives_nameless_advertisement() {
        let mut record = PeripheralRecord::from_discovery(discovery(Some("Sensor"), None));
        record.apply_discovery(discovery(None, None));
        assert_eq!(record.name.as_deref(), Some("Sensor"));
    }

    #[test]
    fn test_advertisement_entries() {
        let adv = AdvertisementRecord {
            local_name: Some("Thermo".to_string()),
            manufacturer_data: Some(vec![0x0D, 0x00, 0x01]),
            services: vec![crate::core::decoder::uuid_from_u16(0x1809)],
            tx_power_level: Some(-4),
            is_connectable: true,
            ..Default::default()
        };
        let entries = adv.entries();
        assert_eq!(entries[0], ("Local Name".to_string(), "Thermo".to_string()));
        assert_eq!(entries[1].1, "0D 00 01");
        assert_eq!(entries[2].1, "1809");
        assert_eq!(entries[3].1, "-4 dBm");
        assert_eq!(entries[4].1, "true");
    }
}
