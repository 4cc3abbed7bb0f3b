//! Device bookkeeping
//! Keeps one record per discovered peripheral, with its connection state
//! and the GATT tree discovered while connected.

use uuid::Uuid;

use crate::core::bluetooth::constants::is_uart_service;
use crate::core::bluetooth::types::{
    CharacteristicRecord, ConnectionState, DiscoveredPeripheral, PeripheralRecord, ServiceRecord,
};
use crate::error::BleError;

/// Name fragments of Apple phones, tablets and computers.
const APPLE_NAME_MARKERS: [&str; 4] = ["iPhone", "iPad", "iMac", "Mac"];

/// Which devices a listing shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum DeviceFilter {
    #[default]
    All,
    /// Named devices that are not Apple phones or computers
    Named,
    Unnamed,
    Apple,
}

impl DeviceFilter {
    pub fn matches(self, record: &PeripheralRecord) -> bool {
        let is_apple = record
            .name
            .as_deref()
            .is_some_and(|name| APPLE_NAME_MARKERS.iter().any(|m| name.contains(m)));
        match self {
            DeviceFilter::All => true,
            DeviceFilter::Named => record.name.is_some() && !is_apple,
            DeviceFilter::Unnamed => record.name.is_none(),
            DeviceFilter::Apple => is_apple,
        }
    }
}

/// Discovered peripherals, in the order they were first seen.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<PeripheralRecord>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new record or refreshes the existing one in place.
    /// Returns true when the device was not known before.
    pub fn upsert_discovered(&mut self, discovered: DiscoveredPeripheral) -> bool {
        match self.devices.iter_mut().find(|d| d.id == discovered.id) {
            Some(existing) => {
                existing.apply_discovery(discovered);
                false
            }
            None => {
                self.devices.push(PeripheralRecord::from_discovery(discovered));
                true
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&PeripheralRecord> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn list(&self) -> &[PeripheralRecord] {
        &self.devices
    }

    pub fn connected(&self) -> Vec<&PeripheralRecord> {
        self.devices
            .iter()
            .filter(|d| d.state == ConnectionState::Connected)
            .collect()
    }

    pub fn filter(&self, filter: DeviceFilter) -> Vec<&PeripheralRecord> {
        self.devices.iter().filter(|d| filter.matches(d)).collect()
    }

    pub fn begin_connect(&mut self, id: &str) -> Result<(), BleError> {
        self.transition(id, ConnectionState::Connecting)
    }

    pub fn mark_connected(&mut self, id: &str) -> Result<(), BleError> {
        self.transition(id, ConnectionState::Connected)
    }

    /// Ends a connection or a failed connection attempt.
    pub fn mark_disconnected(&mut self, id: &str) -> Result<(), BleError> {
        self.transition(id, ConnectionState::Disconnected)
    }

    /// Replaces the service list of a connected device. Characteristics of
    /// services that are still present are kept.
    pub fn set_services(&mut self, id: &str, services: &[Uuid]) -> Result<(), BleError> {
        let record = self.connected_mut(id)?;
        let mut previous = std::mem::take(&mut record.services);
        record.services = services
            .iter()
            .map(|uuid| match previous.iter().position(|s| s.uuid == *uuid) {
                Some(index) => previous.swap_remove(index),
                None => ServiceRecord::new(*uuid),
            })
            .collect();
        record.is_uart |= services.iter().any(is_uart_service);
        Ok(())
    }

    /// Stores the characteristics of an already discovered service.
    pub fn set_characteristics(
        &mut self,
        id: &str,
        service: &Uuid,
        characteristics: Vec<CharacteristicRecord>,
    ) -> Result<(), BleError> {
        let record = self.connected_mut(id)?;
        let service_record = record
            .services
            .iter_mut()
            .find(|s| s.uuid == *service)
            .ok_or_else(|| BleError::ServiceNotFound(service.to_string()))?;
        service_record.characteristics = characteristics;
        Ok(())
    }

    pub fn cache_value(&mut self, id: &str, uuid: &Uuid, value: Vec<u8>) -> Result<(), BleError> {
        let record = self.get_mut(id)?;
        let characteristic = record
            .services
            .iter_mut()
            .flat_map(|s| s.characteristics.iter_mut())
            .find(|c| c.uuid == *uuid)
            .ok_or_else(|| BleError::CharacteristicNotFound(uuid.to_string()))?;
        characteristic.value = Some(value);
        Ok(())
    }

    pub fn set_battery_level(&mut self, id: &str, level: u8) -> Result<(), BleError> {
        self.get_mut(id)?.battery_level = Some(level);
        Ok(())
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut PeripheralRecord, BleError> {
        self.devices
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| BleError::DeviceNotFound(id.to_string()))
    }

    fn connected_mut(&mut self, id: &str) -> Result<&mut PeripheralRecord, BleError> {
        let record = self.get_mut(id)?;
        if record.state != ConnectionState::Connected {
            return Err(BleError::NotConnected(id.to_string()));
        }
        Ok(record)
    }

    fn transition(&mut self, id: &str, next: ConnectionState) -> Result<(), BleError> {
        let record = self.get_mut(id)?;
        if !record.state.can_transition_to(next) {
            return Err(BleError::InvalidTransition {
                id: id.to_string(),
                from: record.state,
                to: next,
            });
        }
        record.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::types::{AdvertisementRecord, CharacteristicProps};
    use crate::core::decoder::uuid_from_u16;

    fn discovered(id: &str, name: Option<&str>, rssi: i16) -> DiscoveredPeripheral {
        DiscoveredPeripheral {
            id: id.to_string(),
            name: name.map(str::to_string),
            rssi,
            advertisement: AdvertisementRecord::default(),
        }
    }

    fn connected_registry(id: &str) -> DeviceRegistry {
        let mut registry = DeviceRegistry::new();
        registry.upsert_discovered(discovered(id, Some("Sensor"), -50));
        registry.begin_connect(id).unwrap();
        registry.mark_connected(id).unwrap();
        registry
    }

    #[test]
    fn test_upsert_updates_in_place() {
        let mut registry = DeviceRegistry::new();
        assert!(registry.upsert_discovered(discovered("a", Some("Thermo"), -70)));
        assert!(registry.upsert_discovered(discovered("b", None, -80)));
        assert!(!registry.upsert_discovered(discovered("a", None, -40)));

        assert_eq!(registry.list().len(), 2);
        let a = registry.get("a").unwrap();
        assert_eq!(a.rssi, -40);
        assert_eq!(a.name.as_deref(), Some("Thermo"));
        assert_eq!(registry.list()[0].id, "a");
    }

    #[test]
    fn test_connection_transitions() {
        let mut registry = DeviceRegistry::new();
        registry.upsert_discovered(discovered("a", None, -70));

        let err = registry.mark_connected("a").unwrap_err();
        assert!(matches!(err, BleError::InvalidTransition { .. }));

        registry.begin_connect("a").unwrap();
        assert!(registry.begin_connect("a").is_err());
        registry.mark_connected("a").unwrap();
        assert_eq!(registry.connected().len(), 1);

        registry.mark_disconnected("a").unwrap();
        assert!(registry.connected().is_empty());
        assert!(registry.mark_disconnected("a").is_err());

        // failed attempt
        registry.begin_connect("a").unwrap();
        registry.mark_disconnected("a").unwrap();
        assert_eq!(registry.get("a").unwrap().state, ConnectionState::Disconnected);

        assert!(matches!(
            registry.begin_connect("missing"),
            Err(BleError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_characteristics_need_a_discovered_service() {
        let mut registry = connected_registry("a");
        let battery_service = uuid_from_u16(0x180F);
        let battery_level = uuid_from_u16(0x2A19);
        let props = CharacteristicProps {
            read: true,
            ..Default::default()
        };

        let err = registry
            .set_characteristics(
                "a",
                &battery_service,
                vec![CharacteristicRecord::new(battery_level, props)],
            )
            .unwrap_err();
        assert!(matches!(err, BleError::ServiceNotFound(_)));

        registry.set_services("a", &[battery_service]).unwrap();
        registry
            .set_characteristics(
                "a",
                &battery_service,
                vec![CharacteristicRecord::new(battery_level, props)],
            )
            .unwrap();
        registry.cache_value("a", &battery_level, vec![0x05]).unwrap();

        let record = registry.get("a").unwrap();
        let characteristic = record.find_characteristic(&battery_level).unwrap();
        assert_eq!(characteristic.decoded_value().as_deref(), Some("5%"));

        // rediscovering the same services keeps characteristics
        registry
            .set_services("a", &[uuid_from_u16(0x180A), battery_service])
            .unwrap();
        let record = registry.get("a").unwrap();
        assert_eq!(record.services.len(), 2);
        assert!(record.find_characteristic(&battery_level).is_some());
        assert!(!record.is_uart);

        registry.set_services("a", &[uuid_from_u16(0xFFE0)]).unwrap();
        assert!(registry.get("a").unwrap().is_uart);
    }

    #[test]
    fn test_services_require_connection() {
        let mut registry = DeviceRegistry::new();
        registry.upsert_discovered(discovered("a", None, -70));
        assert!(matches!(
            registry.set_services("a", &[uuid_from_u16(0x180F)]),
            Err(BleError::NotConnected(_))
        ));
    }

    #[test]
    fn test_filters() {
        let mut registry = DeviceRegistry::new();
        registry.upsert_discovered(discovered("1", Some("Thermo"), -70));
        registry.upsert_discovered(discovered("2", Some("Jane's iPhone"), -70));
        registry.upsert_discovered(discovered("3", Some("MacBook Pro"), -70));
        registry.upsert_discovered(discovered("4", None, -70));

        let ids = |filter| {
            registry
                .filter(filter)
                .iter()
                .map(|d| d.id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(DeviceFilter::All), vec!["1", "2", "3", "4"]);
        assert_eq!(ids(DeviceFilter::Named), vec!["1"]);
        assert_eq!(ids(DeviceFilter::Unnamed), vec!["4"]);
        assert_eq!(ids(DeviceFilter::Apple), vec!["2", "3"]);
    }
}
