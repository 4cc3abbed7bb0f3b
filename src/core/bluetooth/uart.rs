//! UART-style terminal session over GATT
//! Tracks which characteristic is written to, which one is listened to, and
//! the transcript of everything sent and received.

use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::core::bluetooth::events::{BleEvent, BleObserver, EventHub};
use crate::core::bluetooth::types::{CharacteristicRecord, PeripheralRecord};
use crate::core::decoder::display_uuid;
use crate::error::BleError;

/// Collects received lines of one device from the event hub.
struct TranscriptRecorder {
    device_id: String,
    lines: Mutex<Vec<String>>,
}

impl TranscriptRecorder {
    fn push(&self, line: String) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line);
    }
}

impl BleObserver for TranscriptRecorder {
    fn on_event(&self, event: &BleEvent) {
        match event {
            BleEvent::ValueUpdated { id, line, .. } | BleEvent::Sent { id, line }
                if *id == self.device_id =>
            {
                self.push(line.clone())
            }
            _ => {}
        }
    }
}

pub struct UartSession {
    device_id: String,
    writable: Vec<CharacteristicRecord>,
    subscribable: Vec<CharacteristicRecord>,
    listening: Option<Uuid>,
    tx: Option<Uuid>,
    recorder: Arc<TranscriptRecorder>,
    hub: EventHub,
}

impl UartSession {
    /// Builds a session from a device whose GATT tree has been discovered.
    pub fn new(record: &PeripheralRecord, hub: &EventHub) -> Self {
        let mut writable: Vec<CharacteristicRecord> = Vec::new();
        let mut subscribable: Vec<CharacteristicRecord> = Vec::new();
        for characteristic in record.services.iter().flat_map(|s| &s.characteristics) {
            if characteristic.props.is_writable()
                && !writable.iter().any(|c| c.uuid == characteristic.uuid)
            {
                writable.push(characteristic.clone());
            }
            if characteristic.props.is_subscribable()
                && !subscribable.iter().any(|c| c.uuid == characteristic.uuid)
            {
                subscribable.push(characteristic.clone());
            }
        }

        let recorder = Arc::new(TranscriptRecorder {
            device_id: record.id.clone(),
            lines: Mutex::new(Vec::new()),
        });
        let observer: Arc<dyn BleObserver> = recorder.clone();
        hub.subscribe(&observer);

        Self {
            device_id: record.id.clone(),
            writable,
            subscribable,
            listening: None,
            tx: None,
            recorder,
            hub: hub.clone(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn writable(&self) -> &[CharacteristicRecord] {
        &self.writable
    }

    pub fn subscribable(&self) -> &[CharacteristicRecord] {
        &self.subscribable
    }

    pub fn listening(&self) -> Option<Uuid> {
        self.listening
    }

    /// The characteristic to listen to when none was chosen yet.
    pub fn initial_listening(&self) -> Option<Uuid> {
        match self.listening {
            Some(_) => None,
            None => self.subscribable.first().map(|c| c.uuid),
        }
    }

    /// Switches the listening characteristic. Returns the previous one, which
    /// the caller must unsubscribe.
    pub fn select_listening(&mut self, uuid: Uuid) -> Result<Option<Uuid>, BleError> {
        if !self.subscribable.iter().any(|c| c.uuid == uuid) {
            return Err(BleError::Unsupported {
                uuid: display_uuid(&uuid),
                operation: "notify",
            });
        }
        Ok(self.listening.replace(uuid).filter(|previous| *previous != uuid))
    }

    pub fn stop_listening(&mut self) -> Result<Uuid, BleError> {
        self.listening.take().ok_or(BleError::NotListening)
    }

    /// Chooses the TX characteristic. Without an explicit choice the only
    /// writable characteristic is used.
    pub fn select_tx(&mut self, uuid: Option<Uuid>) -> Result<Uuid, BleError> {
        let chosen = match uuid {
            Some(uuid) => {
                if !self.writable.iter().any(|c| c.uuid == uuid) {
                    return Err(BleError::Unsupported {
                        uuid: display_uuid(&uuid),
                        operation: "write",
                    });
                }
                uuid
            }
            None => match self.writable.as_slice() {
                [] => return Err(BleError::NoWritableCharacteristic),
                [only] => only.uuid,
                many => {
                    let choices = many
                        .iter()
                        .map(|c| display_uuid(&c.uuid))
                        .collect::<Vec<_>>()
                        .join(", ");
                    return Err(BleError::AmbiguousTx(choices));
                }
            },
        };
        self.tx = Some(chosen);
        Ok(chosen)
    }

    pub fn tx(&self) -> Option<Uuid> {
        self.tx
    }

    /// Queues a sent line behind everything received so far.
    pub fn record_sent(&self, line: String) {
        self.hub.emit(BleEvent::Sent {
            id: self.device_id.clone(),
            line,
        });
    }

    pub fn transcript(&self) -> Vec<String> {
        self.recorder
            .lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn transcript_text(&self) -> String {
        self.transcript().join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::types::{
        AdvertisementRecord, CharacteristicProps, DiscoveredPeripheral, ServiceRecord,
    };

    const NUS_SERVICE: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
    const NUS_RX: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
    const NUS_TX: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);
    const OTHER_NOTIFY: Uuid = Uuid::from_u128(0x6e400004_b5a3_f393_e0a9_e50e24dcca9e);

    fn props(write: bool, notify: bool) -> CharacteristicProps {
        CharacteristicProps {
            write_without_response: write,
            notify,
            ..Default::default()
        }
    }

    fn uart_device(extra_writable: bool) -> PeripheralRecord {
        let mut record = PeripheralRecord::from_discovery(DiscoveredPeripheral {
            id: "uart".to_string(),
            name: Some("Nordic".to_string()),
            rssi: -50,
            advertisement: AdvertisementRecord::default(),
        });
        let mut service = ServiceRecord::new(NUS_SERVICE);
        service.characteristics = vec![
            CharacteristicRecord::new(NUS_RX, props(true, false)),
            CharacteristicRecord::new(NUS_TX, props(false, true)),
            CharacteristicRecord::new(OTHER_NOTIFY, props(extra_writable, true)),
            // duplicate handles of the same characteristic are listed once
            CharacteristicRecord::new(NUS_RX, props(true, false)),
        ];
        record.services = vec![service];
        record
    }

    #[test]
    fn test_characteristic_lists() {
        let (hub, _dispatcher) = EventHub::new();
        let session = UartSession::new(&uart_device(false), &hub);
        assert_eq!(session.writable().len(), 1);
        assert_eq!(session.subscribable().len(), 2);
        assert_eq!(session.initial_listening(), Some(NUS_TX));
    }

    #[test]
    fn test_single_listening_characteristic() {
        let (hub, _dispatcher) = EventHub::new();
        let mut session = UartSession::new(&uart_device(false), &hub);

        assert_eq!(session.select_listening(NUS_TX).unwrap(), None);
        assert_eq!(session.initial_listening(), None);
        assert_eq!(session.select_listening(OTHER_NOTIFY).unwrap(), Some(NUS_TX));
        assert_eq!(session.listening(), Some(OTHER_NOTIFY));
        // reselecting is not a switch
        assert_eq!(session.select_listening(OTHER_NOTIFY).unwrap(), None);
        assert!(session.select_listening(NUS_RX).is_err());

        assert_eq!(session.stop_listening().unwrap(), OTHER_NOTIFY);
        assert!(matches!(
            session.stop_listening(),
            Err(BleError::NotListening)
        ));
    }

    #[test]
    fn test_tx_selection() {
        let (hub, _dispatcher) = EventHub::new();
        let mut session = UartSession::new(&uart_device(false), &hub);
        assert_eq!(session.select_tx(None).unwrap(), NUS_RX);

        let mut session = UartSession::new(&uart_device(true), &hub);
        assert!(matches!(
            session.select_tx(None),
            Err(BleError::AmbiguousTx(_))
        ));
        assert_eq!(session.select_tx(Some(OTHER_NOTIFY)).unwrap(), OTHER_NOTIFY);
        assert!(session.select_tx(Some(NUS_TX)).is_err());

        let mut empty = uart_device(false);
        empty.services.clear();
        let mut session = UartSession::new(&empty, &hub);
        assert!(matches!(
            session.select_tx(None),
            Err(BleError::NoWritableCharacteristic)
        ));
    }

    #[test]
    fn test_transcript_collects_received_and_sent_lines() {
        let (hub, mut dispatcher) = EventHub::new();
        let session = UartSession::new(&uart_device(false), &hub);

        session.record_sent("🚀 Sent Command: AT to 6E400002".to_string());
        hub.emit(BleEvent::ValueUpdated {
            id: "uart".to_string(),
            uuid: NUS_TX,
            value: b"OK".to_vec(),
            line: "📡 🔹  [CA9E] Received: OK (4F 4B)".to_string(),
        });
        hub.emit(BleEvent::ValueUpdated {
            id: "someone-else".to_string(),
            uuid: NUS_TX,
            value: b"NO".to_vec(),
            line: "ignored".to_string(),
        });
        dispatcher.deliver_pending();

        assert_eq!(
            session.transcript_text(),
            "🚀 Sent Command: AT to 6E400002\n📡 🔹  [CA9E] Received: OK (4F 4B)"
        );
    }

    #[test]
    fn test_sent_line_stays_behind_earlier_notification() {
        let (hub, mut dispatcher) = EventHub::new();
        let session = UartSession::new(&uart_device(false), &hub);

        hub.emit(BleEvent::ValueUpdated {
            id: "uart".to_string(),
            uuid: NUS_TX,
            value: b"BOOT".to_vec(),
            line: "RECEIVED BOOT".to_string(),
        });
        session.record_sent("SENT AT".to_string());
        dispatcher.deliver_pending();

        assert_eq!(session.transcript(), vec!["RECEIVED BOOT", "SENT AT"]);
    }
}
