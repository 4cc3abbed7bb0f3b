//! Constants used throughout the application
//! This module contains all the constant values used in the application,
//! such as UUIDs, timeouts, and other configuration values.

use uuid::Uuid;

use crate::core::decoder::uuid_from_u16;

/// Standard Bluetooth Service UUIDs
pub const UUID_DEVICE_INFORMATION_SERVICE: Uuid = uuid_from_u16(0x180A);
pub const UUID_BATTERY_SERVICE: Uuid = uuid_from_u16(0x180F);

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_BATTERY_LEVEL: Uuid = uuid_from_u16(0x2A19);
pub const UUID_MANUFACTURER_NAME: Uuid = uuid_from_u16(0x2A29);
pub const UUID_MODEL_NUMBER: Uuid = uuid_from_u16(0x2A24);
pub const UUID_SERIAL_NUMBER: Uuid = uuid_from_u16(0x2A25);
pub const UUID_FIRMWARE_REVISION: Uuid = uuid_from_u16(0x2A26);
pub const UUID_HARDWARE_REVISION: Uuid = uuid_from_u16(0x2A27);

/// Services that carry a serial byte stream
pub const UART_SERVICES: [Uuid; 4] = [
    // Used by some generic modules
    uuid_from_u16(0x0001),
    // TI CC254x
    uuid_from_u16(0xFFE0),
    // Microchip transparent UART (HM-10 style modules)
    Uuid::from_u128(0x49535343_fe7d_4ae5_8fa9_9fafd205e455),
    // Nordic UART Service
    Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e),
];

/// Name of the Bluetooth Classic accessory reached through a serial session
pub const ACCESSORY_NAME: &str = "FM12";

/// Protocol string of the accessory serial session
pub const ACCESSORY_PROTOCOL: &str = "com.microchip.spp";

/// Payload of the "find me" alert
pub const FIND_ME_COMMAND: [u8; 1] = [0x01];

/// Fixed delay before reconnecting to an auto-connect device, in seconds
pub const RECONNECT_DELAY_SECS: u64 = 3;

/// Timeout for Bluetooth operations in seconds
pub const BLUETOOTH_OPERATION_TIMEOUT_SECS: u64 = 10;

/// Scan duration in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 5;

/// Advertisements weaker than this are ignored
pub const MIN_RSSI_THRESHOLD: i16 = -100;

/// Returns true if the service carries a UART byte stream
pub fn is_uart_service(uuid: &Uuid) -> bool {
    UART_SERVICES.contains(uuid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uart_services() {
        assert!(is_uart_service(&uuid_from_u16(0xFFE0)));
        assert!(is_uart_service(&Uuid::from_u128(
            0x6e400001_b5a3_f393_e0a9_e50e24dcca9e
        )));
        assert!(!is_uart_service(&UUID_BATTERY_SERVICE));
    }
}
