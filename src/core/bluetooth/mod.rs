//! Bluetooth functionality
//! This module handles all bluetooth operations including scanning,
//! connecting, GATT access, notifications and UART sessions.

mod commands;
mod connection;
mod constants;
mod events;
mod manager;
mod notification;
mod reconnect;
mod registry;
mod scanner;
mod types;
mod uart;

// Re-export types that should be publicly accessible
pub use commands::{CharacteristicWriter, CommandExecutor, GpsTime, UartCommand, WriteMode};
pub use connection::ConnectionManager;
pub use constants::*;
pub use events::{BleEvent, BleObserver, EventDispatcher, EventHub, LogMessage};
pub use manager::BluetoothManager;
pub use notification::NotificationHandler;
pub use registry::{DeviceFilter, DeviceRegistry};
pub use scanner::BluetoothScanner;
pub use types::{
    AdvertisementRecord, CharacteristicProps, CharacteristicRecord, ConnectedDeviceState,
    ConnectionState, DiscoveredPeripheral, PeripheralRecord, ServiceRecord,
};
pub use uart::UartSession;
